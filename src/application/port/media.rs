// SPDX-License-Identifier: MPL-2.0
//! Media backend port definition.
//!
//! This module defines the [`MediaBackend`] and [`TrackReader`] traits.
//! A backend resolves locators, probes track metadata, hands out
//! pull-based track readers and builds the audio transport that clocks
//! playback.
//!
//! # Design Notes
//!
//! - Readers are **stateful** and pulled one sample at a time
//! - Methods are blocking; the controller runs them on tokio's blocking pool
//! - Readers never retry: a refused output or start is terminal for that reader

use std::fmt;
use std::sync::Arc;

use super::transport::AudioTransport;
use crate::domain::video::{
    ColorDescription, ColorPrimaries, FrameSample, PixelFormat, Projection, VideoInfo,
};
use crate::error::SessionError;

// =============================================================================
// Locators and probe results
// =============================================================================

/// Opaque reference to a media source (file path, URL, registry key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocator(String);

impl SourceLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceLocator {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Raw track metadata as reported by a backend, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProbe {
    pub width: u32,
    pub height: u32,
    /// Frame rate exactly as the container declares it; may be zero.
    pub nominal_frame_rate: f64,
    pub duration_secs: f64,
    pub is_spatial: bool,
    pub projection: Projection,
    pub horizontal_fov_degrees: Option<f32>,
    pub color_primaries: ColorPrimaries,
}

impl SourceProbe {
    /// Normalizes the probe into a [`VideoInfo`], substituting `fallback_fps`
    /// for a frame rate outside the accepted bounds.
    #[must_use]
    pub fn into_info(self, fallback_fps: f64) -> VideoInfo {
        VideoInfo {
            width: self.width,
            height: self.height,
            is_spatial: self.is_spatial,
            frame_rate: crate::domain::video::FrameRate::with_fallback(
                self.nominal_frame_rate,
                fallback_fps,
            ),
            duration_secs: self.duration_secs.max(0.0),
            projection: self.projection,
            horizontal_fov_degrees: self.horizontal_fov_degrees,
            color_primaries: self.color_primaries,
        }
    }
}

// =============================================================================
// Reader configuration
// =============================================================================

/// Output configuration requested from a track reader.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// Coded layers to decode. Both views of a multiview track are requested
    /// for spatial sources; empty means the base layer only.
    pub layer_ids: Vec<u32>,
    pub color: ColorDescription,
    pub pixel_format: PixelFormat,
    /// Buffers must be importable by the GPU without a copy.
    pub gpu_compatible: bool,
}

impl OutputSettings {
    /// Builds the output settings for a source.
    #[must_use]
    pub fn for_video(info: &VideoInfo, pixel_format: PixelFormat) -> Self {
        Self {
            layer_ids: if info.is_spatial { vec![0, 1] } else { Vec::new() },
            color: info.output_color(),
            pixel_format,
            gpu_compatible: true,
        }
    }
}

/// Window of the track a reader decodes, in seconds. The end is unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start_secs: f64,
}

impl TimeRange {
    /// From the beginning of the track to its end.
    pub const FULL: TimeRange = TimeRange { start_secs: 0.0 };

    /// From `start_secs` to the end of the track. Negative starts clamp to zero.
    #[must_use]
    pub fn starting_at(start_secs: f64) -> Self {
        Self {
            start_secs: if start_secs.is_finite() {
                start_secs.max(0.0)
            } else {
                0.0
            },
        }
    }
}

/// Lifecycle of a track reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaderStatus {
    #[default]
    NotStarted,
    Reading,
    Completed,
    Failed,
    Cancelled,
}

// =============================================================================
// Presentation context
// =============================================================================

/// Host-side context the audio transport is created under.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresentationContext {
    /// Identifier of the scene or window presenting the video, if any.
    pub stream_id: Option<String>,
    /// Anchor spatial audio to the presenting scene instead of the listener.
    pub anchor_audio_to_scene: bool,
}

// =============================================================================
// Traits
// =============================================================================

/// Pull-based reader over the video track of a single source.
///
/// # Lifecycle
///
/// 1. `attach_output()` with the requested settings
/// 2. `set_time_range()` (optional, defaults to the whole track)
/// 3. `start_reading()`
/// 4. `copy_next_sample()` until it returns `None` with status `Completed`
pub trait TrackReader: Send {
    /// Attaches an output with the given settings. Returns false if refused.
    fn attach_output(&mut self, settings: &OutputSettings) -> bool;

    /// Restricts decoding to samples at or after `range.start_secs`.
    fn set_time_range(&mut self, range: TimeRange);

    /// Starts decoding. Returns false if the reader cannot start.
    fn start_reading(&mut self) -> bool;

    fn status(&self) -> ReaderStatus;

    /// Returns the next decoded sample, or `None` when none is ready.
    ///
    /// `None` with status `Reading` is a temporary underrun; `None` with
    /// status `Completed` is the end of the track.
    fn copy_next_sample(&mut self) -> Option<FrameSample>;

    /// Stops decoding and releases decoder resources. Idempotent.
    fn cancel_reading(&mut self);
}

/// Port resolving sources into readers and audio transports.
pub trait MediaBackend: Send + Sync {
    /// Reads the static metadata of the video track.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SourceUnreadable`] or [`SessionError::NoVideoTrack`].
    fn probe(&self, locator: &SourceLocator) -> Result<SourceProbe, SessionError>;

    /// Creates an unstarted reader over the video track.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SourceUnreadable`] or [`SessionError::NoVideoTrack`].
    fn create_reader(&self, locator: &SourceLocator) -> Result<Box<dyn TrackReader>, SessionError>;

    /// Creates the audio transport for the source's audio track.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoAudioTrack`] when the source has no audio.
    fn create_audio_transport(
        &self,
        locator: &SourceLocator,
        context: &PresentationContext,
    ) -> Result<Arc<dyn AudioTransport>, SessionError>;
}
