// SPDX-License-Identifier: MPL-2.0
//! Video playback newtypes.
//!
//! This module provides type-safe wrappers for video playback values,
//! ensuring they are always within valid ranges.

use std::time::Duration;

// =============================================================================
// Volume
// =============================================================================

/// Volume bounds (0.0 to 1.0).
pub mod volume_bounds {
    /// Minimum volume level.
    pub const MIN: f32 = 0.0;
    /// Maximum volume level.
    pub const MAX: f32 = 1.0;
    /// Default volume level.
    pub const DEFAULT: f32 = 1.0;
}

/// Volume level, guaranteed to be within valid range (0.0–1.0).
///
/// Non-finite input maps to the minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume(f32);

impl Volume {
    /// Creates a new volume level, clamping to valid range.
    #[must_use]
    pub fn new(volume: f32) -> Self {
        if volume.is_nan() {
            return Self(volume_bounds::MIN);
        }
        Self(volume.clamp(volume_bounds::MIN, volume_bounds::MAX))
    }

    /// Returns the volume value as f32.
    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(volume_bounds::DEFAULT)
    }
}

// =============================================================================
// FrameRate
// =============================================================================

/// Frame rate bounds.
pub mod frame_rate_bounds {
    /// Lowest rate accepted from a source.
    pub const MIN: f64 = 1.0;
    /// Highest rate accepted from a source.
    pub const MAX: f64 = 1000.0;
    /// Substituted when a source reports a rate outside `MIN..=MAX`.
    pub const DEFAULT: f64 = 30.0;
}

/// Nominal frame rate of a video track, always within [`frame_rate_bounds`].
///
/// Sources that report NaN or a rate outside the bounds get the fallback rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRate(f64);

impl FrameRate {
    /// Creates a frame rate, substituting [`frame_rate_bounds::DEFAULT`] for unusable values.
    #[must_use]
    pub fn new(fps: f64) -> Self {
        Self::with_fallback(fps, frame_rate_bounds::DEFAULT)
    }

    /// Creates a frame rate, substituting `fallback` for unusable values.
    ///
    /// A `fallback` that is itself unusable is replaced by the crate default.
    #[must_use]
    pub fn with_fallback(fps: f64, fallback: f64) -> Self {
        if Self::is_usable(fps) {
            Self(fps)
        } else if Self::is_usable(fallback) {
            Self(fallback)
        } else {
            Self(frame_rate_bounds::DEFAULT)
        }
    }

    fn is_usable(fps: f64) -> bool {
        (frame_rate_bounds::MIN..=frame_rate_bounds::MAX).contains(&fps)
    }

    /// Returns the rate in frames per second.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Duration of a single frame, used as the tick interval.
    #[must_use]
    pub fn frame_interval(self) -> Duration {
        Duration::from_secs_f64(1.0 / self.0)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self(frame_rate_bounds::DEFAULT)
    }
}

// =============================================================================
// DriftThreshold
// =============================================================================

/// Drift threshold bounds (in seconds).
pub mod drift_threshold_bounds {
    /// Minimum threshold.
    pub const MIN: f64 = 0.001;
    /// Maximum threshold.
    pub const MAX: f64 = 2.0;
    /// Default threshold.
    pub const DEFAULT: f64 = 0.1;
}

/// Symmetric tolerance between a frame's timestamp and the audio clock.
///
/// Frames whose offset lies within `[-threshold, +threshold]` are shown as-is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftThreshold(f64);

impl DriftThreshold {
    /// Creates a threshold, clamping to valid range.
    #[must_use]
    pub fn new(secs: f64) -> Self {
        if secs.is_nan() {
            return Self::default();
        }
        Self(secs.clamp(drift_threshold_bounds::MIN, drift_threshold_bounds::MAX))
    }

    /// Returns the threshold in seconds.
    #[must_use]
    pub fn secs(self) -> f64 {
        self.0
    }
}

impl Default for DriftThreshold {
    fn default() -> Self {
        Self(drift_threshold_bounds::DEFAULT)
    }
}

// =============================================================================
// TextureCacheCapacity
// =============================================================================

/// Texture cache capacity bounds (resolved planes kept alive).
pub mod texture_cache_bounds {
    /// Minimum capacity. Two sources, two eyes, two planes.
    pub const MIN: usize = 8;
    /// Maximum capacity.
    pub const MAX: usize = 256;
    /// Default capacity.
    pub const DEFAULT: usize = 32;
}

/// Number of converted textures the GPU texture cache keeps alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCacheCapacity(usize);

impl TextureCacheCapacity {
    /// Creates a new capacity, clamping to valid range.
    #[must_use]
    pub fn new(value: usize) -> Self {
        Self(value.clamp(texture_cache_bounds::MIN, texture_cache_bounds::MAX))
    }

    /// Returns the value as usize.
    #[must_use]
    pub fn value(self) -> usize {
        self.0
    }
}

impl Default for TextureCacheCapacity {
    fn default() -> Self {
        Self(texture_cache_bounds::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;

    #[test]
    fn volume_clamps_to_valid_range() {
        assert_abs_diff_eq!(Volume::new(-0.5).value(), 0.0);
        assert_abs_diff_eq!(Volume::new(1.7).value(), 1.0);
        assert_abs_diff_eq!(Volume::new(0.25).value(), 0.25);
    }

    #[test]
    fn volume_nan_maps_to_silence() {
        assert_abs_diff_eq!(Volume::new(f32::NAN).value(), 0.0);
    }

    #[test]
    fn frame_rate_substitutes_default_for_unusable_values() {
        assert_abs_diff_eq!(FrameRate::new(0.0).value(), 30.0);
        assert_abs_diff_eq!(FrameRate::new(-24.0).value(), 30.0);
        assert_abs_diff_eq!(FrameRate::new(f64::NAN).value(), 30.0);
        assert_abs_diff_eq!(FrameRate::new(f64::INFINITY).value(), 30.0);
    }

    #[test]
    fn frame_rate_keeps_positive_values() {
        assert_abs_diff_eq!(FrameRate::new(23.976).value(), 23.976);
        assert_abs_diff_eq!(FrameRate::new(90.0).value(), 90.0);
    }

    #[test]
    fn frame_rate_honors_configured_fallback() {
        assert_abs_diff_eq!(FrameRate::with_fallback(0.0, 60.0).value(), 60.0);
        assert_abs_diff_eq!(FrameRate::with_fallback(0.0, -1.0).value(), 30.0);
    }

    #[test]
    fn frame_rate_rejects_out_of_range_values() {
        assert_abs_diff_eq!(FrameRate::new(1e-20).value(), 30.0);
        assert_abs_diff_eq!(FrameRate::new(0.5).value(), 30.0);
        assert_abs_diff_eq!(FrameRate::new(90_000.0).value(), 30.0);
        assert_abs_diff_eq!(FrameRate::with_fallback(1e-20, 25.0).value(), 25.0);
        assert_abs_diff_eq!(FrameRate::with_fallback(90_000.0, 5000.0).value(), 30.0);
        assert_abs_diff_eq!(FrameRate::new(frame_rate_bounds::MIN).value(), 1.0);
        assert_abs_diff_eq!(FrameRate::new(frame_rate_bounds::MAX).value(), 1000.0);
    }

    #[test]
    fn frame_interval_stays_bounded_for_extreme_rates() {
        let slow = FrameRate::new(1e-20).frame_interval();
        let fast = FrameRate::new(90_000.0).frame_interval();
        assert_abs_diff_eq!(slow.as_secs_f64(), 1.0 / 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fast.as_secs_f64(), 1.0 / 30.0, epsilon = 1e-9);
    }

    #[test]
    fn frame_interval_is_reciprocal_of_rate() {
        let interval = FrameRate::new(30.0).frame_interval();
        assert_abs_diff_eq!(interval.as_secs_f64(), 1.0 / 30.0, epsilon = 1e-9);
    }

    #[test]
    fn drift_threshold_clamps_and_defaults() {
        assert_abs_diff_eq!(DriftThreshold::default().secs(), 0.1);
        assert_abs_diff_eq!(DriftThreshold::new(0.0).secs(), drift_threshold_bounds::MIN);
        assert_abs_diff_eq!(DriftThreshold::new(10.0).secs(), drift_threshold_bounds::MAX);
        assert_abs_diff_eq!(DriftThreshold::new(f64::NAN).secs(), 0.1);
    }

    #[test]
    fn texture_cache_capacity_clamps() {
        assert_eq!(TextureCacheCapacity::new(0).value(), texture_cache_bounds::MIN);
        assert_eq!(TextureCacheCapacity::new(10_000).value(), texture_cache_bounds::MAX);
        assert_eq!(TextureCacheCapacity::new(64).value(), 64);
    }
}
