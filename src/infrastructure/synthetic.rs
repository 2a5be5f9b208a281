// SPDX-License-Identifier: MPL-2.0
//! Synthetic media backend.
//!
//! Generates frames on demand from a [`SyntheticSource`] description instead
//! of decoding a file. Every frame carries its index and eye in its pixel
//! bytes so that tests can tell exactly which frame reached a texture:
//!
//! - bytes `0..8`: frame index, native-endian `u64`
//! - remaining bytes of the first plane: eye mark ([`LEFT_MARK`],
//!   [`RIGHT_MARK`] or [`MONO_MARK`])
//! - chroma planes: neutral `0x80`
//!
//! Audio is provided by a [`ClockTransport`] per opened source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::application::port::{
    AudioTransport, MediaBackend, OutputSettings, PresentationContext, ReaderStatus,
    SourceLocator, SourceProbe, TimeRange, TrackReader,
};
use crate::domain::video::{
    BufferTag, ColorPrimaries, Eye, FrameImage, FrameRate, FrameSample, PixelBuffer, PixelFormat,
    PixelPlane, Projection, TaggedBuffer,
};
use crate::error::SessionError;
use crate::infrastructure::clock::ClockTransport;

/// Fill byte of left-eye buffers.
pub const LEFT_MARK: u8 = 0x4c;
/// Fill byte of right-eye buffers.
pub const RIGHT_MARK: u8 = 0x52;
/// Fill byte of single-view buffers.
pub const MONO_MARK: u8 = 0x4d;

const CHROMA_FILL: u8 = 0x80;
const INDEX_BYTES: usize = std::mem::size_of::<u64>();

/// Reads the frame index stamped into the first plane of a synthetic frame.
#[must_use]
pub fn stamped_index(bytes: &[u8]) -> Option<u64> {
    bytes
        .get(..INDEX_BYTES)
        .map(bytemuck::pod_read_unaligned::<u64>)
}

/// Reads the eye mark of a synthetic frame's first plane.
#[must_use]
pub fn stamped_mark(bytes: &[u8]) -> Option<u8> {
    bytes.get(INDEX_BYTES).copied()
}

/// How the views of a source are laid out in its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewLayout {
    /// One untagged view.
    Mono,
    /// Tagged left then right.
    Stereo,
    /// Tagged right then left.
    StereoRightFirst,
    /// Tagged, but the right view never arrives.
    MissingRight,
}

/// Description of a generated clip.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    pub width: u32,
    pub height: u32,
    /// Declared frame rate; non-positive values decode at the default rate.
    pub fps: f64,
    pub duration_secs: f64,
    pub layout: ViewLayout,
    pub has_video: bool,
    pub has_audio: bool,
    pub audio_ready: bool,
    pub reject_output: bool,
    pub fail_start: bool,
    /// Added to every presentation time.
    pub pts_offset_secs: f64,
    /// Every n-th pull reports no sample yet. Zero disables stalls.
    pub stall_every: u64,
    pub projection: Projection,
    pub horizontal_fov_degrees: Option<f32>,
    pub color_primaries: ColorPrimaries,
}

impl SyntheticSource {
    fn with_layout(width: u32, height: u32, fps: f64, duration_secs: f64, layout: ViewLayout) -> Self {
        let spatial = layout != ViewLayout::Mono;
        Self {
            width,
            height,
            fps,
            duration_secs,
            layout,
            has_video: true,
            has_audio: true,
            audio_ready: true,
            reject_output: false,
            fail_start: false,
            pts_offset_secs: 0.0,
            stall_every: 0,
            projection: if spatial {
                Projection::HalfEquirectangular
            } else {
                Projection::Rectilinear
            },
            horizontal_fov_degrees: spatial.then_some(90.0),
            color_primaries: ColorPrimaries::Bt709,
        }
    }

    /// A spatial clip with both eyes tagged.
    #[must_use]
    pub fn stereo(width: u32, height: u32, fps: f64, duration_secs: f64) -> Self {
        Self::with_layout(width, height, fps, duration_secs, ViewLayout::Stereo)
    }

    /// A conventional single-view clip.
    #[must_use]
    pub fn mono(width: u32, height: u32, fps: f64, duration_secs: f64) -> Self {
        Self::with_layout(width, height, fps, duration_secs, ViewLayout::Mono)
    }

    #[must_use]
    pub fn right_eye_first(mut self) -> Self {
        self.layout = ViewLayout::StereoRightFirst;
        self
    }

    #[must_use]
    pub fn missing_right_eye(mut self) -> Self {
        self.layout = ViewLayout::MissingRight;
        self
    }

    #[must_use]
    pub fn rejecting_output(mut self) -> Self {
        self.reject_output = true;
        self
    }

    #[must_use]
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    #[must_use]
    pub fn with_pts_offset(mut self, secs: f64) -> Self {
        self.pts_offset_secs = secs;
        self
    }

    #[must_use]
    pub fn stalling_every(mut self, pulls: u64) -> Self {
        self.stall_every = pulls;
        self
    }

    #[must_use]
    pub fn without_video(mut self) -> Self {
        self.has_video = false;
        self
    }

    #[must_use]
    pub fn without_audio(mut self) -> Self {
        self.has_audio = false;
        self
    }

    /// Audio transport reports not ready until told otherwise.
    #[must_use]
    pub fn with_unready_audio(mut self) -> Self {
        self.audio_ready = false;
        self
    }

    #[must_use]
    pub fn with_primaries(mut self, primaries: ColorPrimaries) -> Self {
        self.color_primaries = primaries;
        self
    }

    /// Metadata as a container would report it.
    #[must_use]
    pub fn probe(&self) -> SourceProbe {
        SourceProbe {
            width: self.width,
            height: self.height,
            nominal_frame_rate: self.fps,
            duration_secs: self.duration_secs,
            is_spatial: self.layout != ViewLayout::Mono,
            projection: self.projection,
            horizontal_fov_degrees: self.horizontal_fov_degrees,
            color_primaries: self.color_primaries,
        }
    }

    fn decode_rate(&self) -> f64 {
        FrameRate::new(self.fps).value()
    }

    fn frame_count(&self) -> u64 {
        let frames = (self.duration_secs.max(0.0) * self.decode_rate() + 1e-9).floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = frames as u64;
        frames
    }

    fn first_index_at(&self, start_secs: f64) -> u64 {
        let index = ((start_secs - self.pts_offset_secs) * self.decode_rate() - 1e-9).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = index.max(0.0) as u64;
        index
    }

    #[allow(clippy::cast_precision_loss)]
    fn pts_of(&self, index: u64) -> f64 {
        self.pts_offset_secs + index as f64 / self.decode_rate()
    }

    fn buffer(&self, format: PixelFormat, index: u64, mark: u8) -> Arc<PixelBuffer> {
        let planes = (0..format.plane_count())
            .map(|plane| {
                let (width, height) = format.plane_dimensions(plane, self.width, self.height);
                let bpp = format.bytes_per_pixel(plane);
                let len = width as usize * height as usize * bpp;
                let mut data = vec![if plane == 0 { mark } else { CHROMA_FILL }; len];
                if plane == 0 && len >= INDEX_BYTES {
                    data[..INDEX_BYTES].copy_from_slice(bytemuck::bytes_of(&index));
                }
                PixelPlane::packed(width, height, bpp, data.into())
            })
            .collect();
        Arc::new(PixelBuffer::new(self.width, self.height, format, planes))
    }

    fn sample(&self, settings: &OutputSettings, index: u64) -> FrameSample {
        let format = settings.pixel_format;
        let layered = settings.layer_ids.contains(&1);
        let image = match self.layout {
            ViewLayout::Mono => FrameImage::Single(self.buffer(format, index, MONO_MARK)),
            _ if !layered => FrameImage::Single(self.buffer(format, index, LEFT_MARK)),
            layout => {
                let view = |eye: Eye, layer: u32, mark: u8| {
                    TaggedBuffer::new(
                        vec![BufferTag::VideoLayer(layer), BufferTag::StereoView(eye)],
                        self.buffer(format, index, mark),
                    )
                };
                let left = view(Eye::Left, 0, LEFT_MARK);
                let right = view(Eye::Right, 1, RIGHT_MARK);
                FrameImage::Tagged(match layout {
                    ViewLayout::StereoRightFirst => vec![right, left],
                    ViewLayout::MissingRight => vec![left],
                    _ => vec![left, right],
                })
            }
        };
        FrameSample::new(self.pts_of(index), image)
    }
}

#[derive(Debug, Default)]
struct ReaderCounters {
    started: AtomicUsize,
    cancelled: AtomicUsize,
    completed: AtomicUsize,
}

struct SyntheticReader {
    source: SyntheticSource,
    settings: Option<OutputSettings>,
    range: TimeRange,
    next_index: u64,
    pulls: u64,
    status: ReaderStatus,
    counters: Arc<ReaderCounters>,
}

impl SyntheticReader {
    fn finish(&mut self, status: ReaderStatus) {
        if self.status == ReaderStatus::Reading {
            let counter = match status {
                ReaderStatus::Completed => &self.counters.completed,
                _ => &self.counters.cancelled,
            };
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.status = status;
    }
}

impl TrackReader for SyntheticReader {
    fn attach_output(&mut self, settings: &OutputSettings) -> bool {
        if self.source.reject_output || self.status != ReaderStatus::NotStarted {
            return false;
        }
        self.settings = Some(settings.clone());
        true
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.range = range;
    }

    fn start_reading(&mut self) -> bool {
        if self.source.fail_start
            || self.settings.is_none()
            || self.status != ReaderStatus::NotStarted
        {
            self.status = ReaderStatus::Failed;
            return false;
        }
        self.next_index = self.source.first_index_at(self.range.start_secs);
        self.status = ReaderStatus::Reading;
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn status(&self) -> ReaderStatus {
        self.status
    }

    fn copy_next_sample(&mut self) -> Option<FrameSample> {
        if self.status != ReaderStatus::Reading {
            return None;
        }
        self.pulls += 1;
        if self.source.stall_every > 0 && self.pulls % self.source.stall_every == 0 {
            return None;
        }
        if self.next_index >= self.source.frame_count() {
            self.finish(ReaderStatus::Completed);
            return None;
        }

        let settings = self.settings.as_ref()?;
        let sample = self.source.sample(settings, self.next_index);
        self.next_index += 1;
        Some(sample)
    }

    fn cancel_reading(&mut self) {
        if matches!(self.status, ReaderStatus::Reading | ReaderStatus::NotStarted) {
            self.finish(ReaderStatus::Cancelled);
        }
    }
}

/// In-memory [`MediaBackend`] serving [`SyntheticSource`] clips by name.
#[derive(Default)]
pub struct SyntheticBackend {
    sources: RwLock<HashMap<String, SyntheticSource>>,
    counters: Arc<ReaderCounters>,
    transports: Mutex<Vec<Arc<ClockTransport>>>,
    realtime: bool,
}

impl std::fmt::Debug for SyntheticBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticBackend")
            .field("realtime", &self.realtime)
            .field("active_readers", &self.active_readers())
            .finish_non_exhaustive()
    }
}

impl SyntheticBackend {
    /// Creates a backend whose audio clocks are advanced manually.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend whose audio clocks follow wall time.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            ..Self::default()
        }
    }

    /// Registers `source` under `name` and returns its locator.
    pub fn register(&self, name: &str, source: SyntheticSource) -> SourceLocator {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), source);
        SourceLocator::new(name)
    }

    /// Most recently created audio transport.
    #[must_use]
    pub fn transport(&self) -> Option<Arc<ClockTransport>> {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Readers cancelled while reading.
    #[must_use]
    pub fn cancelled_readers(&self) -> usize {
        self.counters.cancelled.load(Ordering::SeqCst)
    }

    /// Readers currently reading.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        let started = self.counters.started.load(Ordering::SeqCst);
        let ended = self.counters.cancelled.load(Ordering::SeqCst)
            + self.counters.completed.load(Ordering::SeqCst);
        started.saturating_sub(ended)
    }

    #[must_use]
    pub fn started_readers(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    fn lookup(&self, locator: &SourceLocator) -> Result<SyntheticSource, SessionError> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator.as_str())
            .cloned()
            .ok_or_else(|| SessionError::SourceUnreadable(locator.to_string()))
    }
}

impl MediaBackend for SyntheticBackend {
    fn probe(&self, locator: &SourceLocator) -> Result<SourceProbe, SessionError> {
        let source = self.lookup(locator)?;
        if !source.has_video {
            return Err(SessionError::NoVideoTrack);
        }
        Ok(source.probe())
    }

    fn create_reader(&self, locator: &SourceLocator) -> Result<Box<dyn TrackReader>, SessionError> {
        let source = self.lookup(locator)?;
        if !source.has_video {
            return Err(SessionError::NoVideoTrack);
        }
        Ok(Box::new(SyntheticReader {
            source,
            settings: None,
            range: TimeRange::FULL,
            next_index: 0,
            pulls: 0,
            status: ReaderStatus::NotStarted,
            counters: self.counters.clone(),
        }))
    }

    fn create_audio_transport(
        &self,
        locator: &SourceLocator,
        context: &PresentationContext,
    ) -> Result<Arc<dyn AudioTransport>, SessionError> {
        let source = self.lookup(locator)?;
        if !source.has_audio {
            return Err(SessionError::NoAudioTrack);
        }

        let transport = Arc::new(ClockTransport::new(source.duration_secs));
        transport.set_ready(source.audio_ready);
        if self.realtime {
            transport
                .start_realtime()
                .map_err(|e| SessionError::Decode(format!("audio clock: {e}")))?;
        }
        log::debug!(
            "audio transport for {} (stream {:?}, scene anchored: {})",
            locator,
            context.stream_id,
            context.anchor_audio_to_scene
        );

        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport.clone());
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::video::{ColorDescription, TransferFunction};
    use crate::test_utils::assert_abs_diff_eq;

    fn settings(format: PixelFormat, layers: Vec<u32>) -> OutputSettings {
        OutputSettings {
            layer_ids: layers,
            color: ColorDescription::for_primaries(ColorPrimaries::Bt709),
            pixel_format: format,
            gpu_compatible: true,
        }
    }

    fn started(backend: &SyntheticBackend, name: &str, source: SyntheticSource) -> Box<dyn TrackReader> {
        let locator = backend.register(name, source);
        let mut reader = backend.create_reader(&locator).expect("reader");
        assert!(reader.attach_output(&settings(PixelFormat::Bgra8, vec![0, 1])));
        assert!(reader.start_reading());
        reader
    }

    #[test]
    fn zero_fps_clips_decode_at_default_rate() {
        let backend = SyntheticBackend::new();
        let mut reader = started(&backend, "z", SyntheticSource::stereo(8, 8, 0.0, 1.0));

        reader.copy_next_sample().expect("first");
        let second = reader.copy_next_sample().expect("second");
        assert_abs_diff_eq!(second.pts_secs, 1.0 / 30.0, epsilon = 1e-12);
    }

    #[test]
    fn frames_are_stamped_with_index_and_eye() {
        let backend = SyntheticBackend::new();
        let mut reader = started(&backend, "s", SyntheticSource::stereo(8, 8, 30.0, 1.0));
        reader.copy_next_sample();
        let sample = reader.copy_next_sample().expect("sample");

        let FrameImage::Tagged(views) = sample.image else {
            panic!("expected tagged views");
        };
        let right = views
            .iter()
            .find(|view| view.stereo_view() == Some(Eye::Right))
            .expect("right view");
        let bytes = &right.buffer.planes()[0].data;
        assert_eq!(stamped_index(bytes), Some(1));
        assert_eq!(stamped_mark(bytes), Some(RIGHT_MARK));
    }

    #[test]
    fn base_layer_only_yields_single_view() {
        let backend = SyntheticBackend::new();
        let locator = backend.register("s", SyntheticSource::stereo(8, 8, 30.0, 1.0));
        let mut reader = backend.create_reader(&locator).expect("reader");
        reader.attach_output(&settings(PixelFormat::Bgra8, Vec::new()));
        reader.start_reading();

        let sample = reader.copy_next_sample().expect("sample");
        assert!(matches!(sample.image, FrameImage::Single(_)));
    }

    #[test]
    fn planar_output_has_half_size_chroma() {
        let backend = SyntheticBackend::new();
        let locator = backend.register("p", SyntheticSource::mono(6, 4, 30.0, 1.0));
        let mut reader = backend.create_reader(&locator).expect("reader");
        reader.attach_output(&settings(PixelFormat::Ycbcr420, Vec::new()));
        reader.start_reading();

        let FrameImage::Single(buffer) = reader.copy_next_sample().expect("sample").image else {
            panic!("expected single view");
        };
        assert_eq!(buffer.planes().len(), 2);
        assert_eq!((buffer.planes()[1].width, buffer.planes()[1].height), (3, 2));
    }

    #[test]
    fn reader_completes_after_last_frame() {
        let backend = SyntheticBackend::new();
        let mut reader = started(&backend, "m", SyntheticSource::mono(8, 8, 10.0, 0.3));

        let mut frames = 0;
        while reader.copy_next_sample().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 3);
        assert_eq!(reader.status(), ReaderStatus::Completed);
        assert_eq!(backend.active_readers(), 0);
    }

    #[test]
    fn missing_tracks_are_reported() {
        let backend = SyntheticBackend::new();
        let silent = backend.register("silent", SyntheticSource::mono(8, 8, 30.0, 1.0).without_audio());
        let blank = backend.register("blank", SyntheticSource::mono(8, 8, 30.0, 1.0).without_video());

        assert!(matches!(
            backend.create_audio_transport(&silent, &PresentationContext::default()),
            Err(SessionError::NoAudioTrack)
        ));
        assert!(matches!(backend.probe(&blank), Err(SessionError::NoVideoTrack)));
    }

    #[test]
    fn transport_tracks_source_readiness() {
        let backend = SyntheticBackend::new();
        let locator = backend.register("a", SyntheticSource::mono(8, 8, 30.0, 1.0).with_unready_audio());
        let transport = backend
            .create_audio_transport(&locator, &PresentationContext::default())
            .expect("transport");

        assert!(!transport.is_ready());
        assert!(backend.transport().is_some());
    }

    #[test]
    fn bt2020_sources_probe_as_bt2020() {
        let source = SyntheticSource::stereo(8, 8, 30.0, 1.0).with_primaries(ColorPrimaries::Bt2020);
        let info = source.probe().into_info(30.0);
        assert_eq!(info.output_color().transfer, TransferFunction::Linear);
    }
}
