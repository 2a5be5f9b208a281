// SPDX-License-Identifier: MPL-2.0
//! `FFmpeg` adapter implementing the [`MediaBackend`] port trait.
//!
//! Locators are file paths. Video is decoded in software and converted to
//! the requested pixel format by the `FFmpeg` scaler. Half-float output is
//! scaled to 16-bit RGBA and each channel is re-encoded as an IEEE half.
//!
//! Side-by-side stereo files (Matroska `stereo_mode` tag) are treated as
//! spatial: each decoded frame is split into a left and a right view and
//! delivered as tagged buffers. Everything else is delivered as one view.
//!
//! No audio device is opened. The audio transport is a realtime
//! [`ClockTransport`] spanning the file's duration.
//!
//! [`MediaBackend`]: crate::application::port::MediaBackend

use std::path::PathBuf;
use std::sync::{Arc, Once};

use crate::application::port::{
    AudioTransport, MediaBackend, OutputSettings, PresentationContext, ReaderStatus,
    SourceLocator, SourceProbe, TimeRange, TrackReader,
};
use crate::domain::video::{
    BufferTag, ColorPrimaries, Eye, FrameImage, FrameSample, PixelBuffer, PixelFormat,
    PixelPlane, Projection, TaggedBuffer,
};
use crate::error::SessionError;
use crate::infrastructure::clock::ClockTransport;

static FFMPEG_INIT: Once = Once::new();

/// Initializes `FFmpeg` once per process.
///
/// # Errors
///
/// Returns [`SessionError::Decode`] if `FFmpeg` fails to initialize.
pub fn init_ffmpeg() -> Result<(), SessionError> {
    let mut init_result = Ok(());

    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            init_result = Err(SessionError::Decode(format!(
                "FFmpeg initialization failed: {e}"
            )));
            return;
        }

        // SAFETY: av_log_set_level is thread-safe and only affects logging
        unsafe {
            ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_ERROR);
        }
    });

    init_result
}

const SIDE_BY_SIDE_MODES: [&str; 3] = ["left_right", "right_left", "side_by_side"];

fn open_input(locator: &SourceLocator) -> Result<ffmpeg_next::format::context::Input, SessionError> {
    init_ffmpeg()?;
    ffmpeg_next::format::input(&PathBuf::from(locator.as_str()))
        .map_err(|e| SessionError::SourceUnreadable(format!("{locator}: {e}")))
}

fn is_side_by_side(stream: &ffmpeg_next::format::stream::Stream<'_>) -> bool {
    stream
        .metadata()
        .get("stereo_mode")
        .is_some_and(|mode| SIDE_BY_SIDE_MODES.contains(&mode))
}

fn output_pixel(format: PixelFormat) -> Option<ffmpeg_next::format::Pixel> {
    match format {
        PixelFormat::Bgra8 => Some(ffmpeg_next::format::Pixel::BGRA),
        PixelFormat::Ycbcr420 => Some(ffmpeg_next::format::Pixel::NV12),
        PixelFormat::Ycbcr420TenBit => Some(ffmpeg_next::format::Pixel::P010LE),
        PixelFormat::RgbaHalf => Some(ffmpeg_next::format::Pixel::RGBA64LE),
    }
}

/// Encodes a normalized 16-bit channel as IEEE 754 half-precision bits.
fn unorm16_to_f16(value: u16) -> u16 {
    let x = f32::from(value) / f32::from(u16::MAX);
    // Below 2^-14 the half is subnormal: a plain multiple of 2^-24.
    if x < 1.0 / 16_384.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        return (x * 16_777_216.0).round() as u16;
    }
    let bits = x.to_bits();
    let exponent = (bits >> 23) & 0xff;
    let mantissa = bits & 0x007f_ffff;
    // Round to nearest; a mantissa carry bumps the exponent.
    #[allow(clippy::cast_possible_truncation)]
    let half = (((exponent - 112) << 10) + ((mantissa + 0x1000) >> 13)) as u16;
    half
}

/// Re-encodes little-endian 16-bit channels in place as half floats.
fn encode_half_floats(bytes: &mut [u8]) {
    for channel in bytes.chunks_exact_mut(2) {
        let half = unorm16_to_f16(u16::from_le_bytes([channel[0], channel[1]]));
        channel.copy_from_slice(&half.to_le_bytes());
    }
}

/// File-backed [`MediaBackend`] decoding with `FFmpeg`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    fn probe(&self, locator: &SourceLocator) -> Result<SourceProbe, SessionError> {
        let input = open_input(locator)?;
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(SessionError::NoVideoTrack)?;

        let rate = stream.avg_frame_rate();
        let nominal_frame_rate = if rate.denominator() != 0 {
            f64::from(rate.numerator()) / f64::from(rate.denominator())
        } else {
            0.0
        };

        #[allow(clippy::cast_precision_loss)]
        let duration_secs = if input.duration() > 0 {
            input.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
        } else {
            0.0
        };

        let decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| SessionError::Decode(format!("Failed to create video decoder: {e}")))?;

        let side_by_side = is_side_by_side(&stream);
        let color_primaries = match decoder.color_primaries() {
            ffmpeg_next::color::Primaries::BT2020 => ColorPrimaries::Bt2020,
            ffmpeg_next::color::Primaries::BT709 => ColorPrimaries::Bt709,
            ffmpeg_next::color::Primaries::SMPTE432 => ColorPrimaries::DisplayP3,
            _ => ColorPrimaries::Unspecified,
        };

        Ok(SourceProbe {
            width: if side_by_side {
                decoder.width() / 2
            } else {
                decoder.width()
            },
            height: decoder.height(),
            nominal_frame_rate,
            duration_secs,
            is_spatial: side_by_side,
            projection: Projection::Rectilinear,
            horizontal_fov_degrees: None,
            color_primaries,
        })
    }

    fn create_reader(&self, locator: &SourceLocator) -> Result<Box<dyn TrackReader>, SessionError> {
        Ok(Box::new(FfmpegReader {
            locator: locator.clone(),
            settings: None,
            range: TimeRange::FULL,
            status: ReaderStatus::NotStarted,
            state: None,
        }))
    }

    fn create_audio_transport(
        &self,
        locator: &SourceLocator,
        context: &PresentationContext,
    ) -> Result<Arc<dyn AudioTransport>, SessionError> {
        let input = open_input(locator)?;
        if input
            .streams()
            .best(ffmpeg_next::media::Type::Audio)
            .is_none()
        {
            return Err(SessionError::NoAudioTrack);
        }

        #[allow(clippy::cast_precision_loss)]
        let duration_secs =
            input.duration().max(0) as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE);
        let transport = Arc::new(ClockTransport::new(duration_secs));
        transport
            .start_realtime()
            .map_err(|e| SessionError::Decode(format!("audio clock: {e}")))?;
        log::debug!(
            "audio clock for {} ({:.2}s, stream {:?}, scene anchored: {})",
            locator,
            duration_secs,
            context.stream_id,
            context.anchor_audio_to_scene
        );
        Ok(transport)
    }
}

/// Decoder contexts of a reading session.
struct ReaderState {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    video_stream_index: usize,
    time_base_f64: f64,
    side_by_side: bool,
    eof_sent: bool,
}

// SAFETY: ReaderState contains FFmpeg types with internal raw pointers.
// These are safe to send between threads because:
// 1. Each context is owned by exactly one reader and never shared
// 2. Readers are only used from one thread at a time (`&mut self` access)
unsafe impl Send for ReaderState {}

struct FfmpegReader {
    locator: SourceLocator,
    settings: Option<OutputSettings>,
    range: TimeRange,
    status: ReaderStatus,
    state: Option<ReaderState>,
}

impl FfmpegReader {
    fn open_state(&self, settings: &OutputSettings) -> Result<ReaderState, SessionError> {
        let mut input = open_input(&self.locator)?;
        let (video_stream_index, time_base_f64, side_by_side, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or(SessionError::NoVideoTrack)?;
            let time_base = stream.time_base();
            (
                stream.index(),
                f64::from(time_base.numerator()) / f64::from(time_base.denominator()),
                is_side_by_side(&stream),
                stream.parameters(),
            )
        };

        let decoder = ffmpeg_next::codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .map_err(|e| SessionError::Decode(format!("Failed to create video decoder: {e}")))?;

        let target = output_pixel(settings.pixel_format).ok_or_else(|| {
            SessionError::Decode(format!("unsupported output {:?}", settings.pixel_format))
        })?;
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            target,
            decoder.width(),
            decoder.height(),
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| SessionError::Decode(format!("Failed to create scaler: {e}")))?;

        if self.range.start_secs > 0.0 {
            #[allow(clippy::cast_possible_truncation)]
            let timestamp = (self.range.start_secs * f64::from(ffmpeg_next::ffi::AV_TIME_BASE)) as i64;
            input
                .seek(timestamp, ..timestamp)
                .map_err(|e| SessionError::Decode(format!("Seek failed: {e}")))?;
        }

        Ok(ReaderState {
            input,
            decoder,
            scaler,
            video_stream_index,
            time_base_f64,
            side_by_side,
            eof_sent: false,
        })
    }

    /// Decodes the next frame at or after the range start.
    fn decode_next(&mut self) -> Result<Option<FrameSample>, SessionError> {
        let (Some(state), Some(settings)) = (self.state.as_mut(), self.settings.as_ref()) else {
            return Ok(None);
        };
        let mut decoded = ffmpeg_next::frame::Video::empty();

        loop {
            if state.decoder.receive_frame(&mut decoded).is_ok() {
                #[allow(clippy::cast_precision_loss)]
                let pts = decoded
                    .timestamp()
                    .map_or(0.0, |ts| ts as f64 * state.time_base_f64);
                // Frames before the target decode from the preceding keyframe.
                if pts + 1e-6 < self.range.start_secs {
                    continue;
                }
                return convert(state, &decoded, settings.pixel_format, pts).map(Some);
            }

            if state.eof_sent {
                return Ok(None);
            }

            let index = state.video_stream_index;
            let packet = state
                .input
                .packets()
                .find(|(stream, _)| stream.index() == index)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => state
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| SessionError::Decode(format!("Packet send failed: {e}")))?,
                None => {
                    state
                        .decoder
                        .send_eof()
                        .map_err(|e| SessionError::Decode(format!("Flush failed: {e}")))?;
                    state.eof_sent = true;
                }
            }
        }
    }
}

fn convert(
    state: &mut ReaderState,
    decoded: &ffmpeg_next::frame::Video,
    format: PixelFormat,
    pts: f64,
) -> Result<FrameSample, SessionError> {
    let mut scaled = ffmpeg_next::frame::Video::empty();
    state
        .scaler
        .run(decoded, &mut scaled)
        .map_err(|e| SessionError::Decode(format!("Scaling failed: {e}")))?;

    let width = scaled.width();
    let height = scaled.height();
    let image = if state.side_by_side {
        let eye_width = width / 2;
        let view = |eye: Eye, layer: u32, x: u32| {
            TaggedBuffer::new(
                vec![BufferTag::VideoLayer(layer), BufferTag::StereoView(eye)],
                Arc::new(crop(&scaled, format, x, eye_width, height)),
            )
        };
        FrameImage::Tagged(vec![view(Eye::Left, 0, 0), view(Eye::Right, 1, eye_width)])
    } else {
        FrameImage::Single(Arc::new(crop(&scaled, format, 0, width, height)))
    };
    Ok(FrameSample::new(pts, image))
}

/// Copies the `x..x + width` columns of a scaled frame into tightly packed planes.
fn crop(frame: &ffmpeg_next::frame::Video, format: PixelFormat, x: u32, width: u32, height: u32) -> PixelBuffer {
    let planes = (0..format.plane_count())
        .map(|plane| {
            let (plane_width, plane_height) = format.plane_dimensions(plane, width, height);
            let (plane_x, _) = format.plane_dimensions(plane, x, 0);
            let bpp = format.bytes_per_pixel(plane);
            let stride = frame.stride(plane);
            let data = frame.data(plane);
            let row_len = plane_width as usize * bpp;

            let mut bytes = Vec::with_capacity(row_len * plane_height as usize);
            for y in 0..plane_height as usize {
                let start = y * stride + plane_x as usize * bpp;
                if let Some(row) = data.get(start..start + row_len) {
                    bytes.extend_from_slice(row);
                }
            }
            if format == PixelFormat::RgbaHalf {
                encode_half_floats(&mut bytes);
            }
            PixelPlane::packed(plane_width, plane_height, bpp, bytes.into())
        })
        .collect();
    PixelBuffer::new(width, height, format, planes)
}

impl TrackReader for FfmpegReader {
    fn attach_output(&mut self, settings: &OutputSettings) -> bool {
        if self.status != ReaderStatus::NotStarted || output_pixel(settings.pixel_format).is_none() {
            return false;
        }
        self.settings = Some(settings.clone());
        true
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.range = range;
    }

    fn start_reading(&mut self) -> bool {
        let Some(settings) = self.settings.as_ref() else {
            return false;
        };
        match self.open_state(settings) {
            Ok(state) => {
                self.state = Some(state);
                self.status = ReaderStatus::Reading;
                true
            }
            Err(e) => {
                log::warn!("cannot start reading {}: {}", self.locator, e);
                self.status = ReaderStatus::Failed;
                false
            }
        }
    }

    fn status(&self) -> ReaderStatus {
        self.status
    }

    fn copy_next_sample(&mut self) -> Option<FrameSample> {
        if self.status != ReaderStatus::Reading {
            return None;
        }
        match self.decode_next() {
            Ok(Some(sample)) => Some(sample),
            Ok(None) => {
                self.status = ReaderStatus::Completed;
                self.state = None;
                None
            }
            Err(e) => {
                log::warn!("decoding {} failed: {}", self.locator, e);
                self.status = ReaderStatus::Failed;
                self.state = None;
                None
            }
        }
    }

    fn cancel_reading(&mut self) {
        if matches!(self.status, ReaderStatus::Reading | ReaderStatus::NotStarted) {
            self.status = ReaderStatus::Cancelled;
            self.state = None;
        }
    }
}
