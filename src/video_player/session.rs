// SPDX-License-Identifier: MPL-2.0
//! Decode sessions.
//!
//! A [`DecodeSession`] owns one started track reader over a source's video
//! track and hands out frames one pull at a time. Sessions are single-use:
//! seeking opens a new session at the target time and the old one is
//! cancelled. Attach or start failures are terminal; nothing is retried.

use std::sync::Arc;

use crate::application::port::{
    MediaBackend, OutputSettings, ReaderStatus, SourceLocator, TimeRange, TrackReader,
};
use crate::domain::video::{FrameSample, PixelFormat, VideoInfo};
use crate::error::SessionError;

/// Result of a single pull from a session.
#[derive(Debug, Clone)]
pub enum NextFrame {
    /// A decoded frame.
    Frame(FrameSample),
    /// No frame is ready yet; try again on a later tick.
    Underrun,
    /// The track has been fully read.
    EndOfStream,
}

/// A started reader over one source's video track.
pub struct DecodeSession {
    reader: Box<dyn TrackReader>,
    locator: SourceLocator,
    info: Arc<VideoInfo>,
    settings: OutputSettings,
    time_range: TimeRange,
    status: ReaderStatus,
    last_pts: Option<f64>,
}

impl std::fmt::Debug for DecodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeSession")
            .field("locator", &self.locator)
            .field("time_range", &self.time_range)
            .field("status", &self.status)
            .field("last_pts", &self.last_pts)
            .finish_non_exhaustive()
    }
}

impl DecodeSession {
    /// Opens a session over the whole track.
    ///
    /// # Errors
    ///
    /// See [`DecodeSession::open_at_time`].
    pub fn open(
        backend: &dyn MediaBackend,
        locator: &SourceLocator,
        info: Arc<VideoInfo>,
        pixel_format: PixelFormat,
    ) -> Result<Self, SessionError> {
        Self::open_at_time(backend, locator, info, pixel_format, TimeRange::FULL.start_secs)
    }

    /// Opens a session whose first frame is the first one at or after `start_secs`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SourceUnreadable`] / [`SessionError::NoVideoTrack`] from the backend
    /// - [`SessionError::CannotAttachOutput`] if the reader refuses the output settings
    /// - [`SessionError::CannotStartReading`] if the reader will not start
    pub fn open_at_time(
        backend: &dyn MediaBackend,
        locator: &SourceLocator,
        info: Arc<VideoInfo>,
        pixel_format: PixelFormat,
        start_secs: f64,
    ) -> Result<Self, SessionError> {
        let settings = OutputSettings::for_video(&info, pixel_format);
        let time_range = TimeRange::starting_at(start_secs);

        let mut reader = backend.create_reader(locator)?;
        if !reader.attach_output(&settings) {
            log::warn!("{}: reader refused output settings {:?}", locator, settings);
            return Err(SessionError::CannotAttachOutput);
        }
        reader.set_time_range(time_range);
        if !reader.start_reading() {
            log::warn!("{}: reader failed to start at {:.3}s", locator, time_range.start_secs);
            return Err(SessionError::CannotStartReading);
        }

        log::debug!(
            "{}: session reading from {:.3}s ({:?})",
            locator,
            time_range.start_secs,
            settings.pixel_format
        );

        Ok(Self {
            reader,
            locator: locator.clone(),
            info,
            settings,
            time_range,
            status: ReaderStatus::Reading,
            last_pts: None,
        })
    }

    /// Pulls the next frame.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Cancelled`] after [`DecodeSession::cancel`]
    /// - [`SessionError::Decode`] when the reader fails mid-stream
    pub fn next_frame(&mut self) -> Result<NextFrame, SessionError> {
        match self.status {
            ReaderStatus::Reading => {}
            ReaderStatus::Completed => return Ok(NextFrame::EndOfStream),
            ReaderStatus::Cancelled => return Err(SessionError::Cancelled),
            ReaderStatus::Failed => {
                return Err(SessionError::Decode(format!("{} reader failed", self.locator)))
            }
            ReaderStatus::NotStarted => return Ok(NextFrame::Underrun),
        }

        if let Some(frame) = self.reader.copy_next_sample() {
            if let Some(last) = self.last_pts {
                if frame.pts_secs < last {
                    log::warn!(
                        "{}: non-monotonic pts {:.4} after {:.4}",
                        self.locator,
                        frame.pts_secs,
                        last
                    );
                }
            }
            self.last_pts = Some(frame.pts_secs);
            return Ok(NextFrame::Frame(frame));
        }

        match self.reader.status() {
            ReaderStatus::Completed => {
                self.status = ReaderStatus::Completed;
                Ok(NextFrame::EndOfStream)
            }
            ReaderStatus::Failed => {
                self.status = ReaderStatus::Failed;
                Err(SessionError::Decode(format!("{} reader failed", self.locator)))
            }
            ReaderStatus::Cancelled => {
                self.status = ReaderStatus::Cancelled;
                Err(SessionError::Cancelled)
            }
            ReaderStatus::Reading | ReaderStatus::NotStarted => Ok(NextFrame::Underrun),
        }
    }

    /// Stops decoding. Subsequent pulls fail with [`SessionError::Cancelled`].
    pub fn cancel(&mut self) {
        if matches!(self.status, ReaderStatus::Reading | ReaderStatus::NotStarted) {
            self.reader.cancel_reading();
            self.status = ReaderStatus::Cancelled;
            log::debug!("{}: session cancelled", self.locator);
        }
    }

    #[must_use]
    pub fn status(&self) -> ReaderStatus {
        self.status
    }

    #[must_use]
    pub fn info(&self) -> &Arc<VideoInfo> {
        &self.info
    }

    #[must_use]
    pub fn settings(&self) -> &OutputSettings {
        &self.settings
    }

    #[must_use]
    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    #[must_use]
    pub fn locator(&self) -> &SourceLocator {
        &self.locator
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::synthetic::{SyntheticBackend, SyntheticSource};
    use crate::test_utils::assert_abs_diff_eq;

    fn backend_with(source: SyntheticSource) -> (SyntheticBackend, SourceLocator, Arc<VideoInfo>) {
        let backend = SyntheticBackend::new();
        let locator = backend.register("clip", source);
        let info = Arc::new(
            backend
                .probe(&locator)
                .expect("probe succeeds")
                .into_info(30.0),
        );
        (backend, locator, info)
    }

    fn pull_frame(session: &mut DecodeSession) -> FrameSample {
        match session.next_frame().expect("pull succeeds") {
            NextFrame::Frame(frame) => frame,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn open_reads_from_the_first_frame() {
        let (backend, locator, info) = backend_with(SyntheticSource::stereo(64, 32, 30.0, 1.0));
        let mut session =
            DecodeSession::open(&backend, &locator, info, PixelFormat::Bgra8).expect("opens");

        assert_eq!(session.status(), ReaderStatus::Reading);
        assert_abs_diff_eq!(pull_frame(&mut session).pts_secs, 0.0);
    }

    #[test]
    fn open_at_time_starts_at_first_frame_at_or_after_target() {
        let (backend, locator, info) = backend_with(SyntheticSource::stereo(64, 32, 10.0, 5.0));
        let mut session =
            DecodeSession::open_at_time(&backend, &locator, info, PixelFormat::Bgra8, 2.05)
                .expect("opens");

        assert_abs_diff_eq!(pull_frame(&mut session).pts_secs, 2.1, epsilon = 1e-9);
        assert_abs_diff_eq!(session.time_range().start_secs, 2.05);
    }

    #[test]
    fn end_of_stream_completes_the_session() {
        let (backend, locator, info) = backend_with(SyntheticSource::mono(16, 16, 10.0, 0.2));
        let mut session =
            DecodeSession::open(&backend, &locator, info, PixelFormat::Bgra8).expect("opens");

        pull_frame(&mut session);
        pull_frame(&mut session);
        assert!(matches!(
            session.next_frame(),
            Ok(NextFrame::EndOfStream)
        ));
        assert_eq!(session.status(), ReaderStatus::Completed);
    }

    #[test]
    fn refused_output_is_terminal() {
        let (backend, locator, info) =
            backend_with(SyntheticSource::stereo(64, 32, 30.0, 1.0).rejecting_output());
        let result = DecodeSession::open(&backend, &locator, info, PixelFormat::RgbaHalf);
        assert!(matches!(result, Err(SessionError::CannotAttachOutput)));
    }

    #[test]
    fn failed_start_is_terminal() {
        let (backend, locator, info) =
            backend_with(SyntheticSource::stereo(64, 32, 30.0, 1.0).failing_start());
        let result = DecodeSession::open(&backend, &locator, info, PixelFormat::Bgra8);
        assert!(matches!(result, Err(SessionError::CannotStartReading)));
    }

    #[test]
    fn cancelled_session_refuses_pulls() {
        let (backend, locator, info) = backend_with(SyntheticSource::stereo(64, 32, 30.0, 1.0));
        let mut session =
            DecodeSession::open(&backend, &locator, info, PixelFormat::Bgra8).expect("opens");

        session.cancel();
        assert!(matches!(session.next_frame(), Err(SessionError::Cancelled)));
    }

    #[test]
    fn unknown_locator_is_unreadable() {
        let backend = SyntheticBackend::new();
        let info = Arc::new(SyntheticSource::mono(8, 8, 30.0, 1.0).probe().into_info(30.0));
        let result = DecodeSession::open(
            &backend,
            &SourceLocator::new("missing"),
            info,
            PixelFormat::Bgra8,
        );
        assert!(matches!(result, Err(SessionError::SourceUnreadable(_))));
    }
}
