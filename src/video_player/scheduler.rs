// SPDX-License-Identifier: MPL-2.0
//! Tick-driven frame scheduling for the primary and secondary streams.
//!
//! On every audio tick the scheduler pulls at most one frame per stream slot
//! and decides, against the slot clock, whether to deliver it, catch up or
//! wait. It never blocks: a missing frame is an underrun and the tick moves on.
//!
//! Per slot and per tick:
//!
//! 1. A completed session ends playback.
//! 2. A session that is not reading is skipped.
//! 3. The held frame (if any) or the next pulled frame is the candidate.
//! 4. The candidate is compared with the slot clock (see [`super::sync`]).

use serde::{Deserialize, Serialize};

use crate::application::port::ReaderStatus;
use crate::diagnostics::{DiagnosticsLog, PlaybackDiagnostic, StreamSlot};
use crate::domain::video::{DriftThreshold, FrameSample};

use super::session::{DecodeSession, NextFrame};
use super::sync::{calculate_sync_action, SecondaryTiming, SyncAction};

/// What to do with a frame that is ahead of the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AheadPolicy {
    /// Keep the frame and compare it again on the next tick.
    #[default]
    Hold,
    /// Discard the frame; the next tick pulls a new one.
    Drop,
}

/// Per-tick counters, folded into playback statistics by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub lag_discarded: u32,
    pub held: u32,
    pub dropped_ahead: u32,
    pub underruns: u32,
}

/// Frames chosen for display on one tick.
#[derive(Debug, Default)]
pub struct TickFrames {
    pub primary: Option<FrameSample>,
    pub secondary: Option<FrameSample>,
    pub report: TickReport,
}

/// Outcome of one scheduler tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Zero, one or two frames to display.
    Frames(TickFrames),
    /// A stream finished; playback must complete.
    Completed(StreamSlot),
}

#[derive(Debug)]
struct Slot {
    session: DecodeSession,
    pending: Option<FrameSample>,
}

enum SlotPoll {
    Completed,
    Idle,
    Delivered(FrameSample),
}

/// Schedules frames for up to two decode sessions against the audio clock.
#[derive(Debug)]
pub struct SyncScheduler {
    primary: Option<Slot>,
    secondary: Option<Slot>,
    timing: SecondaryTiming,
    threshold: DriftThreshold,
    ahead_policy: AheadPolicy,
    diagnostics: DiagnosticsLog,
}

impl SyncScheduler {
    #[must_use]
    pub fn new(
        threshold: DriftThreshold,
        ahead_policy: AheadPolicy,
        diagnostics: DiagnosticsLog,
    ) -> Self {
        Self {
            primary: None,
            secondary: None,
            timing: SecondaryTiming::default(),
            threshold,
            ahead_policy,
            diagnostics,
        }
    }

    /// Installs a session in `slot`, cancelling the one it replaces.
    pub fn install(&mut self, slot: StreamSlot, session: DecodeSession) {
        let target = self.slot_mut(slot);
        if let Some(mut previous) = target.take() {
            previous.session.cancel();
        }
        *target = Some(Slot {
            session,
            pending: None,
        });
    }

    pub fn set_secondary_timing(&mut self, timing: SecondaryTiming) {
        self.timing = timing;
    }

    #[must_use]
    pub fn secondary_timing(&self) -> SecondaryTiming {
        self.timing
    }

    /// Cancels and removes every session.
    pub fn cancel_all(&mut self) {
        for slot in [&mut self.primary, &mut self.secondary] {
            if let Some(mut previous) = slot.take() {
                previous.session.cancel();
            }
        }
    }

    /// Pulls one frame into the slot's hold so the first tick after a seek
    /// has a candidate. Returns the primed timestamp.
    pub fn prime(&mut self, slot: StreamSlot) -> Option<f64> {
        let entry = self.slot_mut(slot).as_mut()?;
        if entry.pending.is_some() {
            return entry.pending.as_ref().map(|frame| frame.pts_secs);
        }
        match entry.session.next_frame() {
            Ok(NextFrame::Frame(frame)) => {
                let pts = frame.pts_secs;
                entry.pending = Some(frame);
                Some(pts)
            }
            Ok(NextFrame::Underrun | NextFrame::EndOfStream) => None,
            Err(e) => {
                log::warn!("{:?}: priming failed: {}", slot, e);
                None
            }
        }
    }

    /// Runs one tick at `audio_secs`.
    pub fn tick(&mut self, audio_secs: f64) -> TickOutcome {
        let mut frames = TickFrames::default();
        let threshold = self.threshold;
        let policy = self.ahead_policy;

        if let Some(slot) = self.primary.as_mut() {
            match poll_slot(
                slot,
                StreamSlot::Primary,
                audio_secs,
                threshold,
                policy,
                &self.diagnostics,
                &mut frames.report,
            ) {
                SlotPoll::Completed => return TickOutcome::Completed(StreamSlot::Primary),
                SlotPoll::Delivered(frame) => frames.primary = Some(frame),
                SlotPoll::Idle => {}
            }
        }

        if let (Some(slot), Some(clock)) =
            (self.secondary.as_mut(), self.timing.local_clock(audio_secs))
        {
            match poll_slot(
                slot,
                StreamSlot::Secondary,
                clock,
                threshold,
                policy,
                &self.diagnostics,
                &mut frames.report,
            ) {
                SlotPoll::Completed => return TickOutcome::Completed(StreamSlot::Secondary),
                SlotPoll::Delivered(frame) => frames.secondary = Some(frame),
                SlotPoll::Idle => {}
            }
        }

        TickOutcome::Frames(frames)
    }

    fn slot_mut(&mut self, slot: StreamSlot) -> &mut Option<Slot> {
        match slot {
            StreamSlot::Primary => &mut self.primary,
            StreamSlot::Secondary => &mut self.secondary,
        }
    }
}

fn poll_slot(
    slot: &mut Slot,
    id: StreamSlot,
    clock: f64,
    threshold: DriftThreshold,
    policy: AheadPolicy,
    diagnostics: &DiagnosticsLog,
    report: &mut TickReport,
) -> SlotPoll {
    match slot.session.status() {
        ReaderStatus::Completed => return SlotPoll::Completed,
        ReaderStatus::Reading => {}
        _ => return SlotPoll::Idle,
    }

    let candidate = match slot.pending.take() {
        Some(frame) => frame,
        None => match pull(&mut slot.session, id, diagnostics) {
            Pulled::Frame(frame) => frame,
            Pulled::Underrun => {
                report.underruns += 1;
                return SlotPoll::Idle;
            }
            Pulled::Exhausted => return SlotPoll::Idle,
        },
    };

    match calculate_sync_action(candidate.pts_secs, clock, threshold) {
        SyncAction::Display => SlotPoll::Delivered(candidate),
        SyncAction::Ahead { offset_secs } => {
            match policy {
                AheadPolicy::Hold => {
                    report.held += 1;
                    slot.pending = Some(candidate);
                    diagnostics.record(PlaybackDiagnostic::HeldAhead {
                        slot: id,
                        offset_secs,
                    });
                }
                AheadPolicy::Drop => {
                    report.dropped_ahead += 1;
                    diagnostics.record(PlaybackDiagnostic::DroppedAhead {
                        slot: id,
                        offset_secs,
                    });
                }
            }
            SlotPoll::Idle
        }
        SyncAction::CatchUp => {
            let mut discarded = 1u32;
            let caught_up = loop {
                match pull(&mut slot.session, id, diagnostics) {
                    Pulled::Frame(frame) if frame.pts_secs >= clock => break Some(frame),
                    Pulled::Frame(_) => discarded += 1,
                    Pulled::Underrun => {
                        report.underruns += 1;
                        break None;
                    }
                    Pulled::Exhausted => break None,
                }
            };
            report.lag_discarded += discarded;
            log::trace!("{:?}: discarded {} late frame(s) at {:.3}s", id, discarded, clock);
            diagnostics.record(PlaybackDiagnostic::LagSkip {
                slot: id,
                discarded,
            });
            caught_up.map_or(SlotPoll::Idle, SlotPoll::Delivered)
        }
    }
}

/// Result of one pull from a session.
enum Pulled {
    Frame(FrameSample),
    /// The decoder has nothing yet; the stream continues.
    Underrun,
    /// End of stream or a failed session; no more frames will come.
    Exhausted,
}

fn pull(session: &mut DecodeSession, id: StreamSlot, diagnostics: &DiagnosticsLog) -> Pulled {
    match session.next_frame() {
        Ok(NextFrame::Frame(frame)) => Pulled::Frame(frame),
        Ok(NextFrame::Underrun) => {
            diagnostics.record(PlaybackDiagnostic::Underrun { slot: id });
            Pulled::Underrun
        }
        Ok(NextFrame::EndOfStream) => Pulled::Exhausted,
        Err(e) => {
            log::warn!("{:?}: decode failed: {}", id, e);
            diagnostics.record(PlaybackDiagnostic::SessionFailed {
                slot: id,
                message: e.to_string(),
            });
            Pulled::Exhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::port::{MediaBackend, SourceLocator};
    use crate::domain::video::PixelFormat;
    use crate::infrastructure::synthetic::{SyntheticBackend, SyntheticSource};
    use crate::test_utils::assert_abs_diff_eq;
    use std::sync::Arc;

    struct Fixture {
        backend: SyntheticBackend,
        scheduler: SyncScheduler,
        diagnostics: DiagnosticsLog,
    }

    impl Fixture {
        fn new(policy: AheadPolicy) -> Self {
            let diagnostics = DiagnosticsLog::default();
            Self {
                backend: SyntheticBackend::new(),
                scheduler: SyncScheduler::new(
                    DriftThreshold::default(),
                    policy,
                    diagnostics.clone(),
                ),
                diagnostics,
            }
        }

        fn open(&mut self, slot: StreamSlot, name: &str, source: SyntheticSource, start: f64) {
            let locator: SourceLocator = self.backend.register(name, source);
            let info = Arc::new(
                self.backend
                    .probe(&locator)
                    .expect("probe")
                    .into_info(30.0),
            );
            let session = DecodeSession::open_at_time(
                &self.backend,
                &locator,
                info,
                PixelFormat::Bgra8,
                start,
            )
            .expect("session opens");
            self.scheduler.install(slot, session);
        }

        fn report(&mut self, audio: f64) -> TickReport {
            match self.scheduler.tick(audio) {
                TickOutcome::Frames(frames) => frames.report,
                TickOutcome::Completed(slot) => panic!("unexpected completion of {:?}", slot),
            }
        }

        fn primary_pts(&mut self, audio: f64) -> Option<f64> {
            match self.scheduler.tick(audio) {
                TickOutcome::Frames(frames) => frames.primary.map(|f| f.pts_secs),
                TickOutcome::Completed(slot) => panic!("unexpected completion of {:?}", slot),
            }
        }
    }

    #[test]
    fn in_sync_frames_are_delivered_each_tick() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(StreamSlot::Primary, "a", SyntheticSource::stereo(8, 8, 30.0, 2.0), 0.0);

        for tick in 1..=10 {
            let audio = f64::from(tick) / 30.0;
            let pts = fx.primary_pts(audio).expect("frame delivered");
            assert!((pts - audio).abs() <= 0.1);
        }
    }

    #[test]
    fn ahead_frame_is_held_until_clock_catches_up() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        // First frame sits at 0.3s while the clock starts at zero.
        fx.open(
            StreamSlot::Primary,
            "ahead",
            SyntheticSource::stereo(8, 8, 30.0, 2.0).with_pts_offset(0.3),
            0.0,
        );

        let mut delivered = Vec::new();
        for tick in 1..=9 {
            let audio = f64::from(tick) / 30.0;
            if let Some(pts) = fx.primary_pts(audio) {
                delivered.push((audio, pts));
            }
        }

        let (audio, pts) = delivered[0];
        assert_abs_diff_eq!(pts, 0.3, epsilon = 1e-9);
        assert!(pts - audio <= 0.1 + 1e-9);
        // Nothing before the clock reached pts - threshold.
        assert!(audio >= 0.2 - 1e-9);
        assert!(fx.diagnostics.count(|e| matches!(e, PlaybackDiagnostic::HeldAhead { .. })) > 0);
    }

    #[test]
    fn drop_policy_discards_ahead_frames() {
        let mut fx = Fixture::new(AheadPolicy::Drop);
        fx.open(
            StreamSlot::Primary,
            "ahead",
            SyntheticSource::stereo(8, 8, 30.0, 2.0).with_pts_offset(0.3),
            0.0,
        );

        assert_eq!(fx.primary_pts(1.0 / 30.0), None);
        // The held-over frame was dropped, so the next candidate is the second frame.
        let next = fx.primary_pts(0.3);
        assert_abs_diff_eq!(next.unwrap_or(-1.0), 0.3 + 1.0 / 30.0, epsilon = 1e-9);
    }

    #[test]
    fn lagging_stream_catches_up_to_first_frame_at_or_after_clock() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(StreamSlot::Primary, "lag", SyntheticSource::stereo(8, 8, 30.0, 4.0), 0.0);

        // Clock jumped 0.31s past the first frame.
        let pts = fx.primary_pts(0.31).expect("caught-up frame delivered");
        assert!(pts >= 0.31);
        assert!(pts < 0.31 + 1.0 / 30.0);
        assert_eq!(
            fx.diagnostics
                .count(|e| matches!(e, PlaybackDiagnostic::LagSkip { .. })),
            1
        );
    }

    #[test]
    fn catch_up_exhausting_the_stream_delivers_nothing() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(StreamSlot::Primary, "short", SyntheticSource::mono(8, 8, 10.0, 0.5), 0.0);

        assert_eq!(fx.primary_pts(5.0), None);
        // Next tick observes the completed session.
        assert!(matches!(
            fx.scheduler.tick(5.1),
            TickOutcome::Completed(StreamSlot::Primary)
        ));
    }

    #[test]
    fn underrun_skips_the_tick_without_blocking() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(
            StreamSlot::Primary,
            "stall",
            SyntheticSource::stereo(8, 8, 30.0, 2.0).stalling_every(2),
            0.0,
        );

        let mut skipped = 0;
        for tick in 0..6 {
            if fx.primary_pts(f64::from(tick) / 30.0).is_none() {
                skipped += 1;
            }
        }
        assert!(skipped > 0);
        assert!(fx.diagnostics.count(|e| matches!(e, PlaybackDiagnostic::Underrun { .. })) > 0);
    }

    #[test]
    fn stalled_pull_counts_as_underrun() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(
            StreamSlot::Primary,
            "stall",
            SyntheticSource::stereo(8, 8, 30.0, 2.0).stalling_every(2),
            0.0,
        );

        assert_eq!(fx.report(0.0).underruns, 0);
        assert_eq!(fx.report(1.0 / 30.0).underruns, 1);
    }

    #[test]
    fn end_of_stream_is_not_an_underrun() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(StreamSlot::Primary, "end", SyntheticSource::mono(8, 8, 10.0, 0.2), 0.0);

        assert_eq!(fx.report(0.0), TickReport::default());
        assert_eq!(fx.report(0.1), TickReport::default());
        // The last pull finds the stream exhausted.
        assert_eq!(fx.report(0.2), TickReport::default());
        assert!(matches!(
            fx.scheduler.tick(0.3),
            TickOutcome::Completed(StreamSlot::Primary)
        ));
        assert_eq!(
            fx.diagnostics
                .count(|e| matches!(e, PlaybackDiagnostic::Underrun { .. })),
            0
        );
    }

    #[test]
    fn secondary_is_inactive_before_its_start_offset() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(StreamSlot::Primary, "p", SyntheticSource::stereo(8, 8, 10.0, 10.0), 0.0);
        fx.open(StreamSlot::Secondary, "s", SyntheticSource::stereo(8, 8, 10.0, 10.0), 0.0);
        fx.scheduler
            .set_secondary_timing(SecondaryTiming::new(1.0, 0.0));

        match fx.scheduler.tick(0.5) {
            TickOutcome::Frames(frames) => {
                assert!(frames.primary.is_some());
                assert!(frames.secondary.is_none());
            }
            TickOutcome::Completed(_) => panic!("unexpected completion"),
        }

        match fx.scheduler.tick(1.0) {
            TickOutcome::Frames(frames) => {
                let pts = frames.secondary.expect("secondary active").pts_secs;
                assert_abs_diff_eq!(pts, 0.0, epsilon = 1e-9);
            }
            TickOutcome::Completed(_) => panic!("unexpected completion"),
        }
    }

    #[test]
    fn secondary_completion_ends_the_tick() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(StreamSlot::Primary, "p", SyntheticSource::stereo(8, 8, 10.0, 10.0), 0.0);
        fx.open(StreamSlot::Secondary, "s", SyntheticSource::stereo(8, 8, 10.0, 0.1), 0.0);

        fx.scheduler.tick(0.0);
        fx.scheduler.tick(0.1);
        let mut completed = false;
        for tick in 2..6 {
            if let TickOutcome::Completed(StreamSlot::Secondary) =
                fx.scheduler.tick(f64::from(tick) / 10.0)
            {
                completed = true;
                break;
            }
        }
        assert!(completed);
    }

    #[test]
    fn prime_holds_one_frame_for_the_first_tick() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(StreamSlot::Primary, "p", SyntheticSource::stereo(8, 8, 10.0, 10.0), 3.0);

        let primed = fx.scheduler.prime(StreamSlot::Primary);
        assert_abs_diff_eq!(primed.unwrap_or(-1.0), 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fx.primary_pts(3.0).unwrap_or(-1.0), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn install_cancels_the_replaced_session() {
        let mut fx = Fixture::new(AheadPolicy::Hold);
        fx.open(StreamSlot::Primary, "p", SyntheticSource::stereo(8, 8, 10.0, 10.0), 0.0);
        fx.open(StreamSlot::Primary, "q", SyntheticSource::stereo(8, 8, 10.0, 10.0), 0.0);

        assert_eq!(fx.backend.cancelled_readers(), 1);
        fx.scheduler.cancel_all();
        assert_eq!(fx.backend.active_readers(), 0);
    }
}
