// SPDX-License-Identifier: MPL-2.0
//! Audio/Video synchronization decisions.
//!
//! Audio is the master clock. On every tick the scheduler compares the
//! timestamp of the candidate frame against the clock of its stream slot
//! and picks one of three actions:
//!
//! ```text
//!   offset = frame_pts - slot_clock
//!
//!   offset < -threshold   ──▶ CatchUp  (pull until pts >= slot_clock)
//!   |offset| <= threshold ──▶ Display
//!   offset > threshold    ──▶ Ahead    (hold or drop, per policy)
//! ```
//!
//! The secondary stream runs on its own clock derived from the audio clock
//! with a start offset (when it begins, in primary time) and a seek offset
//! (where in its own timeline it begins).

use crate::domain::video::DriftThreshold;

/// Determines the sync action for a video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncAction {
    /// Within tolerance: show the frame now.
    Display,

    /// Video is behind the clock: discard until caught up.
    CatchUp,

    /// Video is ahead of the clock by `offset_secs`.
    Ahead {
        /// How far ahead the frame is, in seconds.
        offset_secs: f64,
    },
}

/// Calculates the sync action for a frame given its slot clock.
///
/// Offsets of exactly `±threshold` are displayed.
#[must_use]
pub fn calculate_sync_action(
    video_pts_secs: f64,
    clock_secs: f64,
    threshold: DriftThreshold,
) -> SyncAction {
    let offset = video_pts_secs - clock_secs;

    if offset < -threshold.secs() {
        SyncAction::CatchUp
    } else if offset > threshold.secs() {
        SyncAction::Ahead {
            offset_secs: offset,
        }
    } else {
        SyncAction::Display
    }
}

/// Time mapping between the audio clock and the secondary stream.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SecondaryTiming {
    /// Primary-timeline time at which the secondary stream starts.
    pub start_offset_secs: f64,
    /// Secondary-timeline time shown when the secondary stream starts.
    pub seek_offset_secs: f64,
}

impl SecondaryTiming {
    #[must_use]
    pub fn new(start_offset_secs: f64, seek_offset_secs: f64) -> Self {
        Self {
            start_offset_secs: start_offset_secs.max(0.0),
            seek_offset_secs: seek_offset_secs.max(0.0),
        }
    }

    /// Secondary-local clock for an audio time, or `None` before the
    /// secondary stream has started.
    #[must_use]
    pub fn local_clock(&self, audio_secs: f64) -> Option<f64> {
        if audio_secs < self.start_offset_secs {
            None
        } else {
            Some(audio_secs - self.start_offset_secs + self.seek_offset_secs)
        }
    }

    /// Where the secondary session must start when the primary seeks to
    /// `primary_secs`.
    ///
    /// Before the start offset the secondary waits at its seek offset.
    #[must_use]
    pub fn seek_target(&self, primary_secs: f64) -> f64 {
        self.seek_offset_secs + (primary_secs - self.start_offset_secs).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;

    fn threshold() -> DriftThreshold {
        DriftThreshold::new(0.1)
    }

    #[test]
    fn frame_within_tolerance_is_displayed() {
        assert_eq!(
            calculate_sync_action(10.05, 10.0, threshold()),
            SyncAction::Display
        );
        assert_eq!(
            calculate_sync_action(9.95, 10.0, threshold()),
            SyncAction::Display
        );
    }

    #[test]
    fn boundary_offsets_are_displayed() {
        assert_eq!(
            calculate_sync_action(0.1, 0.0, threshold()),
            SyncAction::Display
        );
        assert_eq!(
            calculate_sync_action(0.0, 0.1, threshold()),
            SyncAction::Display
        );
    }

    #[test]
    fn lagging_frame_triggers_catch_up() {
        assert_eq!(
            calculate_sync_action(9.7, 10.0, threshold()),
            SyncAction::CatchUp
        );
    }

    #[test]
    fn leading_frame_reports_offset() {
        match calculate_sync_action(10.3, 10.0, threshold()) {
            SyncAction::Ahead { offset_secs } => assert_abs_diff_eq!(offset_secs, 0.3, epsilon = 1e-9),
            other => panic!("expected Ahead, got {:?}", other),
        }
    }

    #[test]
    fn secondary_clock_is_inactive_before_start_offset() {
        let timing = SecondaryTiming::new(30.0, 5.0);
        assert_eq!(timing.local_clock(29.9), None);
        assert_abs_diff_eq!(timing.local_clock(30.0).unwrap_or(-1.0), 5.0);
        assert_abs_diff_eq!(timing.local_clock(40.0).unwrap_or(-1.0), 15.0);
    }

    #[test]
    fn secondary_seek_target_matches_clock_after_start() {
        let timing = SecondaryTiming::new(10.0, 0.0);
        assert_abs_diff_eq!(timing.seek_target(60.0), 50.0);
        assert_abs_diff_eq!(
            timing.seek_target(60.0),
            timing.local_clock(60.0).unwrap_or(-1.0)
        );
    }

    #[test]
    fn secondary_seek_before_start_waits_at_seek_offset() {
        let timing = SecondaryTiming::new(10.0, 4.0);
        assert_abs_diff_eq!(timing.seek_target(3.0), 4.0);
    }
}
