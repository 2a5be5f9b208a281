// SPDX-License-Identifier: MPL-2.0
//! Playback diagnostic event types.
//!
//! Non-fatal anomalies on the tick path are recorded here instead of being
//! surfaced to the host. Each event names the stream slot it concerns.

use serde::{Deserialize, Serialize};

/// Which of the two synchronized streams an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSlot {
    Primary,
    Secondary,
}

/// A non-fatal anomaly observed during playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackDiagnostic {
    // ==========================================================================
    // Sync
    // ==========================================================================
    /// Frames were discarded while catching up to the audio clock.
    LagSkip { slot: StreamSlot, discarded: u32 },

    /// A frame ahead of the audio clock was kept for the next tick.
    HeldAhead { slot: StreamSlot, offset_secs: f64 },

    /// A frame ahead of the audio clock was dropped.
    DroppedAhead { slot: StreamSlot, offset_secs: f64 },

    /// The decoder had no frame ready for this tick.
    Underrun { slot: StreamSlot },

    // ==========================================================================
    // Texture and composition
    // ==========================================================================
    /// Source and destination dimensions differ; the copy was skipped.
    SizeMismatch {
        slot: StreamSlot,
        source: (u32, u32),
        destination: (u32, u32),
    },

    /// A planar surface had no chroma destination to copy into.
    MissingChromaTarget { slot: StreamSlot },

    /// A sample could not be turned into eye surfaces.
    ExtractionFailed { slot: StreamSlot, message: String },

    /// A pixel plane could not be turned into a texture.
    ConversionFailed { slot: StreamSlot, message: String },

    /// The device rejected a command batch.
    SubmissionFailed { message: String },

    // ==========================================================================
    // Lifecycle
    // ==========================================================================
    /// A decode session started reading.
    SessionOpened { slot: StreamSlot, start_secs: f64 },

    /// A decode session could not be opened or failed mid-stream.
    SessionFailed { slot: StreamSlot, message: String },

    /// A stale init or seek finished after being superseded.
    StaleCompletionIgnored { generation: u64 },
}

/// A diagnostic stamped with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Milliseconds since the log was created.
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: PlaybackDiagnostic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        record: DiagnosticRecord,
    }

    #[test]
    fn record_serializes_with_kind_tag() {
        let wrapper = Wrapper {
            record: DiagnosticRecord {
                at_ms: 12,
                event: PlaybackDiagnostic::LagSkip {
                    slot: StreamSlot::Secondary,
                    discarded: 3,
                },
            },
        };
        let text = toml::to_string(&wrapper).expect("serializes");
        assert!(text.contains("kind = \"lag_skip\""));
        assert!(text.contains("slot = \"secondary\""));

        let back: Wrapper = toml::from_str(&text).expect("parses");
        assert_eq!(back.record, wrapper.record);
    }
}
