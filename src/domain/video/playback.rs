// SPDX-License-Identifier: MPL-2.0
//! Video playback state machine.
//!
//! This module defines the lifecycle states of the playback controller.

/// Represents the current playback state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PlaybackState {
    /// No source has been loaded.
    #[default]
    Uninitialized,
    /// Sources are being opened.
    Initializing,
    /// Sources are open and the clock is stopped at the start.
    Ready,
    /// The audio clock is running and ticks deliver frames.
    Playing,
    /// The audio clock is stopped mid-stream.
    Paused,
    /// A seek is replacing the decode sessions.
    Seeking {
        /// Target position in seconds.
        target_secs: f64,
    },
    /// A stream reached its end.
    Completed,
    /// Initialization failed; a new init is required.
    Failed,
}

impl PlaybackState {
    /// Returns true if the player is currently playing.
    #[must_use]
    pub fn is_playing(self) -> bool {
        matches!(self, Self::Playing)
    }

    /// Returns true if the player is paused.
    #[must_use]
    pub fn is_paused(self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Returns true once sources are loaded and the transport can be driven.
    #[must_use]
    pub fn has_source(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Playing | Self::Paused | Self::Seeking { .. } | Self::Completed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_uninitialized() {
        assert_eq!(PlaybackState::default(), PlaybackState::Uninitialized);
    }

    #[test]
    fn state_checks() {
        assert!(PlaybackState::Playing.is_playing());
        assert!(!PlaybackState::Paused.is_playing());

        assert!(PlaybackState::Paused.is_paused());
        assert!(!PlaybackState::Playing.is_paused());
    }

    #[test]
    fn has_source_excludes_unloaded_states() {
        assert!(!PlaybackState::Uninitialized.has_source());
        assert!(!PlaybackState::Initializing.has_source());
        assert!(!PlaybackState::Failed.has_source());
        assert!(PlaybackState::Completed.has_source());
        assert!(PlaybackState::Ready.has_source());
    }
}
