// SPDX-License-Identifier: MPL-2.0
//! Audio transport port definition.
//!
//! The audio transport plays the source's audio track and is the master
//! clock of playback. Video never drives it; the sync scheduler follows it.

use std::sync::Arc;
use std::time::Duration;

/// Callback fired on each periodic observation, with the transport time in seconds.
pub type TickCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Callback fired once when playback reaches the end of the audio track.
pub type FinishCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle for removing a periodic observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(pub u64);

/// Port for the audio playback clock.
///
/// # Callback contract
///
/// Observers are invoked on the transport's callback thread, never while the
/// transport holds an internal lock, so callbacks may call back into it.
/// Callbacks for a given transport never overlap.
pub trait AudioTransport: Send + Sync {
    fn play(&self);

    fn pause(&self);

    /// True once the transport has buffered enough to start playing.
    fn is_ready(&self) -> bool;

    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    /// Moves the playback position. Returns true once the move is confirmed.
    fn seek(&self, time_secs: f64) -> bool;

    fn volume(&self) -> f32;

    /// Sets the output volume. Values are clamped to 0.0–1.0.
    fn set_volume(&self, volume: f32);

    /// Registers a callback fired every `interval` of transport time while playing.
    fn add_periodic_observer(&self, interval: Duration, callback: TickCallback) -> ObserverToken;

    /// Removes a periodic observer. Unknown tokens are ignored.
    fn remove_periodic_observer(&self, token: ObserverToken);

    /// Replaces the end-of-track observer. `None` clears it.
    fn set_finish_observer(&self, callback: Option<FinishCallback>);
}
