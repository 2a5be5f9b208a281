// SPDX-License-Identifier: MPL-2.0
//! Software audio transport.
//!
//! [`ClockTransport`] implements the audio transport port without an audio
//! device: it keeps a playback position, fires periodic observers at exact
//! multiples of their interval and fires the finish observer once at the
//! end of the track.
//!
//! Two ways to drive it:
//!
//! - **Manual**: the owner calls [`ClockTransport::advance`]; observers run
//!   on the caller's thread. Deterministic, used by tests and benches.
//! - **Realtime**: [`ClockTransport::start_realtime`] spawns a ticker thread
//!   that advances the clock with wall time.
//!
//! Observers are always invoked with no internal lock held, and never
//! concurrently with each other.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::application::port::{AudioTransport, FinishCallback, ObserverToken, TickCallback};
use crate::domain::video::Volume;
use crate::video_player::time_units::{nanos_to_secs, secs_to_nanos};

/// Granularity of the realtime ticker.
const REALTIME_STEP: Duration = Duration::from_millis(2);

struct Observer {
    token: ObserverToken,
    interval_ns: u64,
    next_index: u64,
    callback: TickCallback,
}

impl Observer {
    fn rebase(&mut self, position_ns: u64) {
        self.next_index = position_ns / self.interval_ns + 1;
    }
}

/// Software clock implementing [`AudioTransport`].
pub struct ClockTransport {
    position_ns: AtomicU64,
    duration_ns: u64,
    playing: AtomicBool,
    ready: AtomicBool,
    finished: AtomicBool,
    reject_seeks: AtomicBool,
    volume_bits: AtomicU32,
    next_token: AtomicU64,
    observers: Mutex<Vec<Observer>>,
    finish: Mutex<Option<FinishCallback>>,
    /// Serializes observer dispatch between advancing threads.
    dispatch: Mutex<()>,
    /// Guards position changes; never held while callbacks run.
    motion: Mutex<()>,
    ticker_stop: AtomicBool,
}

impl std::fmt::Debug for ClockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockTransport")
            .field("position_secs", &self.current_time())
            .field("duration_secs", &nanos_to_secs(self.duration_ns))
            .field("playing", &self.is_playing())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClockTransport {
    /// Creates a paused, ready transport for a track of `duration_secs`.
    #[must_use]
    pub fn new(duration_secs: f64) -> Self {
        Self {
            position_ns: AtomicU64::new(0),
            duration_ns: secs_to_nanos(duration_secs),
            playing: AtomicBool::new(false),
            ready: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            reject_seeks: AtomicBool::new(false),
            volume_bits: AtomicU32::new(Volume::default().value().to_bits()),
            next_token: AtomicU64::new(0),
            observers: Mutex::new(Vec::new()),
            finish: Mutex::new(None),
            dispatch: Mutex::new(()),
            motion: Mutex::new(()),
            ticker_stop: AtomicBool::new(false),
        }
    }

    /// Returns true if the clock is running.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        nanos_to_secs(self.duration_ns)
    }

    /// Overrides readiness, e.g. to model a transport still buffering.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Makes subsequent seeks fail to confirm.
    pub fn set_seek_rejection(&self, reject: bool) {
        self.reject_seeks.store(reject, Ordering::SeqCst);
    }

    /// Number of registered periodic observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Advances the clock by `elapsed` if playing, firing due observers.
    ///
    /// Each observer fires once per interval boundary crossed, with the
    /// boundary time. Reaching the end stops the clock and fires the finish
    /// observer once.
    pub fn advance(&self, elapsed: Duration) {
        let _dispatch = lock(&self.dispatch);
        let mut due: Vec<(u64, ObserverToken, TickCallback)> = Vec::new();
        let position = {
            let _motion = lock(&self.motion);
            if !self.is_playing() {
                return;
            }

            let step = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
            let start = self.position_ns.load(Ordering::SeqCst);
            let position = start.saturating_add(step).min(self.duration_ns);
            self.position_ns.store(position, Ordering::SeqCst);

            let mut observers = lock(&self.observers);
            for observer in observers.iter_mut() {
                loop {
                    let at = observer.next_index.saturating_mul(observer.interval_ns);
                    if at > position {
                        break;
                    }
                    due.push((at, observer.token, observer.callback.clone()));
                    observer.next_index += 1;
                }
            }
            position
        };
        due.sort_by_key(|(at, _, _)| *at);

        for (at, token, callback) in due {
            let still_registered = lock(&self.observers).iter().any(|o| o.token == token);
            if still_registered && self.is_playing() {
                callback(nanos_to_secs(at));
            }
        }

        if position >= self.duration_ns && !self.finished.swap(true, Ordering::SeqCst) {
            self.playing.store(false, Ordering::SeqCst);
            let finish = lock(&self.finish).clone();
            log::debug!("clock reached end at {:.3}s", nanos_to_secs(position));
            if let Some(callback) = finish {
                callback();
            }
        }
    }

    /// Spawns a thread advancing the clock with wall time.
    ///
    /// The thread exits when the transport is dropped or
    /// [`ClockTransport::stop_realtime`] is called.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if the thread cannot be created.
    pub fn start_realtime(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.ticker_stop.store(false, Ordering::SeqCst);
        std::thread::Builder::new()
            .name("audio-clock".into())
            .spawn(move || {
                let mut last = Instant::now();
                loop {
                    std::thread::sleep(REALTIME_STEP);
                    let Some(clock) = weak.upgrade() else { break };
                    if clock.ticker_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let now = Instant::now();
                    clock.advance(now.duration_since(last));
                    last = now;
                }
            })
    }

    /// Stops a realtime ticker started with [`ClockTransport::start_realtime`].
    pub fn stop_realtime(&self) {
        self.ticker_stop.store(true, Ordering::SeqCst);
    }
}

impl AudioTransport for ClockTransport {
    fn play(&self) {
        if self.position_ns.load(Ordering::SeqCst) >= self.duration_ns {
            return;
        }
        self.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        let _motion = lock(&self.motion);
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn current_time(&self) -> f64 {
        nanos_to_secs(self.position_ns.load(Ordering::SeqCst))
    }

    fn seek(&self, time_secs: f64) -> bool {
        if self.reject_seeks.load(Ordering::SeqCst) {
            return false;
        }
        let _motion = lock(&self.motion);
        let position = secs_to_nanos(time_secs).min(self.duration_ns);
        self.position_ns.store(position, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
        for observer in lock(&self.observers).iter_mut() {
            observer.rebase(position);
        }
        true
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::SeqCst))
    }

    fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(Volume::new(volume).value().to_bits(), Ordering::SeqCst);
    }

    fn add_periodic_observer(&self, interval: Duration, callback: TickCallback) -> ObserverToken {
        let token = ObserverToken(self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        let interval_ns = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX).max(1);
        let mut observer = Observer {
            token,
            interval_ns,
            next_index: 0,
            callback,
        };
        observer.rebase(self.position_ns.load(Ordering::SeqCst));
        lock(&self.observers).push(observer);
        token
    }

    fn remove_periodic_observer(&self, token: ObserverToken) {
        lock(&self.observers).retain(|observer| observer.token != token);
    }

    fn set_finish_observer(&self, callback: Option<FinishCallback>) {
        *lock(&self.finish) = callback;
    }
}

impl Drop for ClockTransport {
    fn drop(&mut self) {
        self.ticker_stop.store(true, Ordering::SeqCst);
    }
}
