// SPDX-License-Identifier: MPL-2.0
//! Playback controller.
//!
//! [`SpatialPlayer`] is the host-facing state machine. It opens decode
//! sessions and the audio transport on the async path, subscribes to the
//! transport's periodic ticks and runs the sync scheduler, extractor and
//! compositor on every tick.
//!
//! # Concurrency
//!
//! - Init and seek open sessions inside `spawn_blocking`. Each request takes
//!   a new generation; a completion whose generation is no longer current is
//!   dropped.
//! - Ticks run on the transport's callback thread. The pipeline mutex
//!   serializes them with session swaps, so a tick never mixes frames from
//!   an old and a new session.
//! - Locks are taken in the order control, then pipeline. Host callbacks are
//!   invoked with no lock held.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use crate::application::port::{
    AudioTransport, DrawableSource, GpuDevice, MediaBackend, ObserverToken, PresentationContext,
    SourceLocator,
};
use crate::config::PlayerConfig;
use crate::diagnostics::{DiagnosticsLog, PlaybackDiagnostic, StreamSlot};
use crate::domain::video::{FrameSample, PlaybackState, VideoInfo, Volume, YcbcrMatrix};
use crate::error::{Error, ExtractError, PlayerError, SessionError};

use super::compositor::{Compositor, Destinations, StreamSurfaces};
use super::extractor::extract;
use super::scheduler::{SyncScheduler, TickFrames, TickOutcome};
use super::session::DecodeSession;
use super::submission::SubmissionWorker;
use super::sync::SecondaryTiming;
use super::texture_cache::{CacheStats, TextureCache};

/// Sources to open for a playback run.
#[derive(Debug, Clone, PartialEq)]
pub struct InitRequest {
    pub primary: SourceLocator,
    pub secondary: Option<SourceLocator>,
    /// Primary time at which the secondary stream starts.
    pub secondary_start_offset_secs: f64,
    /// Secondary-local time shown when the secondary stream starts.
    pub secondary_seek_offset_secs: f64,
}

impl InitRequest {
    /// A single-stream run.
    #[must_use]
    pub fn new(primary: impl Into<SourceLocator>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
            secondary_start_offset_secs: 0.0,
            secondary_seek_offset_secs: 0.0,
        }
    }

    /// Adds a secondary stream starting at `start_offset_secs` of the
    /// primary, showing its own `seek_offset_secs` at that point.
    #[must_use]
    pub fn with_secondary(
        mut self,
        secondary: impl Into<SourceLocator>,
        start_offset_secs: f64,
        seek_offset_secs: f64,
    ) -> Self {
        self.secondary = Some(secondary.into());
        self.secondary_start_offset_secs = start_offset_secs;
        self.secondary_seek_offset_secs = seek_offset_secs;
        self
    }
}

/// Stream geometry reported once initialization succeeds.
///
/// Secondary fields are zero for single-stream runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadyInfo {
    pub primary_width: u32,
    pub primary_height: u32,
    pub primary_fps: f64,
    pub secondary_width: u32,
    pub secondary_height: u32,
    pub secondary_fps: f64,
    /// Wire tag of the decoded pixel format.
    pub pixel_format_tag: u32,
}

/// Notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Ready(ReadyInfo),
    /// Playback reached the end. Sent once per run.
    Completed,
    /// Initialization or seek failed; the player is in [`PlaybackState::Failed`].
    Failed(PlayerError),
}

/// Counters accumulated across ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStats {
    pub ticks: u64,
    pub primary_frames: u64,
    pub secondary_frames: u64,
    /// Frames discarded while catching up.
    pub lag_skips: u64,
    pub holds: u64,
    pub dropped_ahead: u64,
    pub underruns: u64,
    pub size_mismatches: u64,
    pub conversion_failures: u64,
    pub extraction_failures: u64,
    pub submission_failures: u64,
    pub last_primary_pts: Option<f64>,
    pub last_secondary_pts: Option<f64>,
    pub texture_cache: CacheStats,
}

type EventHandler = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

#[derive(Default)]
struct Control {
    state: PlaybackState,
    transport: Option<Arc<dyn AudioTransport>>,
    primary_info: Option<Arc<VideoInfo>>,
    secondary_info: Option<Arc<VideoInfo>>,
    request: Option<InitRequest>,
    timing: SecondaryTiming,
    tick_token: Option<ObserverToken>,
    tick_interval: Duration,
    volume: Volume,
}

impl Control {
    /// Stops the tick subscription and the clock of the current run.
    fn stop_ticks(&mut self) {
        if let Some(transport) = self.transport.as_ref() {
            transport.pause();
            if let Some(token) = self.tick_token.take() {
                transport.remove_periodic_observer(token);
            }
        }
    }
}

struct Pipeline {
    scheduler: SyncScheduler,
    texture_cache: TextureCache,
    compositor: Compositor,
    destinations: Option<Destinations>,
    drawables: Option<Arc<dyn DrawableSource>>,
    stats: PlaybackStats,
    primary_matrix: YcbcrMatrix,
    secondary_matrix: YcbcrMatrix,
    /// Generation whose sessions are installed.
    generation: u64,
}

/// Sessions opened off the tick path, waiting to be installed.
struct OpenedRun {
    transport: Arc<dyn AudioTransport>,
    primary_info: Arc<VideoInfo>,
    primary: DecodeSession,
    secondary: Option<(Arc<VideoInfo>, DecodeSession)>,
}

struct Shared {
    backend: Arc<dyn MediaBackend>,
    context: PresentationContext,
    config: PlayerConfig,
    control: Mutex<Control>,
    pipeline: Mutex<Pipeline>,
    submitter: SubmissionWorker,
    handlers: RwLock<Vec<EventHandler>>,
    generation: AtomicU64,
    completion_fired: AtomicBool,
    diagnostics: DiagnosticsLog,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Host-facing playback controller for one or two synchronized spatial streams.
///
/// Cloning yields another handle to the same player.
#[derive(Clone)]
pub struct SpatialPlayer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SpatialPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialPlayer")
            .field("state", &self.state())
            .field("generation", &self.shared.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SpatialPlayer {
    /// Creates an uninitialized player.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Texture`] if the GPU submission worker cannot start.
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        gpu: Arc<dyn GpuDevice>,
        context: PresentationContext,
        config: PlayerConfig,
    ) -> Result<Self, Error> {
        let diagnostics = DiagnosticsLog::new(config.diagnostics_capacity());
        let submitter = SubmissionWorker::spawn(gpu.clone())?;
        let pipeline = Pipeline {
            scheduler: SyncScheduler::new(
                config.drift_threshold(),
                config.ahead_policy(),
                diagnostics.clone(),
            ),
            texture_cache: TextureCache::new(gpu, config.texture_cache_capacity()),
            compositor: Compositor::new(
                config.render_mode(),
                config.mono_policy(),
                diagnostics.clone(),
            ),
            destinations: None,
            drawables: None,
            stats: PlaybackStats::default(),
            primary_matrix: YcbcrMatrix::default(),
            secondary_matrix: YcbcrMatrix::default(),
            generation: 0,
        };
        let control = Control {
            volume: config.volume(),
            ..Control::default()
        };

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                context,
                config,
                control: Mutex::new(control),
                pipeline: Mutex::new(pipeline),
                submitter,
                handlers: RwLock::new(Vec::new()),
                generation: AtomicU64::new(0),
                completion_fired: AtomicBool::new(false),
                diagnostics,
            }),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the sources of `request` and prepares playback.
    ///
    /// Any previous run is torn down first. On success the player is
    /// [`PlaybackState::Ready`], subscribers receive [`PlayerEvent::Ready`]
    /// and ticks start with the next [`SpatialPlayer::play`].
    ///
    /// # Errors
    ///
    /// - [`PlayerError::Session`] if a source cannot be opened; the player is
    ///   then [`PlaybackState::Failed`]
    /// - [`PlayerError::Superseded`] if another init or seek started meanwhile
    pub async fn init_player(&self, request: InitRequest) -> Result<ReadyInfo, PlayerError> {
        let shared = &self.shared;
        let generation = {
            let mut control = lock(&shared.control);
            let generation = shared.next_generation();
            control.stop_ticks();
            if let Some(transport) = control.transport.take() {
                transport.set_finish_observer(None);
            }
            control.primary_info = None;
            control.secondary_info = None;
            control.request = None;
            control.state = PlaybackState::Initializing;

            let mut pipeline = lock(&shared.pipeline);
            pipeline.scheduler.cancel_all();
            pipeline.texture_cache.invalidate();
            pipeline.stats = PlaybackStats::default();
            generation
        };
        shared.completion_fired.store(false, Ordering::SeqCst);
        log::info!("initializing playback of {}", request.primary);

        let opener = shared.clone();
        let job = request.clone();
        let opened = tokio::task::spawn_blocking(move || opener.open_run(&job))
            .await
            .map_err(|e| SessionError::Decode(format!("init task failed: {e}")))
            .map_err(PlayerError::from)
            .and_then(|result| result);

        if !shared.is_current(generation) {
            return Err(shared.stale(generation));
        }
        match opened {
            Ok(run) => shared.install_initialized(generation, request, run),
            Err(e) => Err(shared.fail(generation, e)),
        }
    }

    /// Starts or continues playback.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::NotInitialized`] before a successful init.
    pub fn play(&self) -> Result<(), PlayerError> {
        let mut control = lock(&self.shared.control);
        match control.state {
            PlaybackState::Ready | PlaybackState::Paused | PlaybackState::Playing => {
                let transport = control
                    .transport
                    .clone()
                    .ok_or(PlayerError::NotInitialized)?;
                transport.play();
                control.state = PlaybackState::Playing;
                Ok(())
            }
            PlaybackState::Seeking { .. } | PlaybackState::Completed => Ok(()),
            PlaybackState::Uninitialized
            | PlaybackState::Initializing
            | PlaybackState::Failed => Err(PlayerError::NotInitialized),
        }
    }

    /// Stops the clock. Pausing twice is the same as pausing once.
    pub fn pause(&self) {
        let mut control = lock(&self.shared.control);
        if control.state.is_playing() {
            if let Some(transport) = control.transport.as_ref() {
                transport.pause();
            }
            control.state = PlaybackState::Paused;
        }
    }

    /// Resumes a paused player if the transport is ready.
    ///
    /// Returns whether playback resumed.
    pub fn resume(&self) -> bool {
        let mut control = lock(&self.shared.control);
        if !control.state.is_paused() {
            return false;
        }
        match control.transport.clone() {
            Some(transport) if transport.is_ready() => {
                transport.play();
                control.state = PlaybackState::Playing;
                true
            }
            _ => {
                log::debug!("resume ignored: transport not ready");
                false
            }
        }
    }

    /// Moves playback to `time_secs` of the primary stream and plays.
    ///
    /// The secondary stream is reopened at its matching local time.
    ///
    /// # Errors
    ///
    /// - [`PlayerError::NotInitialized`] without a loaded source
    /// - [`PlayerError::SeekRejected`] if the transport refuses; the player
    ///   stays paused at the previous position
    /// - [`PlayerError::Session`] if a session cannot be reopened
    /// - [`PlayerError::Superseded`] if another init or seek started meanwhile
    pub async fn seek(&self, time_secs: f64) -> Result<(), PlayerError> {
        let shared = &self.shared;
        let time_secs = if time_secs.is_finite() {
            time_secs.max(0.0)
        } else {
            0.0
        };

        let (generation, transport, request, timing) = {
            let mut control = lock(&shared.control);
            if !control.state.has_source() {
                return Err(PlayerError::NotInitialized);
            }
            let (Some(transport), Some(request)) =
                (control.transport.clone(), control.request.clone())
            else {
                return Err(PlayerError::NotInitialized);
            };
            control.stop_ticks();
            control.state = PlaybackState::Seeking {
                target_secs: time_secs,
            };
            (
                shared.next_generation(),
                transport,
                request,
                control.timing,
            )
        };

        if !transport.seek(time_secs) {
            log::warn!("transport rejected seek to {:.3}s", time_secs);
            let mut control = lock(&shared.control);
            if shared.is_current(generation) {
                lock(&shared.pipeline).generation = generation;
                let interval = control.tick_interval;
                control.tick_token = Some(shared.subscribe_ticks(&transport, interval, generation));
                control.state = PlaybackState::Paused;
            }
            return Err(PlayerError::SeekRejected);
        }

        lock(&shared.pipeline).scheduler.cancel_all();
        let secondary_secs = timing.seek_target(time_secs);
        log::debug!(
            "seeking to {:.3}s (secondary {:.3}s)",
            time_secs,
            secondary_secs
        );

        let opener = shared.clone();
        let job = request.clone();
        let opened = tokio::task::spawn_blocking(move || {
            opener.reopen_sessions(&job, time_secs, secondary_secs)
        })
        .await
        .map_err(|e| SessionError::Decode(format!("seek task failed: {e}")))
        .map_err(PlayerError::from)
        .and_then(|result| result);

        if !shared.is_current(generation) {
            return Err(shared.stale(generation));
        }
        let (primary, secondary) = match opened {
            Ok(sessions) => sessions,
            Err(e) => return Err(shared.fail(generation, e)),
        };

        let mut control = lock(&shared.control);
        {
            let mut pipeline = lock(&shared.pipeline);
            if !shared.is_current(generation) {
                return Err(shared.stale(generation));
            }
            shared.install_sessions(&mut pipeline, generation, primary, secondary, timing);
            pipeline.scheduler.prime(StreamSlot::Primary);
            pipeline.scheduler.prime(StreamSlot::Secondary);
        }
        shared.completion_fired.store(false, Ordering::SeqCst);
        let interval = control.tick_interval;
        control.tick_token = Some(shared.subscribe_ticks(&transport, interval, generation));
        control.state = PlaybackState::Playing;
        transport.play();
        Ok(())
    }

    /// Restarts playback from the beginning.
    ///
    /// # Errors
    ///
    /// See [`SpatialPlayer::seek`].
    pub async fn replay(&self) -> Result<(), PlayerError> {
        self.seek(0.0).await?;
        self.play()
    }

    // =========================================================================
    // Host surfaces
    // =========================================================================

    /// Sets the textures each tick copies into.
    ///
    /// Ticks are skipped until destinations (or preview drawables) exist.
    pub fn set_destination_surfaces(&self, destinations: Destinations) {
        lock(&self.shared.pipeline).destinations = Some(destinations);
    }

    /// Sets the drawables used in preview mode.
    pub fn set_drawable_source(&self, drawables: Arc<dyn DrawableSource>) {
        lock(&self.shared.pipeline).drawables = Some(drawables);
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Registers a handler for every [`PlayerEvent`].
    pub fn subscribe(&self, handler: impl Fn(&PlayerEvent) + Send + Sync + 'static) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Registers a handler for [`PlayerEvent::Ready`].
    pub fn on_ready(&self, handler: impl Fn(&ReadyInfo) + Send + Sync + 'static) {
        self.subscribe(move |event| {
            if let PlayerEvent::Ready(info) = event {
                handler(info);
            }
        });
    }

    /// Registers a handler for [`PlayerEvent::Completed`].
    pub fn on_complete(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.subscribe(move |event| {
            if matches!(event, PlayerEvent::Completed) {
                handler();
            }
        });
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        lock(&self.shared.control).state
    }

    /// Current audio clock time in seconds, zero without a transport.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        lock(&self.shared.control)
            .transport
            .as_ref()
            .map_or(0.0, |transport| transport.current_time())
    }

    /// Transport volume in `0.0..=1.0`, zero without a transport.
    #[must_use]
    pub fn volume(&self) -> f32 {
        lock(&self.shared.control)
            .transport
            .as_ref()
            .map_or(0.0, |transport| transport.volume())
    }

    /// Sets the volume, clamped to `0.0..=1.0`. Kept across runs.
    pub fn set_volume(&self, volume: f32) {
        let mut control = lock(&self.shared.control);
        control.volume = Volume::new(volume);
        if let Some(transport) = control.transport.as_ref() {
            transport.set_volume(control.volume.value());
        }
    }

    #[must_use]
    pub fn video_info(&self) -> Option<Arc<VideoInfo>> {
        lock(&self.shared.control).primary_info.clone()
    }

    #[must_use]
    pub fn secondary_video_info(&self) -> Option<Arc<VideoInfo>> {
        lock(&self.shared.control).secondary_info.clone()
    }

    #[must_use]
    pub fn stats(&self) -> PlaybackStats {
        let pipeline = lock(&self.shared.pipeline);
        PlaybackStats {
            size_mismatches: pipeline.compositor.size_mismatches(),
            texture_cache: pipeline.texture_cache.stats(),
            ..pipeline.stats.clone()
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsLog {
        self.shared.diagnostics.clone()
    }

    #[must_use]
    pub fn config(&self) -> &PlayerConfig {
        &self.shared.config
    }
}

impl Shared {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn stale(&self, generation: u64) -> PlayerError {
        log::debug!("dropping superseded completion of generation {}", generation);
        self.diagnostics
            .record(PlaybackDiagnostic::StaleCompletionIgnored { generation });
        PlayerError::Superseded
    }

    fn fail(&self, generation: u64, error: PlayerError) -> PlayerError {
        log::error!("playback failed: {}", error);
        {
            let mut control = lock(&self.control);
            if !self.is_current(generation) {
                return self.stale(generation);
            }
            control.stop_ticks();
            control.state = PlaybackState::Failed;
        }
        self.diagnostics.record(PlaybackDiagnostic::SessionFailed {
            slot: StreamSlot::Primary,
            message: error.to_string(),
        });
        self.emit(&PlayerEvent::Failed(error.clone()));
        error
    }

    fn emit(&self, event: &PlayerEvent) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(event);
        }
    }

    /// Probes and opens every source of `request`. Runs off the async runtime.
    fn open_run(&self, request: &InitRequest) -> Result<OpenedRun, PlayerError> {
        let fallback_fps = self.config.fallback_fps();
        let pixel_format = self.config.pixel_format();
        let backend = self.backend.as_ref();

        let primary_info = Arc::new(backend.probe(&request.primary)?.into_info(fallback_fps));
        let transport = backend.create_audio_transport(&request.primary, &self.context)?;
        let primary =
            DecodeSession::open(backend, &request.primary, primary_info.clone(), pixel_format)?;

        let secondary = match &request.secondary {
            Some(locator) => {
                let info = Arc::new(backend.probe(locator)?.into_info(fallback_fps));
                let timing = SecondaryTiming::new(
                    request.secondary_start_offset_secs,
                    request.secondary_seek_offset_secs,
                );
                let session = DecodeSession::open_at_time(
                    backend,
                    locator,
                    info.clone(),
                    pixel_format,
                    timing.seek_target(0.0),
                )?;
                Some((info, session))
            }
            None => None,
        };

        Ok(OpenedRun {
            transport,
            primary_info,
            primary,
            secondary,
        })
    }

    /// Opens replacement sessions for a seek, reusing the known stream info.
    fn reopen_sessions(
        &self,
        request: &InitRequest,
        primary_secs: f64,
        secondary_secs: f64,
    ) -> Result<(DecodeSession, Option<DecodeSession>), PlayerError> {
        let (primary_info, secondary_info) = {
            let control = lock(&self.control);
            (control.primary_info.clone(), control.secondary_info.clone())
        };
        let primary_info = primary_info.ok_or(PlayerError::NotInitialized)?;
        let pixel_format = self.config.pixel_format();
        let backend = self.backend.as_ref();

        let primary = DecodeSession::open_at_time(
            backend,
            &request.primary,
            primary_info,
            pixel_format,
            primary_secs,
        )?;
        let secondary = match (&request.secondary, secondary_info) {
            (Some(locator), Some(info)) => Some(DecodeSession::open_at_time(
                backend,
                locator,
                info,
                pixel_format,
                secondary_secs,
            )?),
            _ => None,
        };
        Ok((primary, secondary))
    }

    fn install_sessions(
        &self,
        pipeline: &mut Pipeline,
        generation: u64,
        primary: DecodeSession,
        secondary: Option<DecodeSession>,
        timing: SecondaryTiming,
    ) {
        self.diagnostics.record(PlaybackDiagnostic::SessionOpened {
            slot: StreamSlot::Primary,
            start_secs: primary.time_range().start_secs,
        });
        pipeline.primary_matrix = primary.settings().color.matrix;
        pipeline.scheduler.install(StreamSlot::Primary, primary);

        if let Some(session) = secondary {
            self.diagnostics.record(PlaybackDiagnostic::SessionOpened {
                slot: StreamSlot::Secondary,
                start_secs: session.time_range().start_secs,
            });
            pipeline.secondary_matrix = session.settings().color.matrix;
            pipeline.scheduler.install(StreamSlot::Secondary, session);
        }
        pipeline.scheduler.set_secondary_timing(timing);
        pipeline.generation = generation;
    }

    fn install_initialized(
        self: &Arc<Self>,
        generation: u64,
        request: InitRequest,
        run: OpenedRun,
    ) -> Result<ReadyInfo, PlayerError> {
        let OpenedRun {
            transport,
            primary_info,
            primary,
            secondary,
        } = run;
        let timing = SecondaryTiming::new(
            request.secondary_start_offset_secs,
            request.secondary_seek_offset_secs,
        );
        let (secondary_info, secondary_session) = match secondary {
            Some((info, session)) => (Some(info), Some(session)),
            None => (None, None),
        };

        let ready = ReadyInfo {
            primary_width: primary_info.width,
            primary_height: primary_info.height,
            primary_fps: primary_info.frame_rate.value(),
            secondary_width: secondary_info.as_ref().map_or(0, |info| info.width),
            secondary_height: secondary_info.as_ref().map_or(0, |info| info.height),
            secondary_fps: secondary_info
                .as_ref()
                .map_or(0.0, |info| info.frame_rate.value()),
            pixel_format_tag: self.config.pixel_format().wire_tag(),
        };

        {
            let mut control = lock(&self.control);
            let mut pipeline = lock(&self.pipeline);
            if !self.is_current(generation) {
                return Err(self.stale(generation));
            }
            self.install_sessions(
                &mut pipeline,
                generation,
                primary,
                secondary_session,
                timing,
            );
            drop(pipeline);

            let weak = Arc::downgrade(self);
            transport.set_finish_observer(Some(Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    let current = shared.generation.load(Ordering::SeqCst);
                    shared.complete(current);
                }
            })));
            transport.set_volume(control.volume.value());
            control.tick_interval = primary_info.frame_rate.frame_interval();
            control.tick_token =
                Some(self.subscribe_ticks(&transport, control.tick_interval, generation));
            control.transport = Some(transport);
            control.primary_info = Some(primary_info);
            control.secondary_info = secondary_info;
            control.request = Some(request);
            control.timing = timing;
            control.state = PlaybackState::Ready;
        }

        log::info!(
            "ready: {}x{} @ {:.2} fps, secondary {}x{} @ {:.2} fps",
            ready.primary_width,
            ready.primary_height,
            ready.primary_fps,
            ready.secondary_width,
            ready.secondary_height,
            ready.secondary_fps
        );
        self.emit(&PlayerEvent::Ready(ready));
        Ok(ready)
    }

    fn subscribe_ticks(
        self: &Arc<Self>,
        transport: &Arc<dyn AudioTransport>,
        interval: Duration,
        generation: u64,
    ) -> ObserverToken {
        let weak: Weak<Self> = Arc::downgrade(self);
        transport.add_periodic_observer(
            interval,
            Arc::new(move |audio_secs| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_tick(generation, audio_secs);
                }
            }),
        )
    }

    fn on_tick(&self, generation: u64, audio_secs: f64) {
        if !self.is_current(generation) {
            return;
        }

        let completed = {
            let mut pipeline = lock(&self.pipeline);
            let preview = self.config.preview() && pipeline.drawables.is_some();
            if pipeline.generation != generation || (!preview && pipeline.destinations.is_none()) {
                return;
            }
            pipeline.stats.ticks += 1;
            match pipeline.scheduler.tick(audio_secs) {
                TickOutcome::Completed(slot) => Some(slot),
                TickOutcome::Frames(frames) => {
                    self.deliver(&mut pipeline, frames, preview);
                    None
                }
            }
        };

        if let Some(slot) = completed {
            log::info!("{:?} stream completed at {:.3}s", slot, audio_secs);
            self.complete(generation);
        }
    }

    fn deliver(&self, pipeline: &mut Pipeline, frames: TickFrames, preview: bool) {
        let report = frames.report;
        let stats = &mut pipeline.stats;
        stats.lag_skips += u64::from(report.lag_discarded);
        stats.holds += u64::from(report.held);
        stats.dropped_ahead += u64::from(report.dropped_ahead);
        stats.underruns += u64::from(report.underruns);

        let primary_matrix = pipeline.primary_matrix;
        let secondary_matrix = pipeline.secondary_matrix;
        let primary = frames
            .primary
            .and_then(|frame| self.surfaces(pipeline, StreamSlot::Primary, &frame, primary_matrix));
        let secondary = frames.secondary.and_then(|frame| {
            self.surfaces(pipeline, StreamSlot::Secondary, &frame, secondary_matrix)
        });

        if preview {
            if let (Some(stream), Some(drawables)) = (primary.as_ref(), pipeline.drawables.clone()) {
                let frame = pipeline
                    .compositor
                    .composite_preview(&stream.pair, drawables.as_ref());
                if self.submit(pipeline, frame.batch) {
                    for (eye, drawable) in frame.drawables {
                        drawables.present(eye, drawable);
                    }
                }
            }
            return;
        }

        if let Some(destinations) = pipeline.destinations {
            let batch =
                pipeline
                    .compositor
                    .composite(primary.as_ref(), secondary.as_ref(), &destinations);
            self.submit(pipeline, batch);
        }
    }

    /// Resolves the eye surfaces of a delivered frame. Failures skip the frame.
    fn surfaces(
        &self,
        pipeline: &mut Pipeline,
        slot: StreamSlot,
        frame: &FrameSample,
        matrix: YcbcrMatrix,
    ) -> Option<StreamSurfaces> {
        match extract(frame, &mut pipeline.texture_cache) {
            Ok(pair) => {
                let stats = &mut pipeline.stats;
                match slot {
                    StreamSlot::Primary => {
                        stats.primary_frames += 1;
                        stats.last_primary_pts = Some(frame.pts_secs);
                    }
                    StreamSlot::Secondary => {
                        stats.secondary_frames += 1;
                        stats.last_secondary_pts = Some(frame.pts_secs);
                    }
                }
                Some(StreamSurfaces { pair, matrix })
            }
            Err(ExtractError::Texture(e)) => {
                log::warn!("{:?}: texture conversion failed at {:.3}s: {}", slot, frame.pts_secs, e);
                pipeline.stats.conversion_failures += 1;
                self.diagnostics.record(PlaybackDiagnostic::ConversionFailed {
                    slot,
                    message: e.to_string(),
                });
                None
            }
            Err(e) => {
                log::warn!("{:?}: frame at {:.3}s dropped: {}", slot, frame.pts_secs, e);
                pipeline.stats.extraction_failures += 1;
                self.diagnostics.record(PlaybackDiagnostic::ExtractionFailed {
                    slot,
                    message: e.to_string(),
                });
                None
            }
        }
    }

    fn submit(&self, pipeline: &mut Pipeline, batch: crate::application::port::CommandBatch) -> bool {
        match self.submitter.submit(batch) {
            Ok(()) => true,
            Err(e) => {
                pipeline.stats.submission_failures += 1;
                self.diagnostics.record(PlaybackDiagnostic::SubmissionFailed {
                    message: e.to_string(),
                });
                false
            }
        }
    }

    /// Ends the run of `generation`. Only the first call per run has effect.
    fn complete(&self, generation: u64) {
        if !self.is_current(generation) || self.completion_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut control = lock(&self.control);
            control.stop_ticks();
            control.state = PlaybackState::Completed;

            let mut pipeline = lock(&self.pipeline);
            pipeline.scheduler.cancel_all();
            pipeline.texture_cache.invalidate();
        }
        log::info!("playback completed");
        self.emit(&PlayerEvent::Completed);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
        control.stop_ticks();
        if let Some(transport) = control.transport.take() {
            transport.set_finish_observer(None);
        }
    }
}
