// SPDX-License-Identifier: MPL-2.0
//! End-to-end playback tests.
//!
//! Every test drives a [`SpatialPlayer`] over generated clips, a manually
//! advanced audio clock and the CPU texture device, then inspects the bytes
//! that reached the destination textures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use spatial_player::application::port::{PresentationContext, TextureFormat, TextureHandle};
use spatial_player::config::{OutputFormat, PlayerConfig};
use spatial_player::diagnostics::{PlaybackDiagnostic, StreamSlot};
use spatial_player::domain::video::{Eye, PlaybackState};
use spatial_player::error::{PlayerError, SessionError};
use spatial_player::infrastructure::clock::ClockTransport;
use spatial_player::infrastructure::synthetic::{
    stamped_index, stamped_mark, LEFT_MARK, MONO_MARK, RIGHT_MARK,
};
use spatial_player::infrastructure::{
    HeadlessDrawables, HeadlessGpu, SyntheticBackend, SyntheticSource,
};
use spatial_player::video_player::{Destinations, InitRequest, RenderMode, SpatialPlayer};

struct Rig {
    backend: Arc<SyntheticBackend>,
    gpu: HeadlessGpu,
    player: SpatialPlayer,
}

impl Rig {
    fn new() -> Self {
        Self::with_config(PlayerConfig {
            output_format: Some(OutputFormat::Bgra8),
            ..PlayerConfig::default()
        })
    }

    fn with_config(config: PlayerConfig) -> Self {
        let backend = Arc::new(SyntheticBackend::new());
        let gpu = HeadlessGpu::new();
        let player = SpatialPlayer::new(
            backend.clone(),
            Arc::new(gpu.clone()),
            PresentationContext::default(),
            config,
        )
        .expect("player starts");
        Self {
            backend,
            gpu,
            player,
        }
    }

    fn texture(&self, width: u32, height: u32) -> TextureHandle {
        self.gpu.create_texture(width, height, TextureFormat::Bgra8Unorm)
    }

    /// Sets four destinations of `width` x `height` and returns them.
    fn attach(&self, width: u32, height: u32) -> Destinations {
        let destinations = Destinations {
            primary_left: self.texture(width, height).into(),
            primary_right: self.texture(width, height).into(),
            secondary_left: Some(self.texture(width, height).into()),
            secondary_right: Some(self.texture(width, height).into()),
        };
        self.player.set_destination_surfaces(destinations);
        destinations
    }

    fn clock(&self) -> Arc<ClockTransport> {
        self.backend.transport().expect("transport created")
    }

    fn read(&self, texture: TextureHandle) -> Vec<u8> {
        self.gpu.read_texture(texture).expect("texture exists")
    }
}

fn ticks(clock: &ClockTransport, count: u32, interval: Duration) {
    for _ in 0..count {
        clock.advance(interval);
    }
}

const TENTH: Duration = Duration::from_millis(100);

#[tokio::test]
async fn non_positive_frame_rate_reports_thirty_fps() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("zero-fps", SyntheticSource::stereo(64, 32, 0.0, 2.0));

    let ready = rig
        .player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");

    assert_eq!((ready.primary_width, ready.primary_height), (64, 32));
    assert_abs_diff_eq!(ready.primary_fps, 30.0);
}

#[tokio::test]
async fn ready_reports_both_streams() {
    let rig = Rig::new();
    let primary = rig
        .backend
        .register("primary", SyntheticSource::stereo(64, 32, 24.0, 2.0));
    let secondary = rig
        .backend
        .register("secondary", SyntheticSource::stereo(32, 16, 25.0, 2.0));

    let ready = rig
        .player
        .init_player(InitRequest::new(primary).with_secondary(secondary, 0.5, 0.0))
        .await
        .expect("init");

    assert_eq!((ready.secondary_width, ready.secondary_height), (32, 16));
    assert_abs_diff_eq!(ready.secondary_fps, 25.0);
    assert_eq!(
        ready.pixel_format_tag,
        rig.player.config().pixel_format().wire_tag()
    );
}

#[tokio::test]
async fn ten_ticks_deliver_ten_increasing_frames() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("hd", SyntheticSource::mono(1280, 720, 30.0, 5.0));
    let destinations = rig.attach(1280, 720);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");

    let interval = Duration::from_secs_f64(1.0 / 30.0);
    let mut indices = Vec::new();
    for _ in 0..10 {
        rig.clock().advance(interval);
        let bytes = rig.read(destinations.primary_left.texture);
        indices.push(stamped_index(&bytes).expect("stamped"));
        assert_eq!(stamped_mark(&bytes), Some(MONO_MARK));
    }

    let stats = rig.player.stats();
    assert_eq!(stats.ticks, 10);
    assert_eq!(stats.primary_frames, 10);
    assert_eq!(stats.lag_skips, 0);
    assert!(
        indices.windows(2).all(|pair| pair[0] < pair[1]),
        "frame indices must increase: {indices:?}"
    );
}

/// Video-range BT.709 luma with neutral chroma, as the CPU device converts it.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn grey_from_luma(luma: u8) -> u8 {
    let y = (f32::from(luma) - 16.0) / 219.0;
    let r = y + 1.793 * (128.0 / 255.0 - 0.5);
    (r.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[tokio::test]
async fn planar_frames_are_converted_to_rgb_on_the_way_out() {
    let rig = Rig::with_config(PlayerConfig {
        output_format: Some(OutputFormat::Ycbcr420),
        render_mode: Some(RenderMode::YcbcrConvert),
        ..PlayerConfig::default()
    });
    let locator = rig
        .backend
        .register("planar", SyntheticSource::stereo(8, 8, 10.0, 3.0));
    let destinations = rig.attach(8, 8);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");

    rig.clock().advance(TENTH);

    let stats = rig.player.stats();
    assert_eq!(stats.primary_frames, 1);
    assert_eq!(stats.size_mismatches, 0);
    assert_eq!(stats.submission_failures, 0);
    for (texture, mark) in [
        (destinations.primary_left.texture, LEFT_MARK),
        (destinations.primary_right.texture, RIGHT_MARK),
    ] {
        let expected = grey_from_luma(mark);
        let pixels = rig.read(texture);
        assert_eq!(pixels.len(), 8 * 8 * 4);
        // The first row carries the frame index stamp.
        for pixel in pixels[8 * 4..].chunks(4) {
            assert!(pixel[0].abs_diff(expected) <= 2, "{pixel:?} vs {expected}");
            assert!(pixel[1].abs_diff(expected) <= 2, "{pixel:?} vs {expected}");
            assert!(pixel[2].abs_diff(expected) <= 2, "{pixel:?} vs {expected}");
            assert_eq!(pixel[3], 255);
        }
    }
    assert_ne!(grey_from_luma(LEFT_MARK), grey_from_luma(RIGHT_MARK));
}

#[tokio::test]
async fn frames_ahead_of_the_clock_are_held() {
    let rig = Rig::new();
    let locator = rig.backend.register(
        "ahead",
        SyntheticSource::stereo(8, 8, 10.0, 3.0).with_pts_offset(0.3),
    );
    rig.attach(8, 8);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");

    rig.clock().advance(TENTH);
    let stats = rig.player.stats();
    assert_eq!(stats.primary_frames, 0);
    assert_eq!(stats.holds, 1);

    rig.clock().advance(TENTH);
    let stats = rig.player.stats();
    assert_eq!(stats.primary_frames, 1);
    assert_abs_diff_eq!(stats.last_primary_pts.expect("delivered"), 0.3, epsilon = 1e-9);
}

#[tokio::test]
async fn late_frames_are_discarded_until_caught_up() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("late", SyntheticSource::stereo(8, 8, 10.0, 3.0));
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");

    // Without destinations nothing is pulled, so the stream falls behind.
    ticks(&rig.clock(), 2, TENTH);
    let destinations = rig.attach(8, 8);
    rig.clock().advance(TENTH);

    let stats = rig.player.stats();
    assert_eq!(stats.lag_skips, 3);
    assert_eq!(stats.primary_frames, 1);
    assert_abs_diff_eq!(stats.last_primary_pts.expect("delivered"), 0.3, epsilon = 1e-9);
    assert_eq!(
        stamped_index(&rig.read(destinations.primary_left.texture)),
        Some(3)
    );
}

#[tokio::test]
async fn eyes_are_routed_by_tag_not_position() {
    let rig = Rig::new();
    let locator = rig.backend.register(
        "swapped",
        SyntheticSource::stereo(8, 8, 10.0, 2.0).right_eye_first(),
    );
    let destinations = rig.attach(8, 8);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");
    rig.clock().advance(TENTH);

    let left = rig.read(destinations.primary_left.texture);
    let right = rig.read(destinations.primary_right.texture);
    assert_eq!(stamped_mark(&left), Some(LEFT_MARK));
    assert_eq!(stamped_mark(&right), Some(RIGHT_MARK));
    assert_eq!(stamped_index(&left), stamped_index(&right));
}

#[tokio::test]
async fn mono_frames_fill_only_the_left_eye_by_default() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("mono", SyntheticSource::mono(8, 8, 10.0, 2.0));
    let destinations = rig.attach(8, 8);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");
    rig.clock().advance(TENTH);

    assert_eq!(
        stamped_mark(&rig.read(destinations.primary_left.texture)),
        Some(MONO_MARK)
    );
    assert!(rig
        .read(destinations.primary_right.texture)
        .iter()
        .all(|&byte| byte == 0));
}

#[tokio::test]
async fn missing_eye_drops_the_frame() {
    let rig = Rig::new();
    let locator = rig.backend.register(
        "one-eyed",
        SyntheticSource::stereo(8, 8, 10.0, 2.0).missing_right_eye(),
    );
    let destinations = rig.attach(8, 8);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");
    ticks(&rig.clock(), 3, TENTH);

    let stats = rig.player.stats();
    assert_eq!(stats.primary_frames, 0);
    assert_eq!(stats.extraction_failures, 3);
    assert!(rig
        .read(destinations.primary_left.texture)
        .iter()
        .all(|&byte| byte == 0));
    assert_eq!(rig.player.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn size_mismatch_skips_the_copy_and_keeps_playing() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("small", SyntheticSource::stereo(8, 8, 10.0, 2.0));
    rig.attach(16, 16);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");
    ticks(&rig.clock(), 2, TENTH);

    let stats = rig.player.stats();
    assert_eq!(stats.ticks, 2);
    assert_eq!(stats.size_mismatches, 4);
    assert_eq!(
        rig.player.diagnostics().count(|event| matches!(
            event,
            PlaybackDiagnostic::SizeMismatch { source: (8, 8), destination: (16, 16), .. }
        )),
        4
    );
}

#[tokio::test]
async fn seek_lands_within_one_tick() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("long", SyntheticSource::stereo(8, 8, 10.0, 20.0));
    rig.attach(8, 8);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");
    ticks(&rig.clock(), 3, TENTH);

    rig.player.seek(12.0).await.expect("seek");
    assert_eq!(rig.player.state(), PlaybackState::Playing);
    rig.clock().advance(TENTH);

    assert!((rig.player.current_time() - 12.0).abs() <= 0.1 + 1e-9);
    let pts = rig.player.stats().last_primary_pts.expect("delivered");
    assert!((pts - 12.0).abs() <= 0.1 + 1e-9, "delivered {pts}");
}

#[tokio::test]
async fn secondary_reopens_at_its_matching_local_time() {
    let rig = Rig::new();
    let primary = rig
        .backend
        .register("primary", SyntheticSource::stereo(8, 8, 10.0, 90.0));
    let secondary = rig
        .backend
        .register("secondary", SyntheticSource::stereo(8, 8, 10.0, 90.0));
    rig.attach(8, 8);
    rig.player
        .init_player(InitRequest::new(primary).with_secondary(secondary, 15.0, 15.0))
        .await
        .expect("init");
    rig.player.play().expect("play");

    rig.player.seek(50.0).await.expect("seek");

    let secondary_starts: Vec<f64> = rig
        .player
        .diagnostics()
        .snapshot()
        .into_iter()
        .filter_map(|event| match event {
            PlaybackDiagnostic::SessionOpened {
                slot: StreamSlot::Secondary,
                start_secs,
            } => Some(start_secs),
            _ => None,
        })
        .collect();
    assert_eq!(secondary_starts.len(), 2);
    assert_abs_diff_eq!(secondary_starts[0], 15.0);
    assert_abs_diff_eq!(secondary_starts[1], 50.0);

    rig.clock().advance(TENTH);
    let pts = rig.player.stats().last_secondary_pts.expect("delivered");
    assert!((pts - 50.1).abs() <= 0.1 + 1e-9, "secondary delivered {pts}");
}

#[tokio::test]
async fn pause_twice_equals_pause_once() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("a", SyntheticSource::stereo(8, 8, 10.0, 2.0));
    rig.attach(8, 8);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");
    ticks(&rig.clock(), 2, TENTH);

    rig.player.pause();
    let once = (rig.player.state(), rig.player.current_time(), rig.player.stats());
    rig.player.pause();
    let twice = (rig.player.state(), rig.player.current_time(), rig.player.stats());
    assert_eq!(once, twice);

    // A paused clock fires no ticks.
    ticks(&rig.clock(), 2, TENTH);
    assert_eq!(rig.player.stats().ticks, 2);
}

#[tokio::test]
async fn resume_waits_for_the_transport() {
    let rig = Rig::new();
    let locator = rig.backend.register(
        "buffering",
        SyntheticSource::stereo(8, 8, 10.0, 2.0).with_unready_audio(),
    );
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");
    rig.player.pause();

    assert!(!rig.player.resume());
    assert_eq!(rig.player.state(), PlaybackState::Paused);
}

#[tokio::test]
async fn completion_fires_once_per_run() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("short", SyntheticSource::stereo(8, 8, 10.0, 0.5));
    rig.attach(8, 8);
    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();
    rig.player.on_complete(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");

    ticks(&rig.clock(), 12, TENTH);
    assert_eq!(rig.player.state(), PlaybackState::Completed);
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    rig.player.replay().await.expect("replay");
    assert_eq!(rig.player.state(), PlaybackState::Playing);
    ticks(&rig.clock(), 12, TENTH);
    assert_eq!(completions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unopenable_source_fails_without_frames() {
    let rig = Rig::new();
    let locator = rig.backend.register(
        "stubborn",
        SyntheticSource::stereo(8, 8, 10.0, 2.0).rejecting_output(),
    );
    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = events.clone();
    rig.player
        .subscribe(move |event| sink.lock().expect("lock").push(event.clone()));

    let result = rig.player.init_player(InitRequest::new(locator)).await;

    let expected = PlayerError::Session(SessionError::CannotAttachOutput);
    assert_eq!(result, Err(expected.clone()));
    assert_eq!(rig.player.state(), PlaybackState::Failed);
    assert_eq!(
        *events.lock().expect("lock"),
        vec![spatial_player::video_player::PlayerEvent::Failed(expected)]
    );
    assert_eq!(rig.player.stats().primary_frames, 0);
}

#[tokio::test]
async fn unknown_source_is_unreadable() {
    let rig = Rig::new();

    let result = rig.player.init_player(InitRequest::new("nowhere")).await;

    assert!(matches!(
        result,
        Err(PlayerError::Session(SessionError::SourceUnreadable(_)))
    ));
}

#[tokio::test]
async fn later_init_supersedes_an_earlier_one() {
    let rig = Rig::new();
    let first = rig
        .backend
        .register("first", SyntheticSource::stereo(8, 8, 10.0, 2.0));
    let second = rig
        .backend
        .register("second", SyntheticSource::stereo(16, 8, 10.0, 2.0));

    let (a, b) = tokio::join!(
        rig.player.init_player(InitRequest::new(first)),
        rig.player.init_player(InitRequest::new(second)),
    );

    let b = b.expect("latest init wins");
    assert_eq!(b.primary_width, 16);
    assert!(matches!(a, Ok(_) | Err(PlayerError::Superseded)));
    assert_eq!(rig.player.state(), PlaybackState::Ready);
    assert_eq!(rig.player.video_info().expect("info").width, 16);
}

#[tokio::test]
async fn preview_presents_one_drawable_per_eye() {
    let rig = Rig::with_config(PlayerConfig {
        output_format: Some(OutputFormat::Bgra8),
        preview: Some(true),
        ..PlayerConfig::default()
    });
    let locator = rig
        .backend
        .register("wide", SyntheticSource::stereo(16, 8, 10.0, 2.0));
    let drawables = Arc::new(HeadlessDrawables::new(&rig.gpu, 8, 8));
    rig.player.set_drawable_source(drawables.clone());
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("init");
    rig.player.play().expect("play");
    rig.clock().advance(TENTH);

    let presented: Vec<Eye> = drawables.presented().into_iter().map(|(eye, _)| eye).collect();
    assert_eq!(presented, vec![Eye::Left, Eye::Right]);
    let left = rig.read(drawables.drawable(Eye::Left));
    let right = rig.read(drawables.drawable(Eye::Right));
    assert!(left.chunks(4).all(|px| px == [LEFT_MARK; 4]));
    assert!(right.chunks(4).all(|px| px == [RIGHT_MARK; 4]));
}

#[tokio::test]
async fn volume_is_clamped_and_survives_reinit() {
    let rig = Rig::new();
    let locator = rig
        .backend
        .register("a", SyntheticSource::stereo(8, 8, 10.0, 2.0));
    rig.player.set_volume(-2.0);
    rig.player
        .init_player(InitRequest::new(locator.clone()))
        .await
        .expect("init");
    assert_abs_diff_eq!(rig.player.volume(), 0.0);

    rig.player.set_volume(0.4);
    rig.player
        .init_player(InitRequest::new(locator))
        .await
        .expect("reinit");
    assert_abs_diff_eq!(rig.player.volume(), 0.4);
}
