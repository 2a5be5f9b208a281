// SPDX-License-Identifier: MPL-2.0
//! Headless playback run over a generated clip.
//!
//! ```text
//! spatial_player [--secs N] [--fps N] [--mono] [--preview] [--second-stream] [CONFIG]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use spatial_player::application::port::{PresentationContext, TextureFormat};
use spatial_player::config::{self, OutputFormat, PlayerConfig};
use spatial_player::error::{Error, Result};
use spatial_player::infrastructure::{HeadlessDrawables, HeadlessGpu, SyntheticBackend, SyntheticSource};
use spatial_player::video_player::{Destinations, InitRequest, SpatialPlayer};

struct Flags {
    secs: f64,
    fps: f64,
    mono: bool,
    preview: bool,
    second_stream: bool,
    config_path: Option<PathBuf>,
}

fn parse_flags() -> Result<Flags> {
    let mut args = pico_args::Arguments::from_env();
    let bad = |e: pico_args::Error| Error::Config(e.to_string());

    Ok(Flags {
        secs: args.opt_value_from_str("--secs").map_err(bad)?.unwrap_or(3.0),
        fps: args.opt_value_from_str("--fps").map_err(bad)?.unwrap_or(30.0),
        mono: args.contains("--mono"),
        preview: args.contains("--preview"),
        second_stream: args.contains("--second-stream"),
        config_path: args
            .finish()
            .into_iter()
            .next()
            .map(PathBuf::from),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let flags = parse_flags()?;

    let mut config: PlayerConfig = match flags.config_path.as_deref() {
        Some(path) => config::load_from_path(path)?,
        None => config::load().unwrap_or_default(),
    };
    config.output_format.get_or_insert(OutputFormat::Bgra8);
    if flags.preview {
        config.preview = Some(true);
    }

    let (width, height) = (1280, 720);
    let backend = Arc::new(SyntheticBackend::new());
    let gpu = HeadlessGpu::new();
    let source = if flags.mono {
        SyntheticSource::mono(width, height, flags.fps, flags.secs)
    } else {
        SyntheticSource::stereo(width, height, flags.fps, flags.secs)
    };
    let primary = backend.register("primary", source.clone());
    let mut request = InitRequest::new(primary);
    if flags.second_stream {
        let secondary = backend.register("secondary", source);
        request = request.with_secondary(secondary, flags.secs / 3.0, 0.0);
    }

    let player = SpatialPlayer::new(
        backend.clone(),
        Arc::new(gpu.clone()),
        PresentationContext::default(),
        config,
    )?;
    player.on_complete(|| log::info!("playback finished"));

    if flags.preview {
        player.set_drawable_source(Arc::new(HeadlessDrawables::new(&gpu, height, height)));
    } else {
        let target = || gpu.create_texture(width, height, TextureFormat::Bgra8Unorm).into();
        player.set_destination_surfaces(Destinations {
            primary_left: target(),
            primary_right: target(),
            secondary_left: Some(target()),
            secondary_right: Some(target()),
        });
    }

    let ready = player.init_player(request).await?;
    log::info!(
        "{}x{} @ {:.2} fps ({})",
        ready.primary_width,
        ready.primary_height,
        ready.primary_fps,
        player
            .video_info()
            .map_or_else(String::new, |info| info.projection_string())
    );
    player.play()?;

    let clock = backend
        .transport()
        .ok_or_else(|| Error::Config("backend created no transport".into()))?;
    let step = std::time::Duration::from_secs_f64(1.0 / ready.primary_fps);
    while player.state().is_playing() {
        clock.advance(step);
    }

    let stats = player.stats();
    println!("ticks:              {}", stats.ticks);
    println!("primary frames:     {}", stats.primary_frames);
    println!("secondary frames:   {}", stats.secondary_frames);
    println!("lag skips:          {}", stats.lag_skips);
    println!("holds:              {}", stats.holds);
    println!("underruns:          {}", stats.underruns);
    println!("size mismatches:    {}", stats.size_mismatches);
    println!("texture hit rate:   {:.1}%", stats.texture_cache.hit_rate());
    println!("batches submitted:  {}", gpu.submitted_batches());
    println!("{}", player.diagnostics().export_toml()?);
    Ok(())
}
