// SPDX-License-Identifier: MPL-2.0
//! This module handles the player configuration, including loading and saving
//! tuning knobs to a `settings.toml` file.
//!
//! Every field is optional in the file; accessors fall back to the values in
//! [`defaults`] and clamp to the valid ranges of the matching newtypes.
//!
//! # Examples
//!
//! ```no_run
//! use spatial_player::config::{self, PlayerConfig};
//!
//! // Load existing configuration
//! let mut config = config::load().unwrap_or_default();
//!
//! // Tighten the drift tolerance
//! config.drift_threshold_secs = Some(0.05);
//!
//! // Save the modified configuration
//! config::save(&config).expect("Failed to save config");
//! ```

pub mod defaults;

pub use defaults::*;

use crate::domain::diagnostics::BufferCapacity;
use crate::domain::video::{DriftThreshold, PixelFormat, TextureCacheCapacity, Volume};
use crate::error::{Error, Result};
use crate::video_player::{AheadPolicy, MonoPolicy, RenderMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "settings.toml";
const APP_NAME: &str = "SpatialPlayer";

/// Pixel format requested from the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// 16-bit float RGBA, the production output.
    #[default]
    RgbaHalf,
    /// 8-bit BGRA, cheaper for previews and tests.
    Bgra8,
    /// 8-bit 4:2:0 luma/chroma planes.
    Ycbcr420,
    /// 10-bit 4:2:0 luma/chroma planes.
    Ycbcr420TenBit,
}

impl OutputFormat {
    #[must_use]
    pub fn pixel_format(self) -> PixelFormat {
        match self {
            OutputFormat::RgbaHalf => PixelFormat::RgbaHalf,
            OutputFormat::Bgra8 => PixelFormat::Bgra8,
            OutputFormat::Ycbcr420 => PixelFormat::Ycbcr420,
            OutputFormat::Ycbcr420TenBit => PixelFormat::Ycbcr420TenBit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub drift_threshold_secs: Option<f64>,
    #[serde(default)]
    pub default_fps: Option<f64>,
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
    #[serde(default)]
    pub ahead_policy: Option<AheadPolicy>,
    #[serde(default)]
    pub mono_policy: Option<MonoPolicy>,
    #[serde(default)]
    pub render_mode: Option<RenderMode>,
    /// Route output to per-eye drawables with a center crop.
    #[serde(default)]
    pub preview: Option<bool>,
    #[serde(default)]
    pub texture_cache_entries: Option<usize>,
    #[serde(default)]
    pub diagnostics_capacity: Option<usize>,
    #[serde(default)]
    pub volume: Option<f32>,
}

impl PlayerConfig {
    #[must_use]
    pub fn drift_threshold(&self) -> DriftThreshold {
        DriftThreshold::new(
            self.drift_threshold_secs
                .unwrap_or(DEFAULT_DRIFT_THRESHOLD_SECS),
        )
    }

    #[must_use]
    pub fn fallback_fps(&self) -> f64 {
        self.default_fps.unwrap_or(DEFAULT_FALLBACK_FPS)
    }

    #[must_use]
    pub fn pixel_format(&self) -> PixelFormat {
        self.output_format.unwrap_or_default().pixel_format()
    }

    #[must_use]
    pub fn ahead_policy(&self) -> AheadPolicy {
        self.ahead_policy.unwrap_or_default()
    }

    #[must_use]
    pub fn mono_policy(&self) -> MonoPolicy {
        self.mono_policy.unwrap_or_default()
    }

    #[must_use]
    pub fn render_mode(&self) -> RenderMode {
        self.render_mode.unwrap_or_default()
    }

    #[must_use]
    pub fn preview(&self) -> bool {
        self.preview.unwrap_or(false)
    }

    #[must_use]
    pub fn texture_cache_capacity(&self) -> TextureCacheCapacity {
        TextureCacheCapacity::new(
            self.texture_cache_entries
                .unwrap_or(DEFAULT_TEXTURE_CACHE_ENTRIES),
        )
    }

    #[must_use]
    pub fn diagnostics_capacity(&self) -> BufferCapacity {
        BufferCapacity::new(
            self.diagnostics_capacity
                .unwrap_or(DEFAULT_DIAGNOSTICS_BUFFER_CAPACITY),
        )
    }

    #[must_use]
    pub fn volume(&self) -> Volume {
        Volume::new(self.volume.unwrap_or(DEFAULT_VOLUME))
    }
}

fn get_default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push(APP_NAME);
        path.push(CONFIG_FILE);
        path
    })
}

pub fn load() -> Result<PlayerConfig> {
    if let Some(path) = get_default_config_path() {
        if path.exists() {
            return load_from_path(&path);
        }
    }
    Ok(PlayerConfig::default())
}

pub fn save(config: &PlayerConfig) -> Result<()> {
    if let Some(path) = get_default_config_path() {
        return save_to_path(config, &path);
    }
    Ok(())
}

/// Reads a config file. Unparseable content yields the defaults.
pub fn load_from_path(path: &Path) -> Result<PlayerConfig> {
    let content = fs::read_to_string(path)?;
    match toml::from_str(&content) {
        Ok(config) => Ok(config),
        Err(err) => {
            log::warn!("ignoring invalid config at {}: {}", path.display(), err);
            Ok(PlayerConfig::default())
        }
    }
}

pub fn save_to_path(config: &PlayerConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config).map_err(Error::from)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::video::newtypes::drift_threshold_bounds;
    use crate::test_utils::assert_abs_diff_eq;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip_preserves_fields() {
        let config = PlayerConfig {
            drift_threshold_secs: Some(0.05),
            output_format: Some(OutputFormat::Bgra8),
            ahead_policy: Some(AheadPolicy::Drop),
            mono_policy: Some(MonoPolicy::BothEyes),
            preview: Some(true),
            ..PlayerConfig::default()
        };
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        save_to_path(&config, &config_path).expect("failed to save config");
        let loaded = load_from_path(&config_path).expect("failed to load config");

        assert_eq!(loaded, config);
    }

    #[test]
    fn load_from_path_returns_default_on_invalid_toml() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "not = valid = toml").expect("failed to write invalid toml");

        let loaded = load_from_path(&config_path).expect("load should not error");
        assert_eq!(loaded, PlayerConfig::default());
    }

    #[test]
    fn load_from_missing_path_is_an_io_error() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let result = load_from_path(&temp_dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn snake_case_enum_values_parse() {
        let config: PlayerConfig = toml::from_str(
            "output_format = \"rgba_half\"\nahead_policy = \"hold\"\nrender_mode = \"ycbcr_convert\"\nmono_policy = \"left_only\"\n",
        )
        .expect("valid toml");
        assert_eq!(config.pixel_format(), PixelFormat::RgbaHalf);
        assert_eq!(config.ahead_policy(), AheadPolicy::Hold);
        assert_eq!(config.render_mode(), RenderMode::YcbcrConvert);
        assert_eq!(config.mono_policy(), MonoPolicy::LeftOnly);
    }

    #[test]
    fn accessors_fall_back_to_defaults() {
        let config = PlayerConfig::default();
        assert_abs_diff_eq!(config.drift_threshold().secs(), DEFAULT_DRIFT_THRESHOLD_SECS);
        assert_abs_diff_eq!(config.fallback_fps(), DEFAULT_FALLBACK_FPS);
        assert_eq!(config.pixel_format(), PixelFormat::RgbaHalf);
        assert!(!config.preview());
        assert_eq!(
            config.texture_cache_capacity().value(),
            DEFAULT_TEXTURE_CACHE_ENTRIES
        );
        assert_abs_diff_eq!(config.volume().value(), DEFAULT_VOLUME);
    }

    #[test]
    fn accessors_clamp_out_of_range_values() {
        let config = PlayerConfig {
            drift_threshold_secs: Some(-1.0),
            texture_cache_entries: Some(1),
            diagnostics_capacity: Some(1_000_000),
            volume: Some(3.0),
            ..PlayerConfig::default()
        };
        assert_abs_diff_eq!(config.drift_threshold().secs(), drift_threshold_bounds::MIN);
        assert_eq!(
            config.texture_cache_capacity().value(),
            MIN_TEXTURE_CACHE_ENTRIES
        );
        assert_eq!(
            config.diagnostics_capacity().value(),
            MAX_DIAGNOSTICS_BUFFER_CAPACITY
        );
        assert_abs_diff_eq!(config.volume().value(), MAX_VOLUME);
    }

    #[test]
    fn defaults_match_domain_bounds() {
        use crate::domain::diagnostics::buffer_capacity_bounds;
        use crate::domain::video::newtypes::{texture_cache_bounds, volume_bounds};

        assert_eq!(buffer_capacity_bounds::MIN, MIN_DIAGNOSTICS_BUFFER_CAPACITY);
        assert_eq!(buffer_capacity_bounds::MAX, MAX_DIAGNOSTICS_BUFFER_CAPACITY);
        assert_eq!(texture_cache_bounds::DEFAULT, DEFAULT_TEXTURE_CACHE_ENTRIES);
        assert_abs_diff_eq!(volume_bounds::DEFAULT, DEFAULT_VOLUME);
    }
}
