// SPDX-License-Identifier: MPL-2.0
//! Centralized default values for all configuration constants.
//!
//! This module serves as the single source of truth for default values
//! used across the crate. Constants are organized by category.
//!
//! # Categories
//!
//! - **Sync**: Drift tolerance and frame rate fallback
//! - **Volume**: Audio playback volume settings
//! - **Texture Cache**: Converted GPU textures kept alive
//! - **Diagnostics**: Playback diagnostics ring buffer

// ==========================================================================
// Sync Defaults
// ==========================================================================

/// Default drift tolerance between a frame and the audio clock (in seconds).
pub const DEFAULT_DRIFT_THRESHOLD_SECS: f64 = 0.1;

/// Frame rate substituted when a source reports a non-positive rate.
pub const DEFAULT_FALLBACK_FPS: f64 = 30.0;

// ==========================================================================
// Volume Defaults
// ==========================================================================

/// Default playback volume (0.0 to 1.0).
pub const DEFAULT_VOLUME: f32 = 1.0;

/// Minimum volume level.
pub const MIN_VOLUME: f32 = 0.0;

/// Maximum volume level.
pub const MAX_VOLUME: f32 = 1.0;

// ==========================================================================
// Texture Cache Defaults
// ==========================================================================

/// Default number of converted plane textures kept alive.
pub const DEFAULT_TEXTURE_CACHE_ENTRIES: usize = 32;

/// Minimum texture cache size.
pub const MIN_TEXTURE_CACHE_ENTRIES: usize = 8;

/// Maximum texture cache size.
pub const MAX_TEXTURE_CACHE_ENTRIES: usize = 256;

// ==========================================================================
// Diagnostics Defaults
// ==========================================================================

/// Default number of playback diagnostics retained.
pub const DEFAULT_DIAGNOSTICS_BUFFER_CAPACITY: usize = 256;

/// Minimum diagnostics buffer capacity.
pub const MIN_DIAGNOSTICS_BUFFER_CAPACITY: usize = 16;

/// Maximum diagnostics buffer capacity.
pub const MAX_DIAGNOSTICS_BUFFER_CAPACITY: usize = 4096;
