// SPDX-License-Identifier: MPL-2.0
//! `spatial_player` plays stereoscopic ("spatial") video in sync with its
//! audio track.
//!
//! Decoded frames are split into left and right eye surfaces, paced against
//! the audio clock and copied into textures owned by the host renderer. An
//! optional second spatial stream plays alongside the first with its own
//! start offset.
//!
//! # Layers
//!
//! - [`domain`]: frame, stream and playback value types
//! - [`application`]: ports for decoders, the audio clock and the GPU
//! - [`video_player`]: the playback core and [`video_player::SpatialPlayer`]
//! - [`infrastructure`]: adapters implementing the ports
//! - [`config`] and [`diagnostics`]: tuning knobs and anomaly records

#![doc(html_root_url = "https://docs.rs/spatial_player/0.3.0")]

pub mod application;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod video_player;

#[cfg(test)]
pub(crate) mod test_utils;
