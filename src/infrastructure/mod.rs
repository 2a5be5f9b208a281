// SPDX-License-Identifier: MPL-2.0
//! Infrastructure layer adapters.
//!
//! This module contains concrete implementations of the port traits defined in
//! `application::port`.
//!
//! # Available Adapters
//!
//! - [`clock`]: Software audio transport (implements [`AudioTransport`])
//! - [`headless`]: CPU texture device (implements [`GpuDevice`])
//! - [`synthetic`]: Generated clips (implements [`MediaBackend`])
//! - `wgpu_device`: Hardware textures and render passes via `wgpu` (feature `wgpu`)
//! - `ffmpeg`: File decoding via `FFmpeg` (feature `ffmpeg`)
//!
//! [`AudioTransport`]: crate::application::port::AudioTransport
//! [`GpuDevice`]: crate::application::port::GpuDevice
//! [`MediaBackend`]: crate::application::port::MediaBackend

pub mod clock;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod headless;
pub mod synthetic;
#[cfg(feature = "wgpu")]
pub mod wgpu_device;

pub use clock::ClockTransport;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegBackend;
pub use headless::{HeadlessDrawables, HeadlessGpu};
pub use synthetic::{SyntheticBackend, SyntheticSource};
#[cfg(feature = "wgpu")]
pub use wgpu_device::WgpuDevice;
