// SPDX-License-Identifier: MPL-2.0
//! Domain layer - Core playback types with ZERO external dependencies.
//!
//! This module contains pure domain types, value objects, and business rules.
//! It has no dependencies on external crates (except `std`) to ensure
//! testability and architectural purity.
//!
//! # Modules
//!
//! - [`diagnostics`]: Diagnostics types ([`BufferCapacity`](diagnostics::BufferCapacity))
//! - [`video`]: Video playback types ([`PlaybackState`](video::PlaybackState),
//!   [`VideoInfo`](video::VideoInfo), [`FrameSample`](video::FrameSample),
//!   [`Volume`](video::Volume), [`FrameRate`](video::FrameRate))

pub mod diagnostics;
pub mod video;
