// SPDX-License-Identifier: MPL-2.0
//! Video playback domain types.
//!
//! This module contains video-related value objects and enums that are
//! independent of any presentation or infrastructure concerns.

pub mod frame;
pub mod info;
pub mod newtypes;
pub mod playback;

// Re-export commonly used types
pub use frame::{
    BufferTag, Eye, FrameImage, FrameSample, PixelBuffer, PixelFormat, PixelPlane, TaggedBuffer,
};
pub use info::{
    ColorDescription, ColorPrimaries, Projection, TransferFunction, VideoInfo, YcbcrCoefficients,
    YcbcrMatrix,
};
pub use newtypes::{DriftThreshold, FrameRate, TextureCacheCapacity, Volume};
pub use playback::PlaybackState;
