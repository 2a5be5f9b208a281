// SPDX-License-Identifier: MPL-2.0
//! Port definitions (traits) for dependency inversion.
//!
//! This module defines abstract interfaces that infrastructure adapters implement.
//! These traits use only domain types, ensuring the playback core remains
//! independent of concrete decoders, audio stacks and GPU APIs.
//!
//! # Available Ports
//!
//! - [`media`]: Source probing, track readers and audio transport creation
//! - [`transport`]: The audio clock that drives playback
//! - [`gpu`]: Texture conversion, command submission and preview drawables
//!
//! # Design Notes
//!
//! - Traits are `Send + Sync` where they are shared across threads
//! - Readers and converters are `Send` only; one owner mutates them
//! - No `async fn`: the controller moves blocking calls onto tokio's blocking pool

pub mod gpu;
pub mod media;
pub mod transport;

pub use gpu::{
    CommandBatch, DrawableSource, GpuCommand, GpuDevice, TextureConverter, TextureFormat,
    TextureHandle, TextureId,
};
pub use media::{
    MediaBackend, OutputSettings, PresentationContext, ReaderStatus, SourceLocator, SourceProbe,
    TimeRange, TrackReader,
};
pub use transport::{AudioTransport, FinishCallback, ObserverToken, TickCallback};
