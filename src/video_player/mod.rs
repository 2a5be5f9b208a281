// SPDX-License-Identifier: MPL-2.0
//! Stereoscopic video playback engine.
//!
//! Decoded frames are paced against an audio clock and copied per eye into
//! host-provided textures. A second stream can play alongside the first on a
//! clock offset from it.
//!
//! - [`session`]: one decode session per stream
//! - [`extractor`]: per-eye surfaces from decoded samples
//! - [`texture_cache`]: pixel buffers resolved to GPU textures
//! - [`scheduler`]: frame selection against the audio clock
//! - [`compositor`]: per-tick copy and conversion commands
//! - [`state`]: the host-facing [`SpatialPlayer`]

pub mod compositor;
pub mod extractor;
pub mod scheduler;
pub mod session;
mod state;
pub mod submission;
pub mod sync;
pub mod texture_cache;
pub mod time_units;

pub use compositor::{
    center_crop, Compositor, Destinations, MonoPolicy, PreviewFrame, RenderMode, StreamSurfaces,
    SurfaceTarget,
};
pub use extractor::{extract, EyeSurfacePair, Surface};
pub use scheduler::{AheadPolicy, SyncScheduler, TickFrames, TickOutcome, TickReport};
pub use session::{DecodeSession, NextFrame};
pub use state::{InitRequest, PlaybackStats, PlayerEvent, ReadyInfo, SpatialPlayer};
pub use submission::SubmissionWorker;
pub use sync::{calculate_sync_action, SecondaryTiming, SyncAction};
pub use texture_cache::{CacheStats, TextureCache};
