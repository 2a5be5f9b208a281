// SPDX-License-Identifier: MPL-2.0
//! Application layer - Port definitions.
//!
//! - [`port`]: Trait definitions (interfaces) for dependency inversion
//!
//! # Dependency Rule
//!
//! - Application layer depends on domain layer (uses domain types)
//! - Infrastructure layer implements application layer ports
//! - The playback core in [`crate::video_player`] depends only on ports
//!
//! # Example
//!
//! ```ignore
//! use spatial_player::application::port::MediaBackend;
//!
//! // Infrastructure implements the port trait
//! struct FileBackend { /* ... */ }
//! impl MediaBackend for FileBackend { /* ... */ }
//! ```

pub mod port;
