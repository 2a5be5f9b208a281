// SPDX-License-Identifier: MPL-2.0
//! GPU port definition.
//!
//! This module defines the traits the playback pipeline uses to turn decoded
//! pixel buffers into textures and to submit copy/convert work. Textures are
//! referred to by opaque [`TextureHandle`]s; the device owns the storage.

use crate::domain::video::{Eye, PixelBuffer, YcbcrMatrix};
use crate::error::TextureError;

/// Texel layout of a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Bgra8Unorm,
    Rgba16Float,
    R8Unorm,
    Rg8Unorm,
    R16Unorm,
    Rg16Unorm,
}

impl TextureFormat {
    #[must_use]
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rg8Unorm | TextureFormat::R16Unorm => 2,
            TextureFormat::Bgra8Unorm | TextureFormat::Rg16Unorm => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// Identifier of a texture owned by a [`GpuDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Lightweight reference to a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureHandle {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// A single unit of GPU work.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// Full-texture copy between textures of equal size.
    Copy {
        source: TextureHandle,
        destination: TextureHandle,
    },
    /// Copies `size` texels starting at `origin` of the source into the
    /// top-left corner of the destination.
    CopyRegion {
        source: TextureHandle,
        origin: (u32, u32),
        size: (u32, u32),
        destination: TextureHandle,
    },
    /// Renders luma + chroma planes into an RGB destination.
    ConvertYcbcr {
        luma: TextureHandle,
        chroma: TextureHandle,
        matrix: YcbcrMatrix,
        destination: TextureHandle,
    },
}

/// Commands submitted together and completed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandBatch {
    pub commands: Vec<GpuCommand>,
}

impl CommandBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: GpuCommand) {
        self.commands.push(command);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Converts decoded pixel buffer planes into device textures.
///
/// A converter is not shared: it lives on the tick path only.
pub trait TextureConverter: Send {
    /// Produces a texture of `width` x `height` from plane `plane_index` of `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::ConversionFailed`] if the plane is missing or
    /// its layout does not match `format`.
    fn convert(
        &mut self,
        buffer: &PixelBuffer,
        format: TextureFormat,
        width: u32,
        height: u32,
        plane_index: usize,
    ) -> Result<TextureHandle, TextureError>;

    /// Releases a texture previously returned by `convert`.
    fn release(&mut self, texture: TextureHandle);
}

/// Port for the GPU device.
pub trait GpuDevice: Send + Sync {
    /// Creates a converter bound to this device.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::CacheCreationFailed`] if the device cannot
    /// import pixel buffers.
    fn create_texture_converter(&self) -> Result<Box<dyn TextureConverter>, TextureError>;

    /// Executes a batch and returns once the device has accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::SubmissionFailed`] if a command is invalid.
    fn submit(&self, batch: &CommandBatch) -> Result<(), TextureError>;
}

/// Per-eye presentable surfaces, used by preview output.
pub trait DrawableSource: Send + Sync {
    /// Returns the next free drawable for `eye`, if one is available.
    fn next_drawable(&self, eye: Eye) -> Option<TextureHandle>;

    /// Presents a drawable after the batch that filled it was submitted.
    fn present(&self, eye: Eye, drawable: TextureHandle);
}
