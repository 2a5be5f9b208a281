// SPDX-License-Identifier: MPL-2.0
//! Frame extraction.
//!
//! Turns one decoded [`FrameSample`] into GPU surfaces: one surface for a
//! mono sample, a left/right pair for a multiview sample. Per-eye buffers
//! are found by their stereo-view tag, never by position. A stereo sample
//! missing either eye fails instead of guessing.

use crate::application::port::TextureHandle;
use crate::domain::video::{Eye, FrameImage, FrameSample, PixelBuffer};
use crate::error::ExtractError;

use super::texture_cache::TextureCache;

/// GPU representation of one eye's image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Surface {
    /// A single RGB texture.
    Rgba(TextureHandle),
    /// Separate luma and interleaved chroma textures.
    Planar {
        luma: TextureHandle,
        chroma: TextureHandle,
    },
}

impl Surface {
    /// Full-resolution dimensions of the surface.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Surface::Rgba(texture) => texture.dimensions(),
            Surface::Planar { luma, .. } => luma.dimensions(),
        }
    }
}

/// Surfaces extracted from one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EyeSurfacePair {
    /// Mono source: one surface.
    Mono(Surface),
    /// Stereo source: one surface per eye.
    Stereo { left: Surface, right: Surface },
}

impl EyeSurfacePair {
    /// Number of surfaces carried (1 for mono, 2 for stereo).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            EyeSurfacePair::Mono(_) => 1,
            EyeSurfacePair::Stereo { .. } => 2,
        }
    }

    #[must_use]
    pub fn is_stereo(&self) -> bool {
        matches!(self, EyeSurfacePair::Stereo { .. })
    }

    #[must_use]
    pub fn left(&self) -> Surface {
        match self {
            EyeSurfacePair::Mono(surface) => *surface,
            EyeSurfacePair::Stereo { left, .. } => *left,
        }
    }

    /// Right-eye surface; `None` for mono samples.
    #[must_use]
    pub fn right(&self) -> Option<Surface> {
        match self {
            EyeSurfacePair::Mono(_) => None,
            EyeSurfacePair::Stereo { right, .. } => Some(*right),
        }
    }
}

/// Extracts eye surfaces from `frame`, converting through `cache`.
///
/// # Errors
///
/// - [`ExtractError::NoPixelData`] if the sample carries no image
/// - [`ExtractError::MissingEye`] if a tagged sample lacks an eye
/// - [`ExtractError::Texture`] if a conversion fails
pub fn extract(
    frame: &FrameSample,
    cache: &mut TextureCache,
) -> Result<EyeSurfacePair, ExtractError> {
    match &frame.image {
        FrameImage::Empty => Err(ExtractError::NoPixelData),
        FrameImage::Single(buffer) => Ok(EyeSurfacePair::Mono(surface_for(buffer, cache)?)),
        FrameImage::Tagged(buffers) => {
            let find = |eye: Eye| {
                buffers
                    .iter()
                    .find(|tagged| tagged.stereo_view() == Some(eye))
                    .map(|tagged| tagged.buffer.clone())
                    .ok_or(ExtractError::MissingEye(eye))
            };
            let left = find(Eye::Left)?;
            let right = find(Eye::Right)?;
            Ok(EyeSurfacePair::Stereo {
                left: surface_for(&left, cache)?,
                right: surface_for(&right, cache)?,
            })
        }
    }
}

fn surface_for(buffer: &PixelBuffer, cache: &mut TextureCache) -> Result<Surface, ExtractError> {
    if buffer.planes().is_empty() || buffer.is_empty() {
        return Err(ExtractError::NoPixelData);
    }

    if buffer.format().is_planar() {
        let luma = cache.resolve(buffer, 0)?;
        let chroma = cache.resolve(buffer, 1)?;
        Ok(Surface::Planar { luma, chroma })
    } else {
        Ok(Surface::Rgba(cache.resolve(buffer, 0)?))
    }
}
