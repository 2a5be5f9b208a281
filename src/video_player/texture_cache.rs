// SPDX-License-Identifier: MPL-2.0
//! GPU texture cache.
//!
//! Turns decoded pixel buffer planes into device textures through a
//! [`TextureConverter`] created lazily on first use.
//!
//! # Design
//!
//! - **Lazy**: the converter is created on the first resolve, never earlier
//! - **LRU-bounded**: resolved textures are memoized per `(buffer, plane)`;
//!   the least recently used texture is released when the bound is hit
//! - **Single owner**: the cache lives inside the tick pipeline and is only
//!   touched under its lock
//! - **Invalidation**: dropping the converter releases every texture; a new
//!   one is created on the next resolve

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::application::port::{GpuDevice, TextureConverter, TextureFormat, TextureHandle};
use crate::domain::video::{PixelBuffer, PixelFormat, TextureCacheCapacity};
use crate::error::TextureError;

/// Texture format used for a plane of a buffer in `format`.
#[must_use]
pub fn texture_format_for(format: PixelFormat, plane: usize) -> TextureFormat {
    match (format, plane) {
        (PixelFormat::Bgra8, _) => TextureFormat::Bgra8Unorm,
        (PixelFormat::RgbaHalf, _) => TextureFormat::Rgba16Float,
        (PixelFormat::Ycbcr420, 0) => TextureFormat::R8Unorm,
        (PixelFormat::Ycbcr420, _) => TextureFormat::Rg8Unorm,
        (PixelFormat::Ycbcr420TenBit, 0) => TextureFormat::R16Unorm,
        (PixelFormat::Ycbcr420TenBit, _) => TextureFormat::Rg16Unorm,
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Textures currently alive.
    pub resident: usize,
    /// Resolves served from the memo.
    pub hits: u64,
    /// Resolves that converted a plane.
    pub conversions: u64,
    /// Textures released to honor the bound.
    pub evictions: u64,
    /// Converters created over the cache lifetime.
    pub converters_created: u64,
}

impl CacheStats {
    /// Returns the memo hit rate as a percentage (0.0 - 100.0).
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.conversions;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

type PlaneKey = (u64, usize);

/// Lazily created, LRU-bounded pixel-buffer-to-texture cache.
pub struct TextureCache {
    gpu: Arc<dyn GpuDevice>,
    converter: Option<Box<dyn TextureConverter>>,
    resolved: LruCache<PlaneKey, TextureHandle>,
    stats: CacheStats,
}

impl std::fmt::Debug for TextureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureCache")
            .field("created", &self.converter.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl TextureCache {
    #[must_use]
    pub fn new(gpu: Arc<dyn GpuDevice>, capacity: TextureCacheCapacity) -> Self {
        let bound = NonZeroUsize::new(capacity.value()).unwrap_or(NonZeroUsize::MIN);
        Self {
            gpu,
            converter: None,
            resolved: LruCache::new(bound),
            stats: CacheStats::default(),
        }
    }

    /// Returns a texture for plane `plane_index` of `buffer`.
    ///
    /// The converter is created on the first call. The plane's dimensions
    /// follow the buffer format (chroma planes are half size).
    ///
    /// # Errors
    ///
    /// - [`TextureError::CacheCreationFailed`] if the converter cannot be created
    /// - [`TextureError::ConversionFailed`] if the plane cannot be converted
    pub fn resolve(
        &mut self,
        buffer: &PixelBuffer,
        plane_index: usize,
    ) -> Result<TextureHandle, TextureError> {
        let key = (buffer.id(), plane_index);
        if let Some(handle) = self.resolved.get(&key) {
            self.stats.hits += 1;
            return Ok(*handle);
        }

        let format = texture_format_for(buffer.format(), plane_index);
        let (width, height) =
            buffer
                .format()
                .plane_dimensions(plane_index, buffer.width(), buffer.height());

        let converter = self.converter_mut()?;
        let handle = converter.convert(buffer, format, width, height, plane_index)?;
        self.stats.conversions += 1;

        if let Some((_, evicted)) = self.resolved.push(key, handle) {
            if let Some(converter) = self.converter.as_mut() {
                converter.release(evicted);
            }
            self.stats.evictions += 1;
        }
        self.stats.resident = self.resolved.len();
        Ok(handle)
    }

    /// Releases every texture and drops the converter.
    pub fn invalidate(&mut self) {
        if let Some(mut converter) = self.converter.take() {
            for (_, handle) in self.resolved.iter() {
                converter.release(*handle);
            }
            log::debug!("texture cache invalidated ({} textures)", self.resolved.len());
        }
        self.resolved.clear();
        self.stats.resident = 0;
    }

    /// Returns true once a converter exists.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.converter.is_some()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn converter_mut(&mut self) -> Result<&mut Box<dyn TextureConverter>, TextureError> {
        if self.converter.is_none() {
            let converter = self.gpu.create_texture_converter()?;
            self.stats.converters_created += 1;
            log::debug!("texture converter created");
            self.converter = Some(converter);
        }
        self.converter
            .as_mut()
            .ok_or_else(|| TextureError::CacheCreationFailed("converter unavailable".into()))
    }
}

impl Drop for TextureCache {
    fn drop(&mut self) {
        self.invalidate();
    }
}
