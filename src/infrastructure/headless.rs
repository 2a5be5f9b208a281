// SPDX-License-Identifier: MPL-2.0
//! Host-memory GPU device.
//!
//! Implements the GPU ports on the CPU: textures are byte vectors, copies are
//! row copies and YCbCr conversion is done per pixel. Used by the test suite,
//! the benches and the command-line demo; it also exposes inspection helpers
//! (texture readback, live texture counts) that a real device cannot offer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::application::port::{
    CommandBatch, DrawableSource, GpuCommand, GpuDevice, TextureConverter, TextureFormat,
    TextureHandle, TextureId,
};
use crate::domain::video::{Eye, PixelBuffer, YcbcrMatrix};
use crate::error::TextureError;

#[derive(Debug, Clone)]
struct HostTexture {
    handle: TextureHandle,
    data: Vec<u8>,
    converted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    textures: Mutex<HashMap<TextureId, HostTexture>>,
    next_id: AtomicU64,
    submitted: AtomicU64,
    fail_converter: AtomicBool,
}

impl Inner {
    fn textures(&self) -> MutexGuard<'_, HashMap<TextureId, HostTexture>> {
        self.textures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(&self, width: u32, height: u32, format: TextureFormat, data: Vec<u8>, converted: bool) -> TextureHandle {
        let handle = TextureHandle {
            id: TextureId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
            width,
            height,
            format,
        };
        self.textures().insert(
            handle.id,
            HostTexture {
                handle,
                data,
                converted,
            },
        );
        handle
    }
}

/// CPU-backed implementation of [`GpuDevice`].
#[derive(Debug, Clone, Default)]
pub struct HeadlessGpu {
    inner: Arc<Inner>,
}

impl HeadlessGpu {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a zeroed texture, as a host would for its destinations.
    #[must_use]
    pub fn create_texture(&self, width: u32, height: u32, format: TextureFormat) -> TextureHandle {
        let len = texture_len(width, height, format);
        self.inner.allocate(width, height, format, vec![0; len], false)
    }

    /// Overwrites a texture's bytes. Returns false if the size is wrong.
    pub fn write_texture(&self, texture: TextureHandle, bytes: &[u8]) -> bool {
        match self.inner.textures().get_mut(&texture.id) {
            Some(host) if host.data.len() == bytes.len() => {
                host.data.copy_from_slice(bytes);
                true
            }
            _ => false,
        }
    }

    /// Returns a copy of a texture's bytes.
    #[must_use]
    pub fn read_texture(&self, texture: TextureHandle) -> Option<Vec<u8>> {
        self.inner
            .textures()
            .get(&texture.id)
            .map(|host| host.data.clone())
    }

    /// Textures currently held by converters.
    #[must_use]
    pub fn converted_textures(&self) -> usize {
        self.inner
            .textures()
            .values()
            .filter(|host| host.converted)
            .count()
    }

    /// Batches accepted by [`GpuDevice::submit`].
    #[must_use]
    pub fn submitted_batches(&self) -> u64 {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    /// Makes subsequent converter creation fail.
    pub fn fail_converter_creation(&self, fail: bool) {
        self.inner.fail_converter.store(fail, Ordering::SeqCst);
    }
}

impl GpuDevice for HeadlessGpu {
    fn create_texture_converter(&self) -> Result<Box<dyn TextureConverter>, TextureError> {
        if self.inner.fail_converter.load(Ordering::SeqCst) {
            return Err(TextureError::CacheCreationFailed(
                "device refused pixel buffer import".into(),
            ));
        }
        Ok(Box::new(HeadlessConverter {
            inner: self.inner.clone(),
            owned: HashSet::new(),
        }))
    }

    fn submit(&self, batch: &CommandBatch) -> Result<(), TextureError> {
        let mut textures = self.inner.textures();
        for command in &batch.commands {
            execute(&mut textures, command)?;
        }
        self.inner.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct HeadlessConverter {
    inner: Arc<Inner>,
    owned: HashSet<TextureId>,
}

impl TextureConverter for HeadlessConverter {
    fn convert(
        &mut self,
        buffer: &PixelBuffer,
        format: TextureFormat,
        width: u32,
        height: u32,
        plane_index: usize,
    ) -> Result<TextureHandle, TextureError> {
        let plane = buffer.plane(plane_index).ok_or_else(|| {
            TextureError::ConversionFailed(format!(
                "buffer {} has no plane {}",
                buffer.id(),
                plane_index
            ))
        })?;
        let bpp = format.bytes_per_texel();
        if buffer.format().bytes_per_pixel(plane_index) != bpp {
            return Err(TextureError::ConversionFailed(format!(
                "{:?} plane {} does not fit {:?}",
                buffer.format(),
                plane_index,
                format
            )));
        }
        if plane.width < width || plane.height < height {
            return Err(TextureError::ConversionFailed(format!(
                "plane is {}x{}, texture wants {}x{}",
                plane.width, plane.height, width, height
            )));
        }

        let mut data = Vec::with_capacity(texture_len(width, height, format));
        for y in 0..height {
            let row = plane
                .row(y, bpp)
                .ok_or_else(|| TextureError::ConversionFailed(format!("plane row {} truncated", y)))?;
            data.extend_from_slice(&row[..width as usize * bpp]);
        }

        let handle = self.inner.allocate(width, height, format, data, true);
        self.owned.insert(handle.id);
        Ok(handle)
    }

    fn release(&mut self, texture: TextureHandle) {
        if self.owned.remove(&texture.id) {
            self.inner.textures().remove(&texture.id);
        }
    }
}

impl Drop for HeadlessConverter {
    fn drop(&mut self) {
        let mut textures = self.inner.textures();
        for id in self.owned.drain() {
            textures.remove(&id);
        }
    }
}

fn texture_len(width: u32, height: u32, format: TextureFormat) -> usize {
    width as usize * height as usize * format.bytes_per_texel()
}

fn lookup<'a>(
    textures: &'a HashMap<TextureId, HostTexture>,
    handle: &TextureHandle,
) -> Result<&'a HostTexture, TextureError> {
    textures
        .get(&handle.id)
        .ok_or_else(|| TextureError::SubmissionFailed(format!("unknown texture {:?}", handle.id)))
}

fn execute(
    textures: &mut HashMap<TextureId, HostTexture>,
    command: &GpuCommand,
) -> Result<(), TextureError> {
    match command {
        GpuCommand::Copy {
            source,
            destination,
        } => {
            let src = lookup(textures, source)?;
            let dst = lookup(textures, destination)?;
            if src.handle.dimensions() != dst.handle.dimensions()
                || src.handle.format.bytes_per_texel() != dst.handle.format.bytes_per_texel()
            {
                return Err(TextureError::SubmissionFailed(format!(
                    "copy {:?} into {:?}",
                    src.handle, dst.handle
                )));
            }
            let data = src.data.clone();
            store(textures, destination, data)
        }
        GpuCommand::CopyRegion {
            source,
            origin,
            size,
            destination,
        } => {
            let src = lookup(textures, source)?;
            let dst = lookup(textures, destination)?;
            let bpp = src.handle.format.bytes_per_texel();
            if bpp != dst.handle.format.bytes_per_texel()
                || origin.0 + size.0 > src.handle.width
                || origin.1 + size.1 > src.handle.height
                || size.0 > dst.handle.width
                || size.1 > dst.handle.height
            {
                return Err(TextureError::SubmissionFailed(format!(
                    "region {:?}+{:?} of {:?} into {:?}",
                    origin, size, src.handle, dst.handle
                )));
            }
            let mut data = dst.data.clone();
            let src_stride = src.handle.width as usize * bpp;
            let dst_stride = dst.handle.width as usize * bpp;
            let row_len = size.0 as usize * bpp;
            for y in 0..size.1 as usize {
                let from = (origin.1 as usize + y) * src_stride + origin.0 as usize * bpp;
                let to = y * dst_stride;
                data[to..to + row_len].copy_from_slice(&src.data[from..from + row_len]);
            }
            store(textures, destination, data)
        }
        GpuCommand::ConvertYcbcr {
            luma,
            chroma,
            matrix,
            destination,
        } => {
            let data = convert_ycbcr(
                lookup(textures, luma)?,
                lookup(textures, chroma)?,
                *matrix,
                lookup(textures, destination)?,
            )?;
            store(textures, destination, data)
        }
    }
}

fn store(
    textures: &mut HashMap<TextureId, HostTexture>,
    destination: &TextureHandle,
    data: Vec<u8>,
) -> Result<(), TextureError> {
    let dst = textures
        .get_mut(&destination.id)
        .ok_or_else(|| TextureError::SubmissionFailed("destination vanished".into()))?;
    dst.data = data;
    Ok(())
}

fn sample(texture: &HostTexture, x: u32, y: u32, component: usize) -> f32 {
    let bpp = texture.handle.format.bytes_per_texel();
    let offset = (y as usize * texture.handle.width as usize + x as usize) * bpp;
    match texture.handle.format {
        TextureFormat::R16Unorm | TextureFormat::Rg16Unorm => {
            let at = offset + component * 2;
            let word = u16::from_le_bytes([texture.data[at], texture.data[at + 1]]);
            f32::from(word) / 65535.0
        }
        _ => f32::from(texture.data[offset + component]) / 255.0,
    }
}

fn convert_ycbcr(
    luma: &HostTexture,
    chroma: &HostTexture,
    matrix: YcbcrMatrix,
    destination: &HostTexture,
) -> Result<Vec<u8>, TextureError> {
    if destination.handle.format != TextureFormat::Bgra8Unorm
        || luma.handle.dimensions() != destination.handle.dimensions()
        || chroma.handle.width < luma.handle.width.div_ceil(2)
        || chroma.handle.height < luma.handle.height.div_ceil(2)
    {
        return Err(TextureError::SubmissionFailed(format!(
            "cannot convert {:?} + {:?} into {:?}",
            luma.handle, chroma.handle, destination.handle
        )));
    }

    let coefficients = matrix.coefficients();
    let (width, height) = luma.handle.dimensions();
    let mut data = Vec::with_capacity(texture_len(width, height, TextureFormat::Bgra8Unorm));
    for y in 0..height {
        for x in 0..width {
            let v = [
                sample(luma, x, y, 0) - coefficients.offset[0],
                sample(chroma, x / 2, y / 2, 0) - coefficients.offset[1],
                sample(chroma, x / 2, y / 2, 1) - coefficients.offset[2],
            ];
            let mut rgb = [0u8; 3];
            for (channel, row) in rgb.iter_mut().zip(coefficients.rows.iter()) {
                let value = row[0] * v[0] + row[1] * v[1] + row[2] * v[2];
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    *channel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
            data.extend_from_slice(&[rgb[2], rgb[1], rgb[0], 255]);
        }
    }
    Ok(data)
}

/// Preview drawables backed by [`HeadlessGpu`] textures.
///
/// Each eye owns one drawable that is handed out again after it is presented.
#[derive(Debug)]
pub struct HeadlessDrawables {
    left: TextureHandle,
    right: TextureHandle,
    presented: Mutex<Vec<(Eye, TextureHandle)>>,
}

impl HeadlessDrawables {
    /// Allocates one `width` x `height` BGRA drawable per eye on `gpu`.
    #[must_use]
    pub fn new(gpu: &HeadlessGpu, width: u32, height: u32) -> Self {
        Self {
            left: gpu.create_texture(width, height, TextureFormat::Bgra8Unorm),
            right: gpu.create_texture(width, height, TextureFormat::Bgra8Unorm),
            presented: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn drawable(&self, eye: Eye) -> TextureHandle {
        match eye {
            Eye::Left => self.left,
            Eye::Right => self.right,
        }
    }

    /// Drawables presented so far, in order.
    #[must_use]
    pub fn presented(&self) -> Vec<(Eye, TextureHandle)> {
        self.presented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DrawableSource for HeadlessDrawables {
    fn next_drawable(&self, eye: Eye) -> Option<TextureHandle> {
        Some(self.drawable(eye))
    }

    fn present(&self, eye: Eye, drawable: TextureHandle) {
        self.presented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((eye, drawable));
    }
}
