// SPDX-License-Identifier: MPL-2.0
//! Decoded frame types.
//!
//! A decoder hands out [`FrameSample`]s. Each sample carries a presentation
//! timestamp and either a single image (mono) or a set of tagged buffers
//! (multiview, one buffer per eye).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// One side of a stereo pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Left => write!(f, "left"),
            Eye::Right => write!(f, "right"),
        }
    }
}

/// Pixel layout of a decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit BGRA, one plane.
    Bgra8,
    /// 16-bit float RGBA, one plane.
    RgbaHalf,
    /// 8-bit 4:2:0 YCbCr, luma plane plus interleaved CbCr plane.
    Ycbcr420,
    /// 10-bit 4:2:0 YCbCr stored in 16-bit words, luma plus interleaved CbCr.
    Ycbcr420TenBit,
}

impl PixelFormat {
    /// Number of planes a buffer in this format carries.
    #[must_use]
    pub fn plane_count(self) -> usize {
        if self.is_planar() {
            2
        } else {
            1
        }
    }

    /// Returns true for luma/chroma layouts.
    #[must_use]
    pub fn is_planar(self) -> bool {
        matches!(self, Self::Ycbcr420 | Self::Ycbcr420TenBit)
    }

    /// Bytes occupied by one pixel of the given plane.
    #[must_use]
    pub fn bytes_per_pixel(self, plane: usize) -> usize {
        match (self, plane) {
            (Self::Bgra8, _) => 4,
            (Self::RgbaHalf, _) => 8,
            (Self::Ycbcr420, 0) => 1,
            (Self::Ycbcr420, _) => 2,
            (Self::Ycbcr420TenBit, 0) => 2,
            (Self::Ycbcr420TenBit, _) => 4,
        }
    }

    /// Dimensions of the given plane for a `width` x `height` image.
    #[must_use]
    pub fn plane_dimensions(self, plane: usize, width: u32, height: u32) -> (u32, u32) {
        if self.is_planar() && plane > 0 {
            (width.div_ceil(2), height.div_ceil(2))
        } else {
            (width, height)
        }
    }

    /// Stable integer reported to hosts alongside the ready notification.
    #[must_use]
    pub fn wire_tag(self) -> u32 {
        match self {
            Self::Bgra8 => 1,
            Self::Ycbcr420 => 2,
            Self::Ycbcr420TenBit => 3,
            Self::RgbaHalf => 9,
        }
    }
}

/// A single plane of pixel data.
#[derive(Debug, Clone)]
pub struct PixelPlane {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: usize,
    pub data: Arc<[u8]>,
}

impl PixelPlane {
    /// Creates a tightly packed plane.
    #[must_use]
    pub fn packed(width: u32, height: u32, bytes_per_pixel: usize, data: Arc<[u8]>) -> Self {
        Self {
            width,
            height,
            bytes_per_row: width as usize * bytes_per_pixel,
            data,
        }
    }

    /// Returns the bytes of one row, without stride padding.
    #[must_use]
    pub fn row(&self, y: u32, bytes_per_pixel: usize) -> Option<&[u8]> {
        let start = y as usize * self.bytes_per_row;
        let end = start + self.width as usize * bytes_per_pixel;
        self.data.get(start..end)
    }
}

/// A decoded image buffer, shared between the decoder and the texture path.
///
/// The `id` is unique for the process lifetime and keys texture reuse.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    id: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<PixelPlane>,
}

impl PixelBuffer {
    /// Wraps decoded planes, assigning a fresh buffer id.
    #[must_use]
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<PixelPlane>) -> Self {
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            format,
            planes,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[must_use]
    pub fn planes(&self) -> &[PixelPlane] {
        &self.planes
    }

    #[must_use]
    pub fn plane(&self, index: usize) -> Option<&PixelPlane> {
        self.planes.get(index)
    }

    /// Returns true when the buffer holds no pixel data at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.planes.iter().all(|p| p.data.is_empty())
    }
}

/// Metadata tag attached to a buffer in a multiview sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTag {
    /// Which eye the buffer belongs to.
    StereoView(Eye),
    /// The coded layer the buffer came from.
    VideoLayer(u32),
}

/// A buffer plus the tags describing it.
#[derive(Debug, Clone)]
pub struct TaggedBuffer {
    pub tags: Vec<BufferTag>,
    pub buffer: Arc<PixelBuffer>,
}

impl TaggedBuffer {
    #[must_use]
    pub fn new(tags: Vec<BufferTag>, buffer: Arc<PixelBuffer>) -> Self {
        Self { tags, buffer }
    }

    /// Returns the eye this buffer is tagged for, if any.
    #[must_use]
    pub fn stereo_view(&self) -> Option<Eye> {
        self.tags.iter().find_map(|tag| match tag {
            BufferTag::StereoView(eye) => Some(*eye),
            BufferTag::VideoLayer(_) => None,
        })
    }
}

/// Image payload of a decoded sample.
#[derive(Debug, Clone)]
pub enum FrameImage {
    /// The sample carried no image.
    Empty,
    /// Mono source: one image for both eyes.
    Single(Arc<PixelBuffer>),
    /// Multiview source: one tagged buffer per view, in decoder order.
    Tagged(Vec<TaggedBuffer>),
}

/// A decoded frame with its presentation timestamp, in session-local seconds.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub pts_secs: f64,
    pub image: FrameImage,
}

impl FrameSample {
    #[must_use]
    pub fn new(pts_secs: f64, image: FrameImage) -> Self {
        Self { pts_secs, image }
    }

    /// Returns true when the sample carries per-eye buffers.
    #[must_use]
    pub fn is_tagged(&self) -> bool {
        matches!(self.image, FrameImage::Tagged(_))
    }
}
