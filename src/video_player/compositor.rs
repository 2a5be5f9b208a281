// SPDX-License-Identifier: MPL-2.0
//! Dual-stream composition.
//!
//! Routes the eye surfaces delivered on a tick into the host's destination
//! textures and records the GPU work as a single [`CommandBatch`]. A copy only
//! happens when source and destination dimensions match exactly; anything
//! else is skipped with a diagnostic.
//!
//! Preview output bypasses the destinations and center-crops each eye into
//! the next drawable of a [`DrawableSource`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::port::{CommandBatch, DrawableSource, GpuCommand, TextureHandle};
use crate::diagnostics::{DiagnosticsLog, PlaybackDiagnostic, StreamSlot};
use crate::domain::video::{Eye, YcbcrMatrix};

use super::extractor::{EyeSurfacePair, Surface};

/// How planar (luma/chroma) surfaces reach the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Copy planes verbatim into matching destination textures.
    #[default]
    Copy,
    /// Render planes through a YCbCr to RGB pass into one destination.
    YcbcrConvert,
}

/// Where a mono surface goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonoPolicy {
    /// Only the left destination receives the image.
    #[default]
    LeftOnly,
    /// Both destinations receive the same image.
    BothEyes,
}

/// A host-owned destination for one eye.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceTarget {
    /// RGB texture, or the luma destination for planar copies.
    pub texture: TextureHandle,
    /// Chroma destination for planar copies.
    pub chroma: Option<TextureHandle>,
}

impl SurfaceTarget {
    #[must_use]
    pub fn planar(luma: TextureHandle, chroma: TextureHandle) -> Self {
        Self {
            texture: luma,
            chroma: Some(chroma),
        }
    }
}

impl From<TextureHandle> for SurfaceTarget {
    fn from(texture: TextureHandle) -> Self {
        Self {
            texture,
            chroma: None,
        }
    }
}

/// The four destinations set by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destinations {
    pub primary_left: SurfaceTarget,
    pub primary_right: SurfaceTarget,
    pub secondary_left: Option<SurfaceTarget>,
    pub secondary_right: Option<SurfaceTarget>,
}

/// Surfaces of one stream on this tick, with the matrix of its source.
#[derive(Debug, Clone, Copy)]
pub struct StreamSurfaces {
    pub pair: EyeSurfacePair,
    pub matrix: YcbcrMatrix,
}

/// Drawables filled by a preview batch, to present once it is submitted.
#[derive(Debug, Default)]
pub struct PreviewFrame {
    pub batch: CommandBatch,
    pub drawables: Vec<(Eye, TextureHandle)>,
}

/// Builds per-tick GPU work from eye surfaces.
#[derive(Debug, Clone)]
pub struct Compositor {
    mode: RenderMode,
    mono_policy: MonoPolicy,
    diagnostics: DiagnosticsLog,
    size_mismatches: Arc<AtomicU64>,
}

impl Compositor {
    #[must_use]
    pub fn new(mode: RenderMode, mono_policy: MonoPolicy, diagnostics: DiagnosticsLog) -> Self {
        Self {
            mode,
            mono_policy,
            diagnostics,
            size_mismatches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Copies skipped because source and destination sizes differed.
    #[must_use]
    pub fn size_mismatches(&self) -> u64 {
        self.size_mismatches.load(Ordering::Relaxed)
    }

    /// Records copies for every delivered stream into one batch.
    #[must_use]
    pub fn composite(
        &self,
        primary: Option<&StreamSurfaces>,
        secondary: Option<&StreamSurfaces>,
        destinations: &Destinations,
    ) -> CommandBatch {
        let mut batch = CommandBatch::new();

        if let Some(stream) = primary {
            self.route(
                &mut batch,
                StreamSlot::Primary,
                stream,
                Some(destinations.primary_left),
                Some(destinations.primary_right),
            );
        }
        if let Some(stream) = secondary {
            self.route(
                &mut batch,
                StreamSlot::Secondary,
                stream,
                destinations.secondary_left,
                destinations.secondary_right,
            );
        }

        batch
    }

    /// Center-crops each eye of `pair` into the next drawable of `drawables`.
    ///
    /// A mono surface feeds both eyes. Eyes without a free drawable are skipped.
    #[must_use]
    pub fn composite_preview(
        &self,
        pair: &EyeSurfacePair,
        drawables: &dyn DrawableSource,
    ) -> PreviewFrame {
        let mut frame = PreviewFrame::default();
        let right = pair.right().unwrap_or_else(|| pair.left());

        for (eye, surface) in [(Eye::Left, pair.left()), (Eye::Right, right)] {
            let source = match surface {
                Surface::Rgba(texture) => texture,
                Surface::Planar { luma, .. } => {
                    log::debug!("preview shows luma only for planar surfaces");
                    luma
                }
            };
            let Some(drawable) = drawables.next_drawable(eye) else {
                continue;
            };
            let (origin, size) = center_crop(source.dimensions(), drawable.dimensions());
            frame.batch.push(GpuCommand::CopyRegion {
                source,
                origin,
                size,
                destination: drawable,
            });
            frame.drawables.push((eye, drawable));
        }

        frame
    }

    fn route(
        &self,
        batch: &mut CommandBatch,
        slot: StreamSlot,
        stream: &StreamSurfaces,
        left: Option<SurfaceTarget>,
        right: Option<SurfaceTarget>,
    ) {
        let right_surface = match (stream.pair.right(), self.mono_policy) {
            (Some(surface), _) => Some(surface),
            (None, MonoPolicy::BothEyes) => Some(stream.pair.left()),
            (None, MonoPolicy::LeftOnly) => None,
        };

        if let Some(target) = left {
            self.copy_surface(batch, slot, stream.pair.left(), target, stream.matrix);
        }
        if let (Some(surface), Some(target)) = (right_surface, right) {
            self.copy_surface(batch, slot, surface, target, stream.matrix);
        }
    }

    fn copy_surface(
        &self,
        batch: &mut CommandBatch,
        slot: StreamSlot,
        surface: Surface,
        target: SurfaceTarget,
        matrix: YcbcrMatrix,
    ) {
        match (surface, self.mode) {
            (Surface::Rgba(source), _) => {
                if self.dimensions_match(slot, source, target.texture) {
                    batch.push(GpuCommand::Copy {
                        source,
                        destination: target.texture,
                    });
                }
            }
            (Surface::Planar { luma, chroma }, RenderMode::Copy) => {
                let Some(chroma_target) = target.chroma else {
                    log::warn!("{:?}: planar surface has no chroma destination", slot);
                    self.diagnostics
                        .record(PlaybackDiagnostic::MissingChromaTarget { slot });
                    return;
                };
                if self.dimensions_match(slot, luma, target.texture)
                    && self.dimensions_match(slot, chroma, chroma_target)
                {
                    batch.push(GpuCommand::Copy {
                        source: luma,
                        destination: target.texture,
                    });
                    batch.push(GpuCommand::Copy {
                        source: chroma,
                        destination: chroma_target,
                    });
                }
            }
            (Surface::Planar { luma, chroma }, RenderMode::YcbcrConvert) => {
                if self.dimensions_match(slot, luma, target.texture) {
                    batch.push(GpuCommand::ConvertYcbcr {
                        luma,
                        chroma,
                        matrix,
                        destination: target.texture,
                    });
                }
            }
        }
    }

    fn dimensions_match(
        &self,
        slot: StreamSlot,
        source: TextureHandle,
        destination: TextureHandle,
    ) -> bool {
        if source.dimensions() == destination.dimensions() {
            return true;
        }
        self.size_mismatches.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "{:?}: size mismatch, source {:?} vs destination {:?}; copy skipped",
            slot,
            source.dimensions(),
            destination.dimensions()
        );
        self.diagnostics.record(PlaybackDiagnostic::SizeMismatch {
            slot,
            source: source.dimensions(),
            destination: destination.dimensions(),
        });
        false
    }
}

/// Centered crop of a `source` image into a `destination` drawable.
///
/// Returns the source origin and the copied size. Sources smaller than the
/// drawable are copied whole into its top-left corner.
#[must_use]
pub fn center_crop(source: (u32, u32), destination: (u32, u32)) -> ((u32, u32), (u32, u32)) {
    let width = source.0.min(destination.0);
    let height = source.1.min(destination.1);
    let origin = (
        source.0.saturating_sub(destination.0) / 2,
        source.1.saturating_sub(destination.1) / 2,
    );
    (origin, (width, height))
}
