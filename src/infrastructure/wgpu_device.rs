// SPDX-License-Identifier: MPL-2.0
//! Hardware GPU device built on `wgpu`.
//!
//! Pixel planes are uploaded with `Queue::write_texture`, copies are encoded
//! as texture-to-texture copies and YCbCr conversion runs as a fullscreen
//! render pass into the destination texture.
//!
//! 10-bit planar frames need `Features::TEXTURE_FORMAT_16BIT_NORM`; on
//! adapters without it the converter refuses 16-bit planes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use wgpu::util::DeviceExt;

use crate::application::port::{
    CommandBatch, GpuCommand, GpuDevice, TextureConverter, TextureFormat, TextureHandle, TextureId,
};
use crate::domain::video::{PixelBuffer, YcbcrMatrix};
use crate::error::TextureError;

const YCBCR_SHADER: &str = r"
struct Conversion {
    row0: vec4<f32>,
    row1: vec4<f32>,
    row2: vec4<f32>,
    offset: vec4<f32>,
};

@group(0) @binding(0) var luma: texture_2d<f32>;
@group(0) @binding(1) var chroma: texture_2d<f32>;
@group(0) @binding(2) var<uniform> conversion: Conversion;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = vec2<i32>(position.xy);
    let y = textureLoad(luma, texel, 0).r;
    let cbcr = textureLoad(chroma, texel / 2, 0).rg;
    let ycc = vec3<f32>(y, cbcr) - conversion.offset.xyz;
    let rgb = vec3<f32>(
        dot(conversion.row0.xyz, ycc),
        dot(conversion.row1.xyz, ycc),
        dot(conversion.row2.xyz, ycc),
    );
    return vec4<f32>(clamp(rgb, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}
";

/// Uniform block of the conversion shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ConversionUniforms {
    rows: [[f32; 4]; 3],
    offset: [f32; 4],
}

impl From<YcbcrMatrix> for ConversionUniforms {
    fn from(matrix: YcbcrMatrix) -> Self {
        let coefficients = matrix.coefficients();
        let widen = |v: [f32; 3]| [v[0], v[1], v[2], 0.0];
        Self {
            rows: coefficients.rows.map(widen),
            offset: widen(coefficients.offset),
        }
    }
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::R16Unorm => wgpu::TextureFormat::R16Unorm,
        TextureFormat::Rg16Unorm => wgpu::TextureFormat::Rg16Unorm,
    }
}

fn is_sixteen_bit_norm(format: TextureFormat) -> bool {
    matches!(format, TextureFormat::R16Unorm | TextureFormat::Rg16Unorm)
}

type Registry = Arc<Mutex<HashMap<TextureId, wgpu::Texture>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state of a device and its converters.
struct Shared {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: Registry,
    next_id: AtomicU64,
    sixteen_bit_norm: bool,
}

impl Shared {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        label: &str,
    ) -> Result<(TextureHandle, wgpu::Texture), TextureError> {
        if is_sixteen_bit_norm(format) && !self.sixteen_bit_norm {
            return Err(TextureError::ConversionFailed(format!(
                "{format:?} textures are not supported by this adapter"
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let handle = TextureHandle {
            id: TextureId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
            width,
            height,
            format,
        };
        lock(&self.textures).insert(handle.id, texture.clone());
        Ok((handle, texture))
    }
}

/// Conversion pipeline state, created on first use per destination format.
struct ConversionPipelines {
    layout: wgpu::BindGroupLayout,
    shader: wgpu::ShaderModule,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

impl ConversionPipelines {
    fn new(device: &wgpu::Device) -> Self {
        let plane_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("YCbCr Bind Group Layout"),
            entries: &[
                plane_entry(0),
                plane_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("YCbCr Conversion Shader"),
            source: wgpu::ShaderSource::Wgsl(YCBCR_SHADER.into()),
        });
        Self {
            layout,
            shader,
            pipelines: HashMap::new(),
        }
    }

    fn pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        let layout = &self.layout;
        let shader = &self.shader;
        self.pipelines.entry(format).or_insert_with(|| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("YCbCr Pipeline Layout"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("YCbCr Render Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
    }
}

/// [`GpuDevice`] backed by a `wgpu` adapter.
pub struct WgpuDevice {
    shared: Arc<Shared>,
    conversion: Mutex<ConversionPipelines>,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("textures", &lock(&self.shared.textures).len())
            .field("sixteen_bit_norm", &self.shared.sixteen_bit_norm)
            .finish_non_exhaustive()
    }
}

impl WgpuDevice {
    /// Opens the default high-performance adapter without a surface.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::CacheCreationFailed`] if no adapter or device
    /// is available.
    pub fn new() -> Result<Self, TextureError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| TextureError::CacheCreationFailed(format!("no GPU adapter: {e}")))?;

        let sixteen_bit_norm = adapter
            .features()
            .contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM);
        let required_features = if sixteen_bit_norm {
            wgpu::Features::TEXTURE_FORMAT_16BIT_NORM
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("spatial-player-device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| TextureError::CacheCreationFailed(format!("device request failed: {e}")))?;

        log::info!(
            "GPU initialized: {} ({:?}), 16-bit norm textures: {}",
            adapter.get_info().name,
            adapter.get_info().backend,
            sixteen_bit_norm
        );

        Ok(Self::from_parts(device, queue, sixteen_bit_norm))
    }

    /// Wraps a device owned by a host renderer.
    #[must_use]
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue, sixteen_bit_norm: bool) -> Self {
        let conversion = Mutex::new(ConversionPipelines::new(&device));
        Self {
            shared: Arc::new(Shared {
                device,
                queue,
                textures: Arc::new(Mutex::new(HashMap::new())),
                next_id: AtomicU64::new(0),
                sixteen_bit_norm,
            }),
            conversion,
        }
    }

    /// Allocates a destination texture the pipeline can copy or render into.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::ConversionFailed`] for formats the adapter lacks.
    pub fn create_texture(&self, width: u32, height: u32, format: TextureFormat) -> Result<TextureHandle, TextureError> {
        self.shared
            .allocate(width, height, format, "Destination Texture")
            .map(|(handle, _)| handle)
    }

    /// Returns the `wgpu` texture behind a handle, for host rendering.
    #[must_use]
    pub fn texture(&self, handle: TextureHandle) -> Option<wgpu::Texture> {
        lock(&self.shared.textures).get(&handle.id).cloned()
    }

    /// Frees a texture allocated with [`WgpuDevice::create_texture`].
    pub fn destroy_texture(&self, handle: TextureHandle) {
        if let Some(texture) = lock(&self.shared.textures).remove(&handle.id) {
            texture.destroy();
        }
    }

    fn lookup(&self, handle: TextureHandle) -> Result<wgpu::Texture, TextureError> {
        self.texture(handle)
            .ok_or_else(|| TextureError::SubmissionFailed(format!("unknown texture {:?}", handle.id)))
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, command: &GpuCommand) -> Result<(), TextureError> {
        match *command {
            GpuCommand::Copy {
                source,
                destination,
            } => {
                if source.dimensions() != destination.dimensions() || source.format != destination.format {
                    return Err(TextureError::SubmissionFailed(format!(
                        "copy {source:?} -> {destination:?} does not match"
                    )));
                }
                self.encode_copy(encoder, source, (0, 0), source.dimensions(), destination)
            }
            GpuCommand::CopyRegion {
                source,
                origin,
                size,
                destination,
            } => {
                let fits_source = origin.0 + size.0 <= source.width && origin.1 + size.1 <= source.height;
                let fits_destination = size.0 <= destination.width && size.1 <= destination.height;
                if !fits_source || !fits_destination || source.format != destination.format {
                    return Err(TextureError::SubmissionFailed(format!(
                        "region {origin:?}+{size:?} of {source:?} does not fit {destination:?}"
                    )));
                }
                self.encode_copy(encoder, source, origin, size, destination)
            }
            GpuCommand::ConvertYcbcr {
                luma,
                chroma,
                matrix,
                destination,
            } => self.encode_conversion(encoder, luma, chroma, matrix, destination),
        }
    }

    fn encode_copy(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: TextureHandle,
        origin: (u32, u32),
        size: (u32, u32),
        destination: TextureHandle,
    ) -> Result<(), TextureError> {
        let src = self.lookup(source)?;
        let dst = self.lookup(destination)?;
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &src,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: origin.0,
                    y: origin.1,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn encode_conversion(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        luma: TextureHandle,
        chroma: TextureHandle,
        matrix: YcbcrMatrix,
        destination: TextureHandle,
    ) -> Result<(), TextureError> {
        if luma.dimensions() != destination.dimensions() {
            return Err(TextureError::SubmissionFailed(format!(
                "cannot convert {luma:?} into {destination:?}"
            )));
        }
        let device = &self.shared.device;
        let luma_view = self.lookup(luma)?.create_view(&wgpu::TextureViewDescriptor::default());
        let chroma_view = self.lookup(chroma)?.create_view(&wgpu::TextureViewDescriptor::default());
        let target_view = self
            .lookup(destination)?
            .create_view(&wgpu::TextureViewDescriptor::default());

        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("YCbCr Uniforms"),
            contents: bytemuck::bytes_of(&ConversionUniforms::from(matrix)),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut conversion = lock(&self.conversion);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("YCbCr Bind Group"),
            layout: &conversion.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&luma_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&chroma_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniforms.as_entire_binding(),
                },
            ],
        });
        let pipeline = conversion.pipeline(device, wgpu_format(destination.format));

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("YCbCr Conversion Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

impl GpuDevice for WgpuDevice {
    fn create_texture_converter(&self) -> Result<Box<dyn TextureConverter>, TextureError> {
        Ok(Box::new(WgpuConverter {
            shared: self.shared.clone(),
            owned: Vec::new(),
        }))
    }

    fn submit(&self, batch: &CommandBatch) -> Result<(), TextureError> {
        let mut encoder = self
            .shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Playback Batch"),
            });
        for command in &batch.commands {
            self.encode(&mut encoder, command)?;
        }
        self.shared.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

/// Uploads pixel planes into textures owned by the converter.
struct WgpuConverter {
    shared: Arc<Shared>,
    owned: Vec<TextureId>,
}

impl TextureConverter for WgpuConverter {
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
                "buffer {} has no plane {plane_index}",
                buffer.id()
            ))
        })?;
        if plane.width != width || plane.height != height {
            return Err(TextureError::ConversionFailed(format!(
                "plane is {}x{}, expected {width}x{height}",
                plane.width, plane.height
            )));
        }
        let row_len = width as usize * format.bytes_per_texel();
        let needed = plane.bytes_per_row * (height as usize).saturating_sub(1) + row_len;
        if plane.bytes_per_row < row_len || plane.data.len() < needed {
            return Err(TextureError::ConversionFailed(format!(
                "plane layout does not match {format:?}"
            )));
        }
        let bytes_per_row = u32::try_from(plane.bytes_per_row)
            .map_err(|_| TextureError::ConversionFailed("row pitch overflows".into()))?;

        let (handle, texture) = self
            .shared
            .allocate(width, height, format, "Converted Plane")?;
        self.shared.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &plane.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.owned.push(handle.id);
        Ok(handle)
    }

    fn release(&mut self, texture: TextureHandle) {
        self.owned.retain(|id| *id != texture.id);
        if let Some(texture) = lock(&self.shared.textures).remove(&texture.id) {
            texture.destroy();
        }
    }
}

impl Drop for WgpuConverter {
    fn drop(&mut self) {
        let mut textures = lock(&self.shared.textures);
        for id in self.owned.drain(..) {
            if let Some(texture) = textures.remove(&id) {
                texture.destroy();
            }
        }
    }
}
