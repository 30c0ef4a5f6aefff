//! wgpu GPU backend implementation.
//!
//! This backend uses wgpu for cross-platform GPU access, supporting
//! Vulkan, Metal, DX12, and WebGPU.
//!
//! Each submitted command list is encoded onto one wgpu command encoder.
//! wgpu tracks resource usage itself, so barriers are only checked by the
//! frontend. Host-visible buffers live in a CPU shadow and copies out of
//! them are staged into transient wgpu buffers while encoding. Swapchain
//! images are offscreen textures; presenting is an ordering point only.

pub(crate) mod conversion;
mod encode;

use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::api::Capabilities;
use crate::commands::Command;
use crate::config::RendererConfig;
use crate::error::RhiError;
use crate::resources::ResourceState;
use crate::types::{
    BufferDescriptor, BufferUsage, SamplerDescriptor, ShaderModuleDescriptor, TextureDescriptor,
    TextureFormat,
};

use super::{
    FenceStatus, GpuBackend, GpuBuffer, GpuPipeline, GpuSampler, GpuShaderModule, GpuTexture,
    HostMapping, MappedRange, PipelineBuildInfo,
};

use conversion::*;

/// Size of the zeroed constant buffer bound when a table has no CBV.
const FALLBACK_UNIFORM_SIZE: u64 = 256;

/// Upper bound on blocking readback waits.
const READBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// A wgpu buffer, with a CPU shadow when it is host visible.
pub struct WgpuBuffer {
    pub(crate) buffer: wgpu::Buffer,
    size: u64,
    shadow: Option<Mutex<Vec<u8>>>,
}

impl WgpuBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true if the buffer lives in a CPU shadow.
    pub fn is_host_visible(&self) -> bool {
        self.shadow.is_some()
    }

    /// Copy `size` bytes at `offset` out of the shadow.
    fn shadow_bytes(&self, offset: u64, size: u64) -> Result<Vec<u8>, RhiError> {
        let shadow = self
            .shadow
            .as_ref()
            .ok_or_else(|| RhiError::InvalidArgument("buffer is not host visible".to_string()))?;
        let bytes = shadow.lock();
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= bytes.len() as u64)
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "range {offset}+{size} exceeds buffer size {}",
                    bytes.len()
                ))
            })?;
        Ok(bytes[offset as usize..end as usize].to_vec())
    }
}

impl HostMapping for WgpuBuffer {
    fn len(&self) -> u64 {
        self.size
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        let shadow = self
            .shadow
            .as_ref()
            .ok_or_else(|| RhiError::InvalidArgument("buffer is not host visible".to_string()))?;
        let mut bytes = shadow.lock();
        let end = offset as usize + data.len();
        if end > bytes.len() {
            return Err(RhiError::InvalidArgument(format!(
                "mapped write {offset}+{} exceeds buffer size {}",
                data.len(),
                bytes.len()
            )));
        }
        bytes[offset as usize..end].copy_from_slice(data);
        Ok(())
    }
}

/// A wgpu texture with its default view.
pub struct WgpuTexture {
    pub(crate) texture: wgpu::Texture,
    view: wgpu::TextureView,
    descriptor: TextureDescriptor,
}

impl WgpuTexture {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }
}

/// A render pipeline built against the fixed binding layout.
pub struct WgpuPipeline {
    pub(crate) pipeline: wgpu::RenderPipeline,
}

impl GpuBuffer {
    #[allow(unreachable_patterns)]
    fn as_wgpu(&self) -> Option<&Arc<WgpuBuffer>> {
        match self {
            Self::Wgpu(buffer) => Some(buffer),
            _ => None,
        }
    }
}

impl GpuTexture {
    #[allow(unreachable_patterns)]
    fn as_wgpu(&self) -> Option<&Arc<WgpuTexture>> {
        match self {
            Self::Wgpu(texture) => Some(texture),
            _ => None,
        }
    }
}

impl GpuSampler {
    #[allow(unreachable_patterns)]
    fn as_wgpu(&self) -> Option<&Arc<wgpu::Sampler>> {
        match self {
            Self::Wgpu(sampler) => Some(sampler),
            _ => None,
        }
    }
}

impl GpuShaderModule {
    #[allow(unreachable_patterns)]
    fn as_wgpu(&self) -> Option<&Arc<wgpu::ShaderModule>> {
        match self {
            Self::Wgpu(module) => Some(module),
            _ => None,
        }
    }
}

impl GpuPipeline {
    #[allow(unreachable_patterns)]
    fn as_wgpu(&self) -> Option<&Arc<WgpuPipeline>> {
        match self {
            Self::Wgpu(pipeline) => Some(pipeline),
            _ => None,
        }
    }
}

fn foreign(kind: &str) -> RhiError {
    RhiError::InvalidArgument(format!("{kind} was not created by the wgpu backend"))
}

/// The constant buffer, texture and sampler layout every pipeline uses,
/// plus the objects bound in place of null descriptors.
struct FixedLayout {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    fallback_uniform: wgpu::Buffer,
    fallback_view: wgpu::TextureView,
    fallback_sampler: wgpu::Sampler,
}

impl FixedLayout {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ember fixed layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ember pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let fallback_uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ember fallback constants"),
            size: FALLBACK_UNIFORM_SIZE,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });

        let white = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("ember fallback texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &white,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let fallback_view = white.create_view(&wgpu::TextureViewDescriptor::default());
        let fallback_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ember fallback sampler"),
            ..Default::default()
        });

        Self {
            bind_group_layout,
            pipeline_layout,
            fallback_uniform,
            fallback_view,
            fallback_sampler,
        }
    }
}

/// Fence emulated with queue submission indices.
#[derive(Default)]
struct Fence {
    completed: Arc<AtomicU64>,
    pending: Mutex<BTreeMap<u64, wgpu::SubmissionIndex>>,
}

/// wgpu-based GPU backend.
pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: FixedLayout,
    fence: Fence,
    presents: AtomicU64,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter.get_info().name)
            .field("completed", &self.fence.completed.load(Ordering::Acquire))
            .finish()
    }
}

impl WgpuBackend {
    /// Create the backend on the first high-performance adapter.
    pub fn new(config: &RendererConfig) -> Result<Self, RhiError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::from_build_config(),
            backend_options: wgpu::BackendOptions::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RhiError::InitializationFailed(format!("no compatible GPU adapter: {e}")))?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Ember Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| RhiError::InitializationFailed(format!("device creation failed: {e}")))?;

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        if config.upload_alignment % alignment != 0 {
            log::warn!(
                "upload alignment {} is not a multiple of the device's uniform offset alignment {alignment}",
                config.upload_alignment
            );
        }

        let layout = FixedLayout::new(&device, &queue);
        Ok(Self {
            adapter,
            device,
            queue,
            layout,
            fence: Fence::default(),
            presents: AtomicU64::new(0),
        })
    }

    /// Name of the adapter the device was created on.
    pub fn adapter_name(&self) -> String {
        self.adapter.get_info().name
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Number of presents queued so far.
    pub fn present_count(&self) -> u64 {
        self.presents.load(Ordering::Acquire)
    }

    /// Block until `index` completes, ignoring timeouts.
    fn wait_for_submission(&self, index: wgpu::SubmissionIndex, timeout: Duration) {
        if let Err(e) = self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(index),
            timeout: Some(timeout),
        }) {
            log::debug!("wgpu poll ended early: {e}");
        }
    }

    /// Build the bind group for a descriptor table, substituting fallbacks
    /// for null slots.
    fn bind_group(&self, tables: &crate::commands::DescriptorTables) -> wgpu::BindGroup {
        use crate::descriptors::Descriptor;

        let constants = match tables.views.read(tables.constant_buffer) {
            Descriptor::ConstantBuffer {
                buffer,
                offset,
                size,
            } => buffer.as_wgpu().map(|b| (Arc::clone(b), offset, size)),
            _ => None,
        };
        let texture = match tables.views.read(tables.shader_resource) {
            Descriptor::ShaderResource(texture) => texture
                .as_wgpu()
                .filter(|t| !t.descriptor.format.is_depth_stencil())
                .cloned(),
            _ => None,
        };
        let sampler = match tables.samplers.read(tables.sampler) {
            Descriptor::Sampler(sampler) => sampler.as_wgpu().cloned(),
            _ => None,
        };

        let constants = match &constants {
            Some((buffer, offset, size)) => wgpu::BufferBinding {
                buffer: &buffer.buffer,
                offset: *offset,
                size: NonZeroU64::new(*size),
            },
            None => wgpu::BufferBinding {
                buffer: &self.layout.fallback_uniform,
                offset: 0,
                size: None,
            },
        };
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ember descriptor tables"),
            layout: &self.layout.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(constants),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        texture
                            .as_ref()
                            .map_or(&self.layout.fallback_view, |t| &t.view),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(
                        sampler
                            .as_deref()
                            .unwrap_or(&self.layout.fallback_sampler),
                    ),
                },
            ],
        })
    }

    /// Copy a texture's mip 0 into a mappable buffer and read it back,
    /// removing the row padding wgpu requires.
    fn read_texture_rows(&self, texture: &WgpuTexture) -> Result<Vec<u8>, RhiError> {
        let descriptor = &texture.descriptor;
        let (aspect, texel) = match descriptor.format {
            TextureFormat::Depth32Float => (wgpu::TextureAspect::DepthOnly, 4),
            TextureFormat::Depth24Stencil8 => {
                return Err(RhiError::InvalidArgument(
                    "depth24-stencil8 textures cannot be read back".to_string(),
                ));
            }
            format => (wgpu::TextureAspect::All, format.block_size()),
        };
        let width = descriptor.size.width;
        let height = descriptor.size.height;
        let row_bytes = width * texel;
        let padded = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ember texture readback"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ember texture readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let index = self.queue.submit(std::iter::once(encoder.finish()));
        let bytes = self.map_read(&readback, index)?;

        let mut packed = Vec::with_capacity((row_bytes * height) as usize);
        for row in bytes.chunks(padded as usize).take(height as usize) {
            packed.extend_from_slice(&row[..row_bytes as usize]);
        }
        Ok(packed)
    }

    /// Map a readback buffer once `index` completed and copy it out.
    fn map_read(
        &self,
        buffer: &wgpu::Buffer,
        index: wgpu::SubmissionIndex,
    ) -> Result<Vec<u8>, RhiError> {
        let status = Arc::new(Mutex::new(None));
        let slice = buffer.slice(..);
        {
            let status = Arc::clone(&status);
            slice.map_async(wgpu::MapMode::Read, move |result| {
                *status.lock() = Some(result);
            });
        }
        self.wait_for_submission(index, READBACK_TIMEOUT);

        match status.lock().take() {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(RhiError::Backend(format!("readback map failed: {e}"))),
            None => return Err(RhiError::Backend("readback timed out".to_string())),
        }
        let bytes = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(bytes)
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        _initial_state: ResourceState,
    ) -> Result<GpuBuffer, RhiError> {
        if descriptor.size == 0 {
            return Err(RhiError::InvalidArgument(
                "buffer size cannot be zero".to_string(),
            ));
        }
        // wgpu requires copy sizes in multiples of four.
        let size = descriptor.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size,
            usage: convert_buffer_usage(descriptor.usage),
            mapped_at_creation: false,
        });
        let shadow = descriptor
            .usage
            .contains(BufferUsage::HOST_VISIBLE)
            .then(|| Mutex::new(vec![0; descriptor.size as usize]));
        Ok(GpuBuffer::Wgpu(Arc::new(WgpuBuffer {
            buffer,
            size: descriptor.size,
            shadow,
        })))
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        _initial_state: ResourceState,
    ) -> Result<GpuTexture, RhiError> {
        if descriptor.size.is_empty() {
            return Err(RhiError::InvalidArgument(format!(
                "texture size {}x{} is empty",
                descriptor.size.width, descriptor.size.height
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: descriptor.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: convert_texture_format(descriptor.format),
            usage: convert_texture_usage(descriptor.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuTexture::Wgpu(Arc::new(WgpuTexture {
            texture,
            view,
            descriptor: descriptor.clone(),
        })))
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, RhiError> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: descriptor.label.as_deref(),
            address_mode_u: convert_address_mode(descriptor.address_mode_u),
            address_mode_v: convert_address_mode(descriptor.address_mode_v),
            address_mode_w: convert_address_mode(descriptor.address_mode_w),
            mag_filter: convert_filter_mode(descriptor.mag_filter),
            min_filter: convert_filter_mode(descriptor.min_filter),
            mipmap_filter: convert_mipmap_filter_mode(descriptor.mipmap_filter),
            lod_min_clamp: descriptor.lod_min_clamp,
            lod_max_clamp: descriptor.lod_max_clamp,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        });
        Ok(GpuSampler::Wgpu(Arc::new(sampler)))
    }

    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<GpuShaderModule, RhiError> {
        let source = std::str::from_utf8(&descriptor.code).map_err(|e| {
            RhiError::InvalidArgument(format!("shader source is not valid UTF-8 WGSL: {e}"))
        })?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: descriptor.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        Ok(GpuShaderModule::Wgpu(Arc::new(module)))
    }

    fn create_pipeline(&self, info: &PipelineBuildInfo<'_>) -> Result<GpuPipeline, RhiError> {
        let vertex = info.vertex.as_wgpu().ok_or_else(|| foreign("vertex shader"))?;
        let fragment = info
            .fragment
            .as_wgpu()
            .ok_or_else(|| foreign("fragment shader"))?;
        let descriptor = info.descriptor;
        let color_format = descriptor.color_format.ok_or_else(|| {
            RhiError::InvalidArgument("pipeline color format is unresolved".to_string())
        })?;

        let attributes: Vec<wgpu::VertexAttribute> = descriptor
            .vertex_layout
            .attributes
            .iter()
            .map(|attr| wgpu::VertexAttribute {
                format: convert_vertex_format(attr.format),
                offset: u64::from(attr.offset),
                shader_location: attr.location,
            })
            .collect();
        let buffers = [wgpu::VertexBufferLayout {
            array_stride: u64::from(descriptor.vertex_layout.stride),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let depth_stencil = match (descriptor.depth_stencil, info.depth_format) {
            (Some(state), Some(format)) => Some(wgpu::DepthStencilState {
                format: convert_texture_format(format),
                depth_write_enabled: state.depth_write,
                depth_compare: if state.depth_test {
                    convert_compare_function(state.compare)
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            _ => None,
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: descriptor.label.as_deref(),
                layout: Some(&self.layout.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: vertex,
                    entry_point: None,
                    buffers: &buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: convert_topology(descriptor.topology),
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: fragment,
                    entry_point: None,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: convert_texture_format(color_format),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview_mask: None,
                cache: None,
            });
        Ok(GpuPipeline::Wgpu(Arc::new(WgpuPipeline { pipeline })))
    }

    fn map_buffer(&self, buffer: &GpuBuffer) -> Result<MappedRange, RhiError> {
        let wgpu_buffer = buffer.as_wgpu().ok_or_else(|| foreign("buffer"))?;
        if !wgpu_buffer.is_host_visible() {
            return Err(RhiError::InvalidArgument(
                "buffer is not host visible".to_string(),
            ));
        }
        let mapping: MappedRange = wgpu_buffer.clone();
        Ok(mapping)
    }

    fn submit(&self, commands: Vec<Command>) -> Result<(), RhiError> {
        let count = commands.len();
        let command_buffer = encode::encode(self, commands)?;
        self.queue.submit(std::iter::once(command_buffer));
        log::trace!("submitted {count} commands");
        Ok(())
    }

    fn signal(&self, value: u64) -> Result<(), RhiError> {
        let index = self.queue.submit(std::iter::empty());
        let completed = Arc::clone(&self.fence.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        self.fence.pending.lock().insert(value, index);
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("wgpu poll failed: {e}");
        }
        let completed = self.fence.completed.load(Ordering::Acquire);
        self.fence
            .pending
            .lock()
            .retain(|&value, _| value > completed);
        completed
    }

    fn wait(&self, value: u64, timeout: Duration) -> Result<FenceStatus, RhiError> {
        if self.completed_value() < value {
            let index = self
                .fence
                .pending
                .lock()
                .range(value..)
                .next()
                .map(|(_, index)| index.clone());
            if let Some(index) = index {
                self.wait_for_submission(index, timeout);
            }
        }
        Ok(if self.completed_value() >= value {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        })
    }

    fn present(&self, texture: &GpuTexture, image_index: u32) -> Result<(), RhiError> {
        texture.as_wgpu().ok_or_else(|| foreign("texture"))?;
        self.presents.fetch_add(1, Ordering::AcqRel);
        log::trace!("presented offscreen image {image_index}");
        Ok(())
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Result<Vec<u8>, RhiError> {
        let wgpu_buffer = buffer.as_wgpu().ok_or_else(|| foreign("buffer"))?;
        if wgpu_buffer.is_host_visible() {
            return wgpu_buffer.shadow_bytes(offset, size);
        }
        if offset.checked_add(size).is_none_or(|end| end > wgpu_buffer.size) {
            return Err(RhiError::InvalidArgument(format!(
                "range {offset}+{size} exceeds buffer size {}",
                wgpu_buffer.size
            )));
        }
        // Copies must start and end on four-byte boundaries.
        let start = offset - offset % wgpu::COPY_BUFFER_ALIGNMENT;
        let end = (offset + size).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ember buffer readback"),
            size: end - start,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ember buffer readback"),
            });
        encoder.copy_buffer_to_buffer(&wgpu_buffer.buffer, start, &readback, 0, end - start);
        let index = self.queue.submit(std::iter::once(encoder.finish()));
        let bytes = self.map_read(&readback, index)?;
        let skip = (offset - start) as usize;
        Ok(bytes[skip..skip + size as usize].to_vec())
    }

    fn read_texture(&self, texture: &GpuTexture) -> Result<Vec<u8>, RhiError> {
        let wgpu_texture = texture.as_wgpu().ok_or_else(|| foreign("texture"))?;
        self.read_texture_rows(wgpu_texture)
    }
}
