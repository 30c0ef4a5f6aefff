//! GPU backend abstraction layer.
//!
//! The renderer talks to the GPU only through the [`GpuBackend`] trait. A
//! backend is picked at startup with [`BackendKind`]:
//!
//! - `software`: executes command lists on a CPU queue thread with a
//!   validation layer and a fixed-function rasterizer. Always available; it
//!   is the test double used by the integration tests and the demo.
//! - `wgpu` (feature `wgpu-backend`): translates command lists to wgpu.
//!
//! Native objects are exposed as enums with one variant per backend. They
//! are cheap to clone (reference counted), which lets recorded commands keep
//! the objects they use alive until the GPU is done with them.

pub mod software;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_impl;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::api::Capabilities;
use crate::commands::Command;
use crate::config::RendererConfig;
use crate::error::RhiError;
use crate::resources::ResourceState;
use crate::types::{
    BufferDescriptor, GraphicsPipelineDescriptor, SamplerDescriptor, ShaderModuleDescriptor,
    TextureDescriptor, TextureFormat,
};

/// Available backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU implementation.
    #[default]
    Software,
    /// wgpu implementation. Requires the `wgpu-backend` feature.
    Wgpu,
}

impl BackendKind {
    /// Backend name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Wgpu => "wgpu",
        }
    }
}

/// Handle to a native GPU buffer.
#[derive(Clone)]
pub enum GpuBuffer {
    Software(Arc<software::SoftBuffer>),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_impl::WgpuBuffer>),
}

impl GpuBuffer {
    /// Returns true if both handles refer to the same native buffer.
    pub fn same_object(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Software(a), Self::Software(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "wgpu-backend")]
            (Self::Wgpu(a), Self::Wgpu(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "wgpu-backend")]
            _ => false,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software(buffer) => f
                .debug_struct("GpuBuffer::Software")
                .field("label", &buffer.label())
                .field("size", &buffer.size())
                .finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(buffer) => f
                .debug_tuple("GpuBuffer::Wgpu")
                .field(&buffer.buffer)
                .finish(),
        }
    }
}

/// Handle to a native GPU texture.
#[derive(Clone)]
pub enum GpuTexture {
    Software(Arc<software::SoftTexture>),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_impl::WgpuTexture>),
}

impl GpuTexture {
    /// Returns true if both handles refer to the same native texture.
    pub fn same_object(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Software(a), Self::Software(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "wgpu-backend")]
            (Self::Wgpu(a), Self::Wgpu(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "wgpu-backend")]
            _ => false,
        }
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software(texture) => f
                .debug_struct("GpuTexture::Software")
                .field("label", &texture.descriptor().label)
                .field("size", &texture.descriptor().size)
                .field("format", &texture.descriptor().format)
                .finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(texture) => f
                .debug_tuple("GpuTexture::Wgpu")
                .field(&texture.texture)
                .finish(),
        }
    }
}

/// Handle to a native sampler.
#[derive(Clone)]
pub enum GpuSampler {
    Software(Arc<SamplerDescriptor>),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Sampler>),
}

impl std::fmt::Debug for GpuSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software(desc) => f
                .debug_struct("GpuSampler::Software")
                .field("label", &desc.label)
                .finish_non_exhaustive(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(sampler) => f.debug_tuple("GpuSampler::Wgpu").field(sampler).finish(),
        }
    }
}

/// Handle to a compiled shader module.
#[derive(Clone)]
pub enum GpuShaderModule {
    Software(Arc<ShaderModuleDescriptor>),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::ShaderModule>),
}

impl std::fmt::Debug for GpuShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software(desc) => f
                .debug_struct("GpuShaderModule::Software")
                .field("stage", &desc.stage)
                .field("entry_point", &desc.entry_point)
                .finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(module) => f
                .debug_tuple("GpuShaderModule::Wgpu")
                .field(module)
                .finish(),
        }
    }
}

/// Handle to an immutable graphics pipeline.
#[derive(Clone)]
pub enum GpuPipeline {
    Software(Arc<software::SoftPipeline>),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_impl::WgpuPipeline>),
}

impl std::fmt::Debug for GpuPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software(pipeline) => f
                .debug_struct("GpuPipeline::Software")
                .field("topology", &pipeline.topology)
                .finish_non_exhaustive(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(pipeline) => f
                .debug_tuple("GpuPipeline::Wgpu")
                .field(&pipeline.pipeline)
                .finish(),
        }
    }
}

/// Status of a fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not reached the value yet.
    Unsignaled,
    /// The fence reached the value.
    Signaled,
}

/// Host-visible view of an upload buffer.
pub trait HostMapping: Send + Sync {
    /// Size of the mapped range in bytes.
    fn len(&self) -> u64;

    /// Returns true for an empty mapping.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the mapping at `offset`.
    fn write(&self, offset: u64, data: &[u8]) -> Result<(), RhiError>;
}

/// A persistently mapped range, shared between the owner and the backend.
pub type MappedRange = Arc<dyn HostMapping>;

/// Everything a backend needs to build a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineBuildInfo<'a> {
    pub descriptor: &'a GraphicsPipelineDescriptor,
    pub vertex: &'a GpuShaderModule,
    pub fragment: &'a GpuShaderModule,
    /// Depth format the pipeline renders against when depth is enabled.
    pub depth_format: Option<TextureFormat>,
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// A backend owns one queue and one monotonically increasing fence. Work is
/// executed in submission order; `signal(v)` completes once every earlier
/// submission finished.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Features this backend implements.
    fn capabilities(&self) -> Capabilities;

    /// Create a buffer in `initial_state`.
    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuBuffer, RhiError>;

    /// Create a texture in `initial_state`.
    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuTexture, RhiError>;

    /// Create a sampler.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, RhiError>;

    /// Create a shader module from bytecode.
    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<GpuShaderModule, RhiError>;

    /// Create a graphics pipeline with the fixed constant-buffer, texture and
    /// sampler binding layout.
    fn create_pipeline(&self, info: &PipelineBuildInfo<'_>) -> Result<GpuPipeline, RhiError>;

    /// Persistently map a host-visible buffer.
    fn map_buffer(&self, buffer: &GpuBuffer) -> Result<MappedRange, RhiError>;

    /// Queue a closed command list for execution.
    fn submit(&self, commands: Vec<Command>) -> Result<(), RhiError>;

    /// Queue a fence signal to `value` after all earlier submissions.
    fn signal(&self, value: u64) -> Result<(), RhiError>;

    /// Highest fence value the GPU has reached.
    fn completed_value(&self) -> u64;

    /// Block until the fence reaches `value` or `timeout` elapses.
    fn wait(&self, value: u64, timeout: Duration) -> Result<FenceStatus, RhiError>;

    /// Queue presentation of a back buffer after all earlier submissions.
    fn present(&self, texture: &GpuTexture, image_index: u32) -> Result<(), RhiError>;

    /// Read buffer contents. The caller waits for idle first.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Result<Vec<u8>, RhiError>;

    /// Read mip 0 of a texture, rows tightly packed. The caller waits for
    /// idle first.
    fn read_texture(&self, texture: &GpuTexture) -> Result<Vec<u8>, RhiError>;
}

/// Creates the backend selected in `config`.
pub fn create_backend(
    kind: BackendKind,
    config: &RendererConfig,
) -> Result<Arc<dyn GpuBackend>, RhiError> {
    match kind {
        BackendKind::Software => {
            log::info!("Using software backend");
            Ok(Arc::new(software::SoftwareBackend::new()?))
        }
        #[cfg(feature = "wgpu-backend")]
        BackendKind::Wgpu => {
            let backend = wgpu_impl::WgpuBackend::new(config)?;
            log::info!("Using wgpu backend ({})", backend.adapter_name());
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "wgpu-backend"))]
        BackendKind::Wgpu => {
            let _ = config;
            Err(RhiError::InitializationFailed(
                "the wgpu backend requires the `wgpu-backend` feature".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_default() {
        assert_eq!(BackendKind::default(), BackendKind::Software);
        assert_eq!(BackendKind::Wgpu.name(), "wgpu");
    }

    #[test]
    fn test_create_software_backend() {
        let backend = create_backend(BackendKind::Software, &RendererConfig::default()).unwrap();
        assert_eq!(backend.name(), "software");
        assert!(backend.capabilities().contains(Capabilities::GRAPH_EXECUTE));
    }

    #[cfg(not(feature = "wgpu-backend"))]
    #[test]
    fn test_wgpu_without_feature_fails() {
        let result = create_backend(BackendKind::Wgpu, &RendererConfig::default());
        assert!(matches!(result, Err(RhiError::InitializationFailed(_))));
    }
}
