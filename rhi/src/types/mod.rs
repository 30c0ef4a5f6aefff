//! Common types and descriptors for RHI objects.
//!
//! This module contains handles, format enums, usage flags, and descriptor
//! structs used throughout the RHI.

mod binding;
mod buffer;
mod common;
mod handles;
mod pipeline;
mod sampler;
mod swapchain;
mod texture;

pub use binding::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindingResource, BindingType, ShaderStages,
};
pub use buffer::{BufferDescriptor, BufferUsage, IndexFormat};
pub use common::{ClearColor, Extent2d, ScissorRect, Viewport};
pub use handles::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, CommandListHandle, Handle,
    PipelineHandle, SamplerHandle, ShaderModuleHandle, SwapchainHandle, TextureHandle,
};
pub use pipeline::{
    CompareFunction, DepthStencilState, GraphicsPipelineDescriptor, PrimitiveTopology,
    ShaderModuleDescriptor, ShaderStage, VertexAttribute, VertexFormat, VertexLayout,
    VertexSemantic,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use swapchain::{PresentMode, SwapchainDescriptor};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};
