//! # Ember RHI
//!
//! Render hardware interface for the Ember renderer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Renderer`] - frame pipelining across several frames in flight, resource
//!   tables with per-resource state tracking, descriptor heaps and upload rings
//! - [`RendererApi`] - the capability interface render-graph code records through
//! - [`RenderGraph`] - an ordered pass list that drives one frame
//! - [`GpuBackend`] - the seam to a GPU API: a CPU software backend (always
//!   available) and wgpu (feature `wgpu-backend`)
//!
//! ## Example
//!
//! ```ignore
//! use ember_rhi::{ColorTarget, RenderGraph, RenderPass, Renderer, RendererConfig};
//!
//! let mut renderer = Renderer::new(RendererConfig::default())?;
//! let swapchain = renderer.create_swapchain(&SwapchainDescriptor::new(
//!     1280, 720, TextureFormat::Bgra8Unorm,
//! ))?;
//!
//! let mut graph = RenderGraph::new();
//! graph.add_pass(
//!     RenderPass::new("clear")
//!         .with_color(ColorTarget::backbuffer(swapchain, [0.07, 0.08, 0.12, 1.0])),
//! );
//! graph.execute(&mut renderer, swapchain)?;
//! renderer.shutdown()?;
//! ```

pub mod api;
pub mod backend;
pub mod bind_group;
pub mod commands;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod graph;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod swapchain;
pub mod types;

pub use api::{Capabilities, RendererApi};
pub use backend::{BackendKind, GpuBackend, create_backend};
pub use commands::{ColorAttachment, DepthAttachment, LoadOp, RenderingInfo};
pub use config::RendererConfig;
pub use error::RhiError;
pub use frame::{FrameContext, FrameState};
pub use graph::{
    ColorTarget, DepthTarget, ExecuteOptions, GraphError, GraphState, PassContext, PassHandle,
    RecordPass, RenderGraph, RenderPass,
};
pub use pipeline::{MaterialId, PipelineCache, PipelineKey};
pub use renderer::{Renderer, RendererStats};
pub use resources::ResourceState;
pub use types::*;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_render_graph_creation() {
        let graph = RenderGraph::new();
        assert!(graph.passes().is_empty());
    }
}
