//! Shader modules, pipeline records and the pipeline cache.
//!
//! Pipelines are immutable once created. Every pipeline shares the same
//! binding signature: one constant buffer, one sampled texture and one
//! sampler, all in bind group 0. Vertex input comes from a single
//! interleaved stream whose attributes follow fixed location semantics:
//!
//! | Location | Semantic | Format |
//! |----------|----------|--------|
//! | 0 | position | float3 |
//! | 1 | color | float3 |
//! | 2 | texcoord | float2 |

mod cache;

pub use cache::{MaterialId, PipelineCache, PipelineKey};

use crate::backend::{GpuPipeline, GpuShaderModule};
use crate::error::RhiError;
use crate::types::{
    DepthStencilState, GraphicsPipelineDescriptor, PrimitiveTopology, ShaderStage, TextureFormat,
    VertexLayout,
};

/// A shader module owned by the pipeline tables.
#[derive(Debug)]
pub struct ShaderModuleRecord {
    pub native: GpuShaderModule,
    pub stage: ShaderStage,
    pub label: Option<String>,
}

/// An immutable graphics pipeline.
#[derive(Debug)]
pub struct PipelineRecord {
    pub native: GpuPipeline,
    pub topology: PrimitiveTopology,
    pub vertex_stride: u32,
    pub layout: VertexLayout,
    /// Resolved color target format.
    pub color_format: TextureFormat,
    pub depth: Option<DepthStencilState>,
    pub label: Option<String>,
}

/// Checks a vertex layout against the fixed attribute semantics.
pub fn validate_vertex_layout(layout: &VertexLayout) -> Result<(), RhiError> {
    if layout.stride == 0 {
        return Err(RhiError::InvalidArgument(
            "vertex stride cannot be zero".to_string(),
        ));
    }
    if layout.attribute(0).is_none() {
        return Err(RhiError::InvalidArgument(
            "vertex layout has no position attribute at location 0".to_string(),
        ));
    }

    for (i, attribute) in layout.attributes.iter().enumerate() {
        if layout.attributes[..i]
            .iter()
            .any(|a| a.location == attribute.location)
        {
            return Err(RhiError::InvalidArgument(format!(
                "vertex location {} is declared twice",
                attribute.location
            )));
        }
        let expected = attribute.semantic().format();
        if attribute.format != expected {
            return Err(RhiError::InvalidArgument(format!(
                "vertex location {} ({:?}) must use {expected:?}, got {:?}",
                attribute.location,
                attribute.semantic(),
                attribute.format
            )));
        }
        let end = attribute.offset as u64 + attribute.format.size() as u64;
        if end > layout.stride as u64 {
            return Err(RhiError::InvalidArgument(format!(
                "vertex location {} ends at byte {end}, past the stride of {}",
                attribute.location, layout.stride
            )));
        }
    }
    Ok(())
}

/// Checks everything about a pipeline descriptor that does not need the
/// resource tables.
pub fn validate_pipeline(descriptor: &GraphicsPipelineDescriptor) -> Result<(), RhiError> {
    validate_vertex_layout(&descriptor.vertex_layout)?;
    if let Some(format) = descriptor.color_format
        && format.is_depth_stencil()
    {
        return Err(RhiError::InvalidArgument(format!(
            "color target format cannot be {format:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Handle, ShaderModuleHandle, VertexAttribute, VertexFormat};

    fn layout() -> VertexLayout {
        VertexLayout::new(32)
            .with_attribute(VertexAttribute::new(0, VertexFormat::Float32x3, 0))
            .with_attribute(VertexAttribute::new(1, VertexFormat::Float32x3, 12))
            .with_attribute(VertexAttribute::new(2, VertexFormat::Float32x2, 24))
    }

    #[test]
    fn test_valid_layout() {
        assert!(validate_vertex_layout(&layout()).is_ok());
    }

    #[test]
    fn test_position_required() {
        let layout =
            VertexLayout::new(8).with_attribute(VertexAttribute::new(2, VertexFormat::Float32x2, 0));
        assert!(validate_vertex_layout(&layout).is_err());
    }

    #[test]
    fn test_semantic_format_mismatch() {
        let layout =
            VertexLayout::new(16).with_attribute(VertexAttribute::new(0, VertexFormat::Float32x4, 0));
        assert!(validate_vertex_layout(&layout).is_err());
    }

    #[test]
    fn test_attribute_past_stride() {
        let mut layout = layout();
        layout.stride = 28;
        assert!(validate_vertex_layout(&layout).is_err());
    }

    #[test]
    fn test_duplicate_location() {
        let layout = layout().with_attribute(VertexAttribute::new(1, VertexFormat::Float32x3, 0));
        assert!(validate_vertex_layout(&layout).is_err());
    }

    #[test]
    fn test_depth_color_format_rejected() {
        let descriptor = GraphicsPipelineDescriptor::new(
            ShaderModuleHandle::from_raw(1),
            ShaderModuleHandle::from_raw(2),
            layout(),
        )
        .with_color_format(TextureFormat::Depth32Float);
        assert!(validate_pipeline(&descriptor).is_err());
    }
}
