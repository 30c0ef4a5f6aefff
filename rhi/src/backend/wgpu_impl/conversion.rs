//! Type conversions between Ember types and wgpu types.

use crate::commands::LoadOp;
use crate::types::{
    AddressMode, BufferUsage, ClearColor, CompareFunction, FilterMode, IndexFormat,
    PrimitiveTopology, TextureFormat, TextureUsage, VertexFormat,
};

/// Convert BufferUsage flags to wgpu buffer usages.
///
/// Every buffer can be copied from and to so that uploads and readback work
/// regardless of the declared usage. Host-visible buffers are shadowed on
/// the CPU and never mapped by wgpu.
pub fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut result = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;

    if usage.contains(BufferUsage::VERTEX) {
        result |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= wgpu::BufferUsages::UNIFORM;
    }

    result
}

/// Convert TextureFormat to wgpu format.
pub fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

/// Convert TextureUsage flags to wgpu texture usages. Textures are always
/// copy sources for readback.
pub fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut result = wgpu::TextureUsages::COPY_SRC;

    if usage.contains(TextureUsage::COPY_DST) {
        result |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        // Initial data always arrives through a copy.
        result |= wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }

    result
}

/// Convert AddressMode to wgpu address mode.
pub fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

/// Convert FilterMode to wgpu filter mode.
pub fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

/// Convert FilterMode to wgpu mipmap filter mode.
pub fn convert_mipmap_filter_mode(mode: FilterMode) -> wgpu::MipmapFilterMode {
    match mode {
        FilterMode::Nearest => wgpu::MipmapFilterMode::Nearest,
        FilterMode::Linear => wgpu::MipmapFilterMode::Linear,
    }
}

/// Convert CompareFunction to wgpu compare function.
pub fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
    match func {
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

/// Convert a color load op and its clear value.
pub fn convert_load_op(op: LoadOp, clear: ClearColor) -> wgpu::LoadOp<wgpu::Color> {
    match op {
        LoadOp::Clear => wgpu::LoadOp::Clear(wgpu::Color {
            r: f64::from(clear.r),
            g: f64::from(clear.g),
            b: f64::from(clear.b),
            a: f64::from(clear.a),
        }),
        LoadOp::Load => wgpu::LoadOp::Load,
    }
}

/// Convert a depth load op and its clear value.
pub fn convert_depth_load_op(op: LoadOp, clear_depth: f32) -> wgpu::LoadOp<f32> {
    match op {
        LoadOp::Clear => wgpu::LoadOp::Clear(clear_depth),
        LoadOp::Load => wgpu::LoadOp::Load,
    }
}

/// Convert VertexFormat to wgpu vertex format.
pub fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

/// Convert PrimitiveTopology to wgpu topology.
pub fn convert_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
    }
}

pub fn convert_index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_always_copyable() {
        let usage = convert_buffer_usage(BufferUsage::VERTEX);
        assert!(usage.contains(wgpu::BufferUsages::VERTEX));
        assert!(usage.contains(wgpu::BufferUsages::COPY_DST));
        assert!(usage.contains(wgpu::BufferUsages::COPY_SRC));
        assert!(!usage.contains(wgpu::BufferUsages::MAP_WRITE));
    }

    #[test]
    fn test_depth_format() {
        assert_eq!(
            convert_texture_format(TextureFormat::Depth24Stencil8),
            wgpu::TextureFormat::Depth24PlusStencil8
        );
    }

    #[test]
    fn test_load_op_clear_value() {
        let op = convert_load_op(LoadOp::Clear, ClearColor::new(1.0, 0.5, 0.0, 1.0));
        assert!(matches!(op, wgpu::LoadOp::Clear(c) if c.g == 0.5));
        assert!(matches!(convert_depth_load_op(LoadOp::Load, 1.0), wgpu::LoadOp::Load));
    }
}
