//! Pipeline creation inputs.
//!
//! These mirror the metadata emitted offline by shader reflection: a vertex
//! attribute array with a stride, and the shader bytecode blobs.

use super::{ShaderModuleHandle, TextureFormat};

/// Format hint of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// Two 32-bit floats.
    Float32x2,
    /// Three 32-bit floats.
    Float32x3,
    /// Four 32-bit floats.
    Float32x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(self) -> u32 {
        match self {
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }

    /// Number of float components.
    pub fn components(self) -> usize {
        match self {
            Self::Float32x2 => 2,
            Self::Float32x3 => 3,
            Self::Float32x4 => 4,
        }
    }
}

/// Fixed semantic bound to an attribute location.
///
/// | Location | Semantic | Format |
/// |----------|----------|--------|
/// | 0 | position | float3 |
/// | 1 | color | float3 |
/// | 2+ | texcoord | float2 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    Position,
    Color,
    TexCoord,
}

impl VertexSemantic {
    /// Semantic conventionally assigned to a location.
    pub fn from_location(location: u32) -> Self {
        match location {
            0 => Self::Position,
            1 => Self::Color,
            _ => Self::TexCoord,
        }
    }

    /// Format the semantic is read with.
    pub fn format(self) -> VertexFormat {
        match self {
            Self::Position | Self::Color => VertexFormat::Float32x3,
            Self::TexCoord => VertexFormat::Float32x2,
        }
    }
}

/// A single vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader location.
    pub location: u32,
    /// Format hint from reflection.
    pub format: VertexFormat,
    /// Byte offset inside the vertex.
    pub offset: u32,
}

impl VertexAttribute {
    /// Create an attribute.
    pub fn new(location: u32, format: VertexFormat, offset: u32) -> Self {
        Self {
            location,
            format,
            offset,
        }
    }

    /// Semantic implied by the location.
    pub fn semantic(&self) -> VertexSemantic {
        VertexSemantic::from_location(self.location)
    }
}

/// Interleaved single-stream vertex layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayout {
    /// Size of one vertex in bytes.
    pub stride: u32,
    /// Attributes read from the stream.
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Create an empty layout with the given stride.
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, attribute: VertexAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Looks up the attribute at a location.
    pub fn attribute(&self, location: u32) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.location == location)
    }
}

/// Primitive topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum PrimitiveTopology {
    /// Every three vertices form a triangle.
    #[default]
    TriangleList,
    /// Each vertex after the first two forms a triangle with the previous two.
    TriangleStrip,
    /// Every two vertices form a line.
    LineList,
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    #[default]
    Less,
    LessEqual,
    Greater,
    Always,
}

impl CompareFunction {
    /// Evaluates `incoming <op> stored`.
    pub fn passes(self, incoming: f32, stored: f32) -> bool {
        match self {
            Self::Less => incoming < stored,
            Self::LessEqual => incoming <= stored,
            Self::Greater => incoming > stored,
            Self::Always => true,
        }
    }
}

/// Depth test configuration. The depth format is taken from the active
/// swapchain's depth buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    /// Enable depth testing.
    pub depth_test: bool,
    /// Write depth on pass.
    pub depth_write: bool,
    /// Comparison function.
    pub compare: CompareFunction,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare: CompareFunction::Less,
        }
    }
}

/// Shader stage a module is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Descriptor for creating a shader module from compiled bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderModuleDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Stage the bytecode was compiled for.
    pub stage: ShaderStage,
    /// Backend specific bytecode (WGSL text for the wgpu backend).
    pub code: Vec<u8>,
    /// Entry point name.
    pub entry_point: String,
}

impl ShaderModuleDescriptor {
    /// Create a descriptor with the conventional entry point for the stage.
    pub fn new(stage: ShaderStage, code: impl Into<Vec<u8>>) -> Self {
        let entry_point = match stage {
            ShaderStage::Vertex => "vs_main",
            ShaderStage::Fragment => "fs_main",
        };
        Self {
            label: None,
            stage,
            code: code.into(),
            entry_point: entry_point.to_string(),
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Descriptor for creating a graphics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Vertex shader module.
    pub vertex_shader: ShaderModuleHandle,
    /// Fragment shader module.
    pub fragment_shader: ShaderModuleHandle,
    /// Vertex input layout.
    pub vertex_layout: VertexLayout,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Color target format. `None` uses the swapchain format.
    pub color_format: Option<TextureFormat>,
    /// Depth configuration. `None` disables depth.
    pub depth_stencil: Option<DepthStencilState>,
}

impl GraphicsPipelineDescriptor {
    /// Create a descriptor with triangle-list topology and no depth.
    pub fn new(
        vertex_shader: ShaderModuleHandle,
        fragment_shader: ShaderModuleHandle,
        vertex_layout: VertexLayout,
    ) -> Self {
        Self {
            label: None,
            vertex_shader,
            fragment_shader,
            vertex_layout,
            topology: PrimitiveTopology::TriangleList,
            color_format: None,
            depth_stencil: None,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the primitive topology.
    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set an explicit color target format.
    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_format = Some(format);
        self
    }

    /// Enable depth testing.
    pub fn with_depth_stencil(mut self, state: DepthStencilState) -> Self {
        self.depth_stencil = Some(state);
        self
    }
}
