//! Resource access states.

/// GPU access state of a buffer or texture.
///
/// The renderer keeps one cached state per resource and emits a barrier
/// whenever a command needs a different one. The cached value must always
/// match what the GPU will see when the recorded command executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Initial state of default-heap resources; buffers decay back to it
    /// after every submission.
    #[default]
    Common,
    /// Host-visible upload memory. Never transitions.
    GenericRead,
    /// Destination of copy commands.
    CopyDest,
    /// Read as a vertex or constant buffer.
    VertexAndConstant,
    /// Read as an index buffer.
    Index,
    /// Sampled from a shader.
    ShaderRead,
    /// Written as a color attachment.
    RenderTarget,
    /// Written as a depth attachment.
    DepthWrite,
    /// Owned by the presentation engine.
    Present,
}

impl ResourceState {
    /// Short name used in logs and validation messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::GenericRead => "generic-read",
            Self::CopyDest => "copy-destination",
            Self::VertexAndConstant => "vertex/constant",
            Self::Index => "index",
            Self::ShaderRead => "shader-read",
            Self::RenderTarget => "render-target",
            Self::DepthWrite => "depth-write",
            Self::Present => "present",
        }
    }

    /// Returns true if a resource in this state may be read by a draw.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::GenericRead | Self::VertexAndConstant | Self::Index | Self::ShaderRead
        )
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
