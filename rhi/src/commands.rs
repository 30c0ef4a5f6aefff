//! Backend-agnostic command stream.
//!
//! The renderer records [`Command`]s into a [`CommandList`]; a backend
//! consumes the closed list on submission. Every command carries the native
//! objects it touches, so a list stays valid even if the table handles that
//! produced it are destroyed before the GPU executes it.

use std::sync::Arc;

use crate::backend::{GpuBuffer, GpuPipeline, GpuTexture};
use crate::descriptors::GpuDescriptorHeap;
use crate::resources::ResourceState;
use crate::types::{
    ClearColor, Extent2d, IndexFormat, PipelineHandle, ScissorRect, TextureHandle, Viewport,
};

/// What happens to an attachment's contents when rendering begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Overwrite with the clear value.
    #[default]
    Clear,
    /// Keep what earlier passes wrote.
    Load,
}

/// Color attachment as requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub texture: TextureHandle,
    pub load_op: LoadOp,
    pub clear: ClearColor,
}

impl ColorAttachment {
    /// Attachment that clears to `clear`.
    pub fn clear(texture: TextureHandle, clear: ClearColor) -> Self {
        Self {
            texture,
            load_op: LoadOp::Clear,
            clear,
        }
    }

    /// Attachment that keeps its contents.
    pub fn load(texture: TextureHandle) -> Self {
        Self {
            texture,
            load_op: LoadOp::Load,
            clear: ClearColor::BLACK,
        }
    }
}

/// Depth attachment as requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub texture: TextureHandle,
    pub load_op: LoadOp,
    pub clear_depth: f32,
}

impl DepthAttachment {
    /// Attachment that clears to `depth`.
    pub fn clear(texture: TextureHandle, depth: f32) -> Self {
        Self {
            texture,
            load_op: LoadOp::Clear,
            clear_depth: depth,
        }
    }

    /// Attachment that keeps its contents.
    pub fn load(texture: TextureHandle) -> Self {
        Self {
            texture,
            load_op: LoadOp::Load,
            clear_depth: 1.0,
        }
    }
}

/// Attachments for one rendering scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderingInfo {
    pub color: Vec<ColorAttachment>,
    pub depth: Option<DepthAttachment>,
}

impl RenderingInfo {
    /// Empty attachment set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a color attachment.
    pub fn with_color(mut self, attachment: ColorAttachment) -> Self {
        self.color.push(attachment);
        self
    }

    /// Set the depth attachment.
    pub fn with_depth(mut self, attachment: DepthAttachment) -> Self {
        self.depth = Some(attachment);
        self
    }
}

/// Resource a barrier applies to.
#[derive(Debug, Clone)]
pub enum BarrierResource {
    Buffer(GpuBuffer),
    Texture(GpuTexture),
}

/// A state transition of one resource.
#[derive(Debug, Clone)]
pub struct Barrier {
    pub resource: BarrierResource,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Color attachment resolved to its render-target view.
#[derive(Debug, Clone)]
pub struct ResolvedColorAttachment {
    pub target: GpuTexture,
    pub load_op: LoadOp,
    pub clear: ClearColor,
}

/// Depth attachment resolved to its depth-stencil view.
#[derive(Debug, Clone)]
pub struct ResolvedDepthAttachment {
    pub target: GpuTexture,
    pub load_op: LoadOp,
    pub clear_depth: f32,
}

/// Shader-visible tables for the fixed binding layout.
#[derive(Debug, Clone)]
pub struct DescriptorTables {
    pub views: Arc<GpuDescriptorHeap>,
    pub samplers: Arc<GpuDescriptorHeap>,
    pub constant_buffer: u32,
    pub shader_resource: u32,
    pub sampler: u32,
}

/// One recorded GPU command.
#[derive(Debug, Clone)]
pub enum Command {
    Barrier(Barrier),
    CopyBufferRegion {
        src: GpuBuffer,
        src_offset: u64,
        dst: GpuBuffer,
        dst_offset: u64,
        size: u64,
    },
    /// Copy tightly packed rows (padded to `row_pitch`) into mip 0.
    CopyBufferToTexture {
        src: GpuBuffer,
        src_offset: u64,
        row_pitch: u32,
        dst: GpuTexture,
        extent: Extent2d,
    },
    BeginRendering {
        color: Vec<ResolvedColorAttachment>,
        depth: Option<ResolvedDepthAttachment>,
        extent: Extent2d,
    },
    EndRendering,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetPipeline(GpuPipeline),
    SetDescriptorTables(DescriptorTables),
    SetVertexBuffer {
        buffer: GpuBuffer,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: GpuBuffer,
        offset: u64,
        format: IndexFormat,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Barrier(_) => "barrier",
            Self::CopyBufferRegion { .. } => "copy-buffer",
            Self::CopyBufferToTexture { .. } => "copy-buffer-to-texture",
            Self::BeginRendering { .. } => "begin-rendering",
            Self::EndRendering => "end-rendering",
            Self::SetViewport(_) => "set-viewport",
            Self::SetScissor(_) => "set-scissor",
            Self::SetPipeline(_) => "set-pipeline",
            Self::SetDescriptorTables(_) => "set-descriptor-tables",
            Self::SetVertexBuffer { .. } => "set-vertex-buffer",
            Self::SetIndexBuffer { .. } => "set-index-buffer",
            Self::Draw { .. } => "draw",
            Self::DrawIndexed { .. } => "draw-indexed",
        }
    }
}

/// Binding state tracked while recording, used to reject draws that would
/// read unbound state.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingState {
    pub rendering: Option<ActiveRendering>,
    pub pipeline: Option<PipelineHandle>,
    pub index_buffer: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ActiveRendering {
    pub color: Vec<TextureHandle>,
    pub depth: Option<TextureHandle>,
}

/// Command recorder owned by one frame slot.
///
/// The list is reset when its slot is reused; the command buffer keeps its
/// allocation across frames.
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
    open: bool,
    submitted: bool,
    pub(crate) recording: RecordingState,
}

impl CommandList {
    /// Create a closed, empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all commands and open the list for recording.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.open = true;
        self.submitted = false;
        self.recording = RecordingState::default();
    }

    /// Append a command.
    pub fn push(&mut self, command: Command) {
        debug_assert!(self.open, "recording into a closed command list");
        self.commands.push(command);
    }

    /// Recorded commands.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns true while commands can be appended.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns true between `BeginRendering` and `EndRendering`.
    pub fn is_rendering(&self) -> bool {
        self.recording.rendering.is_some()
    }

    /// Returns true once the closed list was handed to the queue.
    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Stop recording.
    pub fn close(&mut self) {
        self.open = false;
    }

    /// Close the list and drop its commands without submitting them.
    ///
    /// Returns the dropped commands so the caller can undo the state
    /// transitions they recorded.
    pub fn discard(&mut self) -> Vec<Command> {
        self.open = false;
        self.recording = RecordingState::default();
        let capacity = self.commands.capacity();
        std::mem::replace(&mut self.commands, Vec::with_capacity(capacity))
    }

    /// Hand the recorded commands to the queue.
    ///
    /// The list keeps a buffer of the same capacity for the next frame.
    pub fn take_for_submit(&mut self) -> Vec<Command> {
        self.submitted = true;
        let capacity = self.commands.capacity();
        std::mem::replace(&mut self.commands, Vec::with_capacity(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_opens_and_clears() {
        let mut list = CommandList::new();
        assert!(!list.is_open());
        list.reset();
        list.push(Command::EndRendering);
        assert_eq!(list.len(), 1);

        list.close();
        let commands = list.take_for_submit();
        assert_eq!(commands.len(), 1);
        assert!(list.is_submitted());
        assert!(list.is_empty());

        list.reset();
        assert!(list.is_open());
        assert!(!list.is_submitted());
    }

    #[test]
    fn test_discard_closes_without_submitting() {
        let mut list = CommandList::new();
        list.reset();
        list.push(Command::EndRendering);
        list.recording.index_buffer = true;

        let dropped = list.discard();
        assert_eq!(dropped.len(), 1);
        assert!(list.is_empty());
        assert!(!list.is_open());
        assert!(!list.is_submitted());
        assert!(!list.recording.index_buffer);
    }

    #[test]
    fn test_rendering_info_builder() {
        let target = TextureHandle::NULL;
        let info = RenderingInfo::new()
            .with_color(ColorAttachment::clear(target, ClearColor::BLACK))
            .with_depth(DepthAttachment::clear(target, 1.0));
        assert_eq!(info.color.len(), 1);
        assert_eq!(info.color[0].load_op, LoadOp::Clear);
        assert_eq!(info.depth.map(|d| d.clear_depth), Some(1.0));
        assert_eq!(ColorAttachment::load(target).load_op, LoadOp::Load);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::EndRendering.name(), "end-rendering");
        assert_eq!(
            Command::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0
            }
            .name(),
            "draw"
        );
    }
}
