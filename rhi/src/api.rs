//! The capability interface consumed by render-graph code.
//!
//! Pass recorders and the graph executor never see [`Renderer`] directly;
//! they drive frames through [`RendererApi`], and the executor checks the
//! backend's [`Capabilities`] before touching the GPU.
//!
//! [`Renderer`]: crate::Renderer

use crate::commands::RenderingInfo;
use crate::error::RhiError;
use crate::types::{
    BindGroupHandle, BufferHandle, CommandListHandle, IndexFormat, PipelineHandle,
    SwapchainHandle, TextureHandle,
};

bitflags::bitflags! {
    /// Features a backend implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Command list recording and submission.
        const RECORD_COMMANDS = 1 << 0;
        /// Begin/end rendering scopes with color and depth attachments.
        const RENDERING = 1 << 1;
        /// Graphics pipeline creation.
        const PIPELINES = 1 << 2;
        /// Descriptor tables and bind groups.
        const BIND_GROUPS = 1 << 3;
        /// Staged buffer and texture uploads.
        const UPLOAD = 1 << 4;
        /// Swapchain presentation.
        const PRESENT = 1 << 5;
        /// Reading buffers and textures back to the host.
        const READBACK = 1 << 6;

        /// Everything the render graph executor needs.
        const GRAPH_EXECUTE = Self::RECORD_COMMANDS.bits()
            | Self::RENDERING.bits()
            | Self::PIPELINES.bits()
            | Self::BIND_GROUPS.bits()
            | Self::UPLOAD.bits()
            | Self::PRESENT.bits();
    }
}

impl Capabilities {
    /// Returns an error naming every flag of `required` that is missing.
    pub fn require(self, required: Capabilities) -> Result<(), RhiError> {
        let missing = required.difference(self);
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = missing.iter_names().map(|(name, _)| name).collect();
        Err(RhiError::MissingCapability(names.join(", ")))
    }
}

/// Operations the render graph and pass recorders use.
///
/// Method semantics are documented on [`Renderer`](crate::Renderer), which
/// implements this trait.
pub trait RendererApi {
    /// Capabilities of the active backend.
    fn capabilities(&self) -> Capabilities;

    fn begin_frame(&mut self) -> Result<(), RhiError>;

    fn end_frame(&mut self) -> Result<(), RhiError>;

    /// Close the open frame, dropping its unsubmitted work.
    fn abort_frame(&mut self) -> Result<(), RhiError>;

    fn is_frame_open(&self) -> bool;

    /// Slot of the open (or most recent) frame.
    fn frame_index(&self) -> u32;

    fn current_backbuffer(&self, swapchain: SwapchainHandle) -> Result<TextureHandle, RhiError>;

    fn depth_buffer(&self, swapchain: SwapchainHandle) -> Result<Option<TextureHandle>, RhiError>;

    fn update_buffer(
        &mut self,
        buffer: BufferHandle,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<(), RhiError>;

    fn begin_commands(&mut self) -> Result<CommandListHandle, RhiError>;

    fn cmd_begin_rendering(
        &mut self,
        cmd: CommandListHandle,
        info: &RenderingInfo,
    ) -> Result<(), RhiError>;

    fn cmd_end_rendering(&mut self, cmd: CommandListHandle) -> Result<(), RhiError>;

    fn cmd_set_pipeline(
        &mut self,
        cmd: CommandListHandle,
        pipeline: PipelineHandle,
    ) -> Result<(), RhiError>;

    fn cmd_set_bind_group(
        &mut self,
        cmd: CommandListHandle,
        index: u32,
        group: BindGroupHandle,
    ) -> Result<(), RhiError>;

    fn cmd_set_vertex_buffer(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> Result<(), RhiError>;

    fn cmd_set_index_buffer(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) -> Result<(), RhiError>;

    fn cmd_draw(
        &mut self,
        cmd: CommandListHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), RhiError>;

    fn cmd_draw_indexed(
        &mut self,
        cmd: CommandListHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), RhiError>;

    fn end_commands(&mut self, cmd: CommandListHandle) -> Result<(), RhiError>;

    /// Submit the closed list and return the fence value stamped on it.
    fn submit(&mut self, cmd: CommandListHandle) -> Result<u64, RhiError>;

    fn present(&mut self, swapchain: SwapchainHandle) -> Result<(), RhiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_execute_set() {
        assert!(Capabilities::GRAPH_EXECUTE.contains(Capabilities::PRESENT));
        assert!(!Capabilities::GRAPH_EXECUTE.contains(Capabilities::READBACK));
        assert!(Capabilities::all().require(Capabilities::GRAPH_EXECUTE).is_ok());
    }

    #[test]
    fn test_require_names_missing_flags() {
        let caps = Capabilities::GRAPH_EXECUTE - Capabilities::PRESENT - Capabilities::UPLOAD;
        let err = caps.require(Capabilities::GRAPH_EXECUTE).unwrap_err();
        let RhiError::MissingCapability(names) = err else {
            panic!("unexpected error {err:?}");
        };
        assert!(names.contains("PRESENT"));
        assert!(names.contains("UPLOAD"));
        assert!(!names.contains("RENDERING"));
    }
}
