//! Render passes and the context handed to their recorders.

use crate::api::RendererApi;
use crate::error::RhiError;
use crate::types::{
    BindGroupHandle, BufferHandle, CommandListHandle, IndexFormat, PipelineHandle, TextureHandle,
};

use super::target::{ColorTarget, DepthTarget};

/// Records the draws of one pass.
///
/// Recorders are `'static`: they capture the handles they use by value and
/// reach the renderer only through the [`PassContext`]. Any closure
/// `FnMut(&mut PassContext) -> Result<(), RhiError>` is a recorder.
pub trait RecordPass: 'static {
    fn record(&mut self, ctx: &mut PassContext<'_>) -> Result<(), RhiError>;
}

impl<F> RecordPass for F
where
    F: FnMut(&mut PassContext<'_>) -> Result<(), RhiError> + 'static,
{
    fn record(&mut self, ctx: &mut PassContext<'_>) -> Result<(), RhiError> {
        self(ctx)
    }
}

/// A pass in the render graph: its targets and its recorder.
pub struct RenderPass {
    name: String,
    color: Vec<ColorTarget>,
    depth: Option<DepthTarget>,
    recorder: Option<Box<dyn RecordPass>>,
}

impl RenderPass {
    /// Create a pass without targets or recorder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: Vec::new(),
            depth: None,
            recorder: None,
        }
    }

    /// Add a color target.
    pub fn with_color(mut self, target: ColorTarget) -> Self {
        self.color.push(target);
        self
    }

    /// Set the depth target.
    pub fn with_depth(mut self, target: DepthTarget) -> Self {
        self.depth = Some(target);
        self
    }

    /// Record the pass with a closure.
    pub fn with_record<F>(self, record: F) -> Self
    where
        F: FnMut(&mut PassContext<'_>) -> Result<(), RhiError> + 'static,
    {
        self.with_recorder(record)
    }

    /// Record the pass with any [`RecordPass`] implementation.
    pub fn with_recorder(mut self, recorder: impl RecordPass) -> Self {
        self.recorder = Some(Box::new(recorder));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color_targets(&self) -> &[ColorTarget] {
        &self.color
    }

    pub fn depth_target(&self) -> Option<&DepthTarget> {
        self.depth.as_ref()
    }

    /// Returns true if the pass records anything between its begin and end.
    pub fn has_recorder(&self) -> bool {
        self.recorder.is_some()
    }

    pub(super) fn name_and_recorder(&mut self) -> (&str, Option<&mut (dyn RecordPass + 'static)>) {
        (&self.name, self.recorder.as_deref_mut())
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("name", &self.name)
            .field("color", &self.color)
            .field("depth", &self.depth)
            .field("has_recorder", &self.recorder.is_some())
            .finish()
    }
}

/// What a pass recorder sees: the renderer, the open command list and the
/// textures the pass renders to.
pub struct PassContext<'a> {
    renderer: &'a mut dyn RendererApi,
    cmd: CommandListHandle,
    index: usize,
    name: &'a str,
    color: &'a [TextureHandle],
    depth: Option<TextureHandle>,
}

impl<'a> PassContext<'a> {
    pub(super) fn new(
        renderer: &'a mut dyn RendererApi,
        cmd: CommandListHandle,
        index: usize,
        name: &'a str,
        color: &'a [TextureHandle],
        depth: Option<TextureHandle>,
    ) -> Self {
        Self {
            renderer,
            cmd,
            index,
            name,
            color,
            depth,
        }
    }

    /// The renderer, for operations without a convenience wrapper.
    pub fn renderer(&mut self) -> &mut dyn RendererApi {
        self.renderer
    }

    /// The open command list.
    pub fn cmd(&self) -> CommandListHandle {
        self.cmd
    }

    /// Position of the pass in the graph.
    pub fn pass_index(&self) -> usize {
        self.index
    }

    pub fn pass_name(&self) -> &str {
        self.name
    }

    /// Resolved color targets, in declaration order.
    pub fn color_targets(&self) -> &[TextureHandle] {
        self.color
    }

    /// Resolved depth target.
    pub fn depth_target(&self) -> Option<TextureHandle> {
        self.depth
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RhiError> {
        self.renderer.cmd_set_pipeline(self.cmd, pipeline)
    }

    pub fn set_bind_group(&mut self, index: u32, group: BindGroupHandle) -> Result<(), RhiError> {
        self.renderer.cmd_set_bind_group(self.cmd, index, group)
    }

    pub fn set_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) -> Result<(), RhiError> {
        self.renderer.cmd_set_vertex_buffer(self.cmd, buffer, offset)
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) -> Result<(), RhiError> {
        self.renderer
            .cmd_set_index_buffer(self.cmd, buffer, offset, format)
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> Result<(), RhiError> {
        self.renderer
            .cmd_draw(self.cmd, vertex_count, instance_count, 0, 0)
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        base_vertex: i32,
    ) -> Result<(), RhiError> {
        self.renderer
            .cmd_draw_indexed(self.cmd, index_count, instance_count, 0, base_vertex, 0)
    }

    /// Stage new buffer contents into the frame's command list.
    pub fn update_buffer(
        &mut self,
        buffer: BufferHandle,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<(), RhiError> {
        self.renderer.update_buffer(buffer, dst_offset, data)
    }
}

impl std::fmt::Debug for PassContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassContext")
            .field("cmd", &self.cmd)
            .field("index", &self.index)
            .field("name", &self.name)
            .field("color", &self.color)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClearColor, Handle};

    #[test]
    fn test_pass_builder() {
        let target = TextureHandle::from_raw(2);
        let pass = RenderPass::new("forward")
            .with_color(ColorTarget::texture(target, ClearColor::BLACK))
            .with_depth(DepthTarget::texture(TextureHandle::from_raw(3)))
            .with_record(|_ctx| Ok(()));

        assert_eq!(pass.name(), "forward");
        assert_eq!(pass.color_targets().len(), 1);
        assert!(pass.depth_target().is_some());
        assert!(pass.has_recorder());
        assert!(format!("{pass:?}").contains("forward"));
    }
}
