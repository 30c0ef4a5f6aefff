//! Render graph: an ordered pass list driving one frame.
//!
//! The graph is rebuilt every frame. Passes run in the order they were
//! added, all recorded into a single command list:
//!
//! ```text
//! begin_frame
//! pre_record hook
//! begin_commands
//! for each pass:
//!     cmd_begin_rendering (pass 0 clears, later passes load)
//!     record
//!     cmd_end_rendering
//! end_commands, submit, present
//! end_frame
//! ```
//!
//! There is no dependency analysis: state transitions between passes come
//! from the renderer's lazy per-resource tracking.
//!
//! # Example
//!
//! ```ignore
//! let mut graph = RenderGraph::new();
//! graph.add_pass(
//!     RenderPass::new("forward")
//!         .with_color(ColorTarget::backbuffer(swapchain, [0.07, 0.08, 0.12, 1.0]))
//!         .with_record(move |ctx| {
//!             ctx.set_pipeline(pipeline)?;
//!             ctx.draw(3, 1)
//!         }),
//! );
//! graph.execute(&mut renderer, swapchain)?;
//! ```

mod pass;
mod target;

pub use pass::{PassContext, RecordPass, RenderPass};
pub use target::{ColorSource, ColorTarget, DepthSource, DepthTarget, LoadOp, load_op_for};

use crate::api::{Capabilities, RendererApi};
use crate::commands::{ColorAttachment, DepthAttachment, RenderingInfo};
use crate::error::RhiError;
use crate::types::{SwapchainHandle, TextureHandle};

/// Handle to a pass in the render graph.
///
/// Only valid within the `RenderGraph` that created it, until the next
/// [`RenderGraph::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle(u32);

impl PassHandle {
    /// Position of the pass in execution order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphState {
    /// Passes are being added.
    #[default]
    Building,
    /// Validated and ready to execute.
    Compiled,
    /// Recording a frame.
    Executing,
}

/// Errors that can occur while compiling or executing a graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("pass '{pass}' has no color or depth target")]
    NoTargets { pass: String },

    #[error("pass '{pass}' binds {texture} twice")]
    DuplicateTarget { pass: String, texture: TextureHandle },

    #[error("pass '{pass}' failed: {source}")]
    Pass {
        pass: String,
        #[source]
        source: RhiError,
    },

    #[error(transparent)]
    Rhi(#[from] RhiError),
}

/// Per-execution knobs.
#[derive(Default)]
pub struct ExecuteOptions<'a> {
    /// Depth texture for passes that declare no depth target.
    pub default_depth: Option<TextureHandle>,
    /// Runs after `begin_frame`, before the command list opens. Typical use
    /// is staging per-frame constants.
    pub pre_record: Option<&'a mut dyn FnMut(&mut dyn RendererApi) -> Result<(), RhiError>>,
}

impl std::fmt::Debug for ExecuteOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("default_depth", &self.default_depth)
            .field("pre_record", &self.pre_record.is_some())
            .finish()
    }
}

/// An ordered list of passes executed against a [`RendererApi`].
#[derive(Debug, Default)]
pub struct RenderGraph {
    passes: Vec<RenderPass>,
    state: GraphState,
}

impl RenderGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pass. Passes execute in insertion order.
    pub fn add_pass(&mut self, pass: RenderPass) -> PassHandle {
        let handle = PassHandle(self.passes.len() as u32);
        self.passes.push(pass);
        self.state = GraphState::Building;
        handle
    }

    /// Remove every pass.
    pub fn reset(&mut self) {
        self.passes.clear();
        self.state = GraphState::Building;
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    pub fn pass(&self, handle: PassHandle) -> Option<&RenderPass> {
        self.passes.get(handle.index())
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Validate the pass list.
    ///
    /// Every pass needs at least one target, and no pass may name the same
    /// texture twice. Backbuffer and swapchain-depth targets are checked when
    /// the graph executes.
    pub fn compile(&mut self) -> Result<(), GraphError> {
        for pass in &self.passes {
            if pass.color_targets().is_empty() && pass.depth_target().is_none() {
                return Err(GraphError::NoTargets {
                    pass: pass.name().to_string(),
                });
            }
            let textures: Vec<TextureHandle> = pass
                .color_targets()
                .iter()
                .filter_map(|t| match t.source {
                    ColorSource::Texture(texture) => Some(texture),
                    ColorSource::Backbuffer(_) => None,
                })
                .collect();
            for (i, texture) in textures.iter().enumerate() {
                if textures[..i].contains(texture) {
                    return Err(GraphError::DuplicateTarget {
                        pass: pass.name().to_string(),
                        texture: *texture,
                    });
                }
            }
        }
        self.state = GraphState::Compiled;
        Ok(())
    }

    /// Execute with default options. Returns the fence value of the frame's
    /// submission.
    pub fn execute(
        &mut self,
        renderer: &mut dyn RendererApi,
        swapchain: SwapchainHandle,
    ) -> Result<u64, GraphError> {
        self.execute_with(renderer, swapchain, ExecuteOptions::default())
    }

    /// Record, submit and present one frame.
    ///
    /// Fails before touching the GPU if the backend lacks any capability the
    /// executor needs. A failure after the frame began aborts the frame:
    /// nothing recorded for it is submitted, and the renderer is ready for
    /// the next frame.
    pub fn execute_with(
        &mut self,
        renderer: &mut dyn RendererApi,
        swapchain: SwapchainHandle,
        mut options: ExecuteOptions<'_>,
    ) -> Result<u64, GraphError> {
        renderer.capabilities().require(Capabilities::GRAPH_EXECUTE)?;
        if renderer.is_frame_open() {
            return Err(RhiError::InvalidOperation(
                "the render graph opens its own frame".to_string(),
            )
            .into());
        }
        if self.state != GraphState::Compiled {
            self.compile()?;
        }

        self.state = GraphState::Executing;
        let result = self.run(renderer, swapchain, &mut options);
        self.state = GraphState::Compiled;
        if result.is_err()
            && renderer.is_frame_open()
            && let Err(e) = renderer.abort_frame()
        {
            log::warn!("failed to abort the frame after a graph error: {e}");
        }
        result
    }

    fn run(
        &mut self,
        renderer: &mut dyn RendererApi,
        swapchain: SwapchainHandle,
        options: &mut ExecuteOptions<'_>,
    ) -> Result<u64, GraphError> {
        self.check_resolved_targets(&*renderer)?;
        renderer.begin_frame()?;
        if let Some(pre_record) = options.pre_record.as_mut() {
            pre_record(renderer)?;
        }

        let cmd = renderer.begin_commands()?;
        for (index, pass) in self.passes.iter_mut().enumerate() {
            let info = Self::rendering_info(&*renderer, pass, index, options.default_depth)
                .map_err(|source| GraphError::Pass {
                    pass: pass.name().to_string(),
                    source,
                })?;
            let color: Vec<TextureHandle> = info.color.iter().map(|a| a.texture).collect();
            let depth = info.depth.map(|a| a.texture);

            renderer.cmd_begin_rendering(cmd, &info)?;
            let (name, recorder) = pass.name_and_recorder();
            let recorded = match recorder {
                Some(recorder) => {
                    let mut ctx = PassContext::new(renderer, cmd, index, name, &color, depth);
                    recorder.record(&mut ctx)
                }
                None => Ok(()),
            };
            if let Err(source) = recorded {
                return Err(GraphError::Pass {
                    pass: name.to_string(),
                    source,
                });
            }
            renderer.cmd_end_rendering(cmd)?;
        }

        renderer.end_commands(cmd)?;
        let fence = renderer.submit(cmd)?;
        renderer.present(swapchain)?;
        renderer.end_frame()?;
        log::trace!("graph executed {} passes (fence {fence})", self.passes.len());
        Ok(fence)
    }

    /// Reject passes whose color targets resolve to the same texture, which
    /// [`compile`](Self::compile) cannot see through back buffer targets.
    fn check_resolved_targets(&self, renderer: &dyn RendererApi) -> Result<(), GraphError> {
        for pass in &self.passes {
            let mut seen = Vec::with_capacity(pass.color_targets().len());
            for target in pass.color_targets() {
                let texture = target.resolve(renderer).map_err(|source| GraphError::Pass {
                    pass: pass.name().to_string(),
                    source,
                })?;
                if seen.contains(&texture) {
                    return Err(GraphError::DuplicateTarget {
                        pass: pass.name().to_string(),
                        texture,
                    });
                }
                seen.push(texture);
            }
        }
        Ok(())
    }

    fn rendering_info(
        renderer: &dyn RendererApi,
        pass: &RenderPass,
        index: usize,
        default_depth: Option<TextureHandle>,
    ) -> Result<RenderingInfo, RhiError> {
        let load = load_op_for(index);
        let mut info = RenderingInfo::new();
        for target in pass.color_targets() {
            let texture = target.resolve(renderer)?;
            info = info.with_color(ColorAttachment {
                texture,
                load_op: load,
                clear: target.clear,
            });
        }
        let depth = match pass.depth_target() {
            Some(target) => Some((target.resolve(renderer)?, target.clear_depth)),
            None => default_depth.map(|texture| (texture, 1.0)),
        };
        if let Some((texture, clear_depth)) = depth {
            info = info.with_depth(DepthAttachment {
                texture,
                load_op: load,
                clear_depth,
            });
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClearColor, Handle};

    fn texture(raw: u32) -> TextureHandle {
        TextureHandle::from_raw(raw)
    }

    #[test]
    fn test_add_pass_keeps_order() {
        let mut graph = RenderGraph::new();
        let clear = graph.add_pass(
            RenderPass::new("clear").with_color(ColorTarget::texture(texture(1), ClearColor::BLACK)),
        );
        let forward = graph.add_pass(
            RenderPass::new("forward").with_color(ColorTarget::texture(texture(1), ClearColor::BLACK)),
        );
        assert_eq!(clear.index(), 0);
        assert_eq!(forward.index(), 1);
        assert_eq!(graph.pass(forward).unwrap().name(), "forward");
        assert_eq!(graph.state(), GraphState::Building);
    }

    #[test]
    fn test_compile_and_reset() {
        let mut graph = RenderGraph::new();
        graph.add_pass(
            RenderPass::new("main").with_color(ColorTarget::texture(texture(1), ClearColor::BLACK)),
        );
        graph.compile().unwrap();
        assert_eq!(graph.state(), GraphState::Compiled);

        graph.reset();
        assert_eq!(graph.pass_count(), 0);
        assert_eq!(graph.state(), GraphState::Building);
    }

    #[test]
    fn test_compile_rejects_pass_without_targets() {
        let mut graph = RenderGraph::new();
        graph.add_pass(RenderPass::new("empty"));
        assert!(matches!(
            graph.compile(),
            Err(GraphError::NoTargets { pass }) if pass == "empty"
        ));
    }

    #[test]
    fn test_compile_rejects_duplicate_target() {
        let mut graph = RenderGraph::new();
        graph.add_pass(
            RenderPass::new("twice")
                .with_color(ColorTarget::texture(texture(4), ClearColor::BLACK))
                .with_color(ColorTarget::texture(texture(4), ClearColor::BLACK)),
        );
        assert!(matches!(
            graph.compile(),
            Err(GraphError::DuplicateTarget { texture: t, .. }) if t == texture(4)
        ));
    }

    #[test]
    fn test_depth_only_pass_compiles() {
        let mut graph = RenderGraph::new();
        graph.add_pass(RenderPass::new("shadow").with_depth(DepthTarget::texture(texture(2))));
        assert!(graph.compile().is_ok());
    }
}
