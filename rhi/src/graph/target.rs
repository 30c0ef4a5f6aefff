//! Color and depth targets of graph passes.

use crate::api::RendererApi;
use crate::error::RhiError;
use crate::types::{ClearColor, SwapchainHandle, TextureHandle};

pub use crate::commands::LoadOp;

/// Texture a color target writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSource {
    /// A texture created by the caller.
    Texture(TextureHandle),
    /// The swapchain's current back buffer, looked up when the graph runs.
    Backbuffer(SwapchainHandle),
}

/// A color render target with its clear value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTarget {
    pub source: ColorSource,
    pub clear: ClearColor,
}

impl ColorTarget {
    /// Target a texture.
    pub fn texture(texture: TextureHandle, clear: impl Into<ClearColor>) -> Self {
        Self {
            source: ColorSource::Texture(texture),
            clear: clear.into(),
        }
    }

    /// Target the current back buffer of `swapchain`.
    pub fn backbuffer(swapchain: SwapchainHandle, clear: impl Into<ClearColor>) -> Self {
        Self {
            source: ColorSource::Backbuffer(swapchain),
            clear: clear.into(),
        }
    }

    /// Resolve the texture this target writes this frame.
    pub fn resolve(&self, renderer: &dyn RendererApi) -> Result<TextureHandle, RhiError> {
        match self.source {
            ColorSource::Texture(texture) => Ok(texture),
            ColorSource::Backbuffer(swapchain) => renderer.current_backbuffer(swapchain),
        }
    }
}

/// Texture a depth target writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthSource {
    Texture(TextureHandle),
    /// The depth buffer owned by a swapchain.
    Swapchain(SwapchainHandle),
}

/// A depth target with its clear value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthTarget {
    pub source: DepthSource,
    pub clear_depth: f32,
}

impl DepthTarget {
    /// Target a depth texture, clearing to 1.0.
    pub fn texture(texture: TextureHandle) -> Self {
        Self {
            source: DepthSource::Texture(texture),
            clear_depth: 1.0,
        }
    }

    /// Target the depth buffer of `swapchain`, clearing to 1.0.
    pub fn swapchain(swapchain: SwapchainHandle) -> Self {
        Self {
            source: DepthSource::Swapchain(swapchain),
            clear_depth: 1.0,
        }
    }

    /// Set the clear depth.
    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear_depth = depth;
        self
    }

    /// Resolve the texture this target writes this frame.
    pub fn resolve(&self, renderer: &dyn RendererApi) -> Result<TextureHandle, RhiError> {
        match self.source {
            DepthSource::Texture(texture) => Ok(texture),
            DepthSource::Swapchain(swapchain) => {
                renderer.depth_buffer(swapchain)?.ok_or_else(|| {
                    RhiError::InvalidArgument(format!("{swapchain} has no depth buffer"))
                })
            }
        }
    }
}

/// Load operation of the pass at `index`: the first pass clears, every
/// later pass keeps what earlier passes wrote.
pub fn load_op_for(index: usize) -> LoadOp {
    if index == 0 { LoadOp::Clear } else { LoadOp::Load }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Handle;

    #[test]
    fn test_first_pass_clears() {
        assert_eq!(load_op_for(0), LoadOp::Clear);
        assert_eq!(load_op_for(1), LoadOp::Load);
        assert_eq!(load_op_for(7), LoadOp::Load);
    }

    #[test]
    fn test_target_builders() {
        let color = ColorTarget::texture(TextureHandle::from_raw(3), [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(color.source, ColorSource::Texture(TextureHandle::from_raw(3)));
        assert_eq!(color.clear, ClearColor::new(0.1, 0.2, 0.3, 1.0));

        let depth = DepthTarget::swapchain(SwapchainHandle::from_raw(1)).with_clear_depth(0.5);
        assert_eq!(depth.clear_depth, 0.5);
    }
}
