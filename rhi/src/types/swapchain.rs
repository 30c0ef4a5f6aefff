//! Swapchain descriptors.

use super::{Extent2d, TextureFormat};

/// Presentation mode of a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// Wait for vertical blank, queue frames.
    #[default]
    Fifo,
    /// Replace the queued frame with the newest one.
    Mailbox,
    /// Present immediately, tearing allowed.
    Immediate,
}

/// Descriptor for creating a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainDescriptor {
    /// Back buffer size.
    pub size: Extent2d,
    /// Back buffer format.
    pub format: TextureFormat,
    /// Presentation mode.
    pub present_mode: PresentMode,
    /// Format of the swapchain-owned depth buffer. `None` disables it.
    pub depth_format: Option<TextureFormat>,
}

impl SwapchainDescriptor {
    /// Create a descriptor with a D32F depth buffer.
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            size: Extent2d::new(width, height),
            format,
            present_mode: PresentMode::Fifo,
            depth_format: Some(TextureFormat::Depth32Float),
        }
    }

    /// Set the presentation mode.
    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    /// Set or disable the depth buffer format.
    pub fn with_depth_format(mut self, depth_format: Option<TextureFormat>) -> Self {
        self.depth_format = depth_format;
        self
    }
}
