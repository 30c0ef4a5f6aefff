//! Swapchain bookkeeping.
//!
//! A [`Swapchain`] owns:
//!
//! - one back buffer per frame slot, registered in the texture table so
//!   passes can target them by handle;
//! - a render-target view heap holding one view per back buffer;
//! - the current image index and the last presented one;
//! - an optional [`DepthBuffer`] sized like the back buffers.
//!
//! The back buffer at `current_index` is the one the open frame renders to.
//! Presenting advances the index round-robin. Resizing replaces every back
//! buffer and the depth buffer after the device went idle, rewrites the
//! view slots in place and restarts at image 0.

use crate::descriptors::{CpuDescriptor, CpuDescriptorHeap, Descriptor, HeapKind};
use crate::error::RhiError;
use crate::types::{Extent2d, SwapchainDescriptor, TextureFormat, TextureHandle};

/// Depth buffer owned by a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthBuffer {
    pub texture: TextureHandle,
    pub dsv: CpuDescriptor,
    pub format: TextureFormat,
}

/// Presentable back buffers and their views.
#[derive(Debug)]
pub struct Swapchain {
    descriptor: SwapchainDescriptor,
    back_buffers: Vec<TextureHandle>,
    rtvs: CpuDescriptorHeap,
    rtv_slots: Vec<CpuDescriptor>,
    current: u32,
    last_presented: Option<u32>,
    depth: Option<DepthBuffer>,
}

impl Swapchain {
    /// Create an empty swapchain with room for `image_count` back buffers.
    pub fn new(descriptor: SwapchainDescriptor, image_count: u32) -> Self {
        Self {
            descriptor,
            back_buffers: Vec::with_capacity(image_count as usize),
            rtvs: CpuDescriptorHeap::new(HeapKind::RenderTarget, image_count),
            rtv_slots: Vec::with_capacity(image_count as usize),
            current: 0,
            last_presented: None,
            depth: None,
        }
    }

    pub fn descriptor(&self) -> &SwapchainDescriptor {
        &self.descriptor
    }

    /// Back buffer size.
    pub fn extent(&self) -> Extent2d {
        self.descriptor.size
    }

    /// Back buffer format.
    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    /// Number of back buffers.
    pub fn image_count(&self) -> u32 {
        self.back_buffers.len() as u32
    }

    /// Index of the back buffer the current frame renders to.
    pub fn current_index(&self) -> u32 {
        self.current
    }

    /// Index of the most recently presented back buffer.
    pub fn last_presented(&self) -> Option<u32> {
        self.last_presented
    }

    /// Handle of the current back buffer.
    pub fn current_backbuffer(&self) -> Result<TextureHandle, RhiError> {
        self.back_buffers
            .get(self.current as usize)
            .copied()
            .ok_or_else(|| RhiError::InvalidOperation("swapchain has no back buffers".to_string()))
    }

    /// All back buffer handles in image order.
    pub fn back_buffers(&self) -> &[TextureHandle] {
        &self.back_buffers
    }

    /// Image index of a back buffer handle.
    pub fn image_index_of(&self, texture: TextureHandle) -> Option<u32> {
        self.back_buffers
            .iter()
            .position(|&t| t == texture)
            .map(|i| i as u32)
    }

    /// Render-target view heap of the back buffers.
    pub fn rtv_heap(&self) -> &CpuDescriptorHeap {
        &self.rtvs
    }

    /// Depth buffer, if the swapchain has one.
    pub fn depth(&self) -> Option<&DepthBuffer> {
        self.depth.as_ref()
    }

    /// Register a new set of back buffers, reusing existing view slots.
    ///
    /// `images` pairs each handle with its render-target view descriptor.
    /// Returns the view slot of each image.
    pub fn set_back_buffers(
        &mut self,
        images: Vec<(TextureHandle, Descriptor)>,
    ) -> Result<Vec<CpuDescriptor>, RhiError> {
        if images.len() as u32 > self.rtvs.capacity() {
            return Err(RhiError::InvalidArgument(format!(
                "{} back buffers exceed the swapchain view heap of {}",
                images.len(),
                self.rtvs.capacity()
            )));
        }
        let mut handles = Vec::with_capacity(images.len());
        for (i, (texture, view)) in images.into_iter().enumerate() {
            match self.rtv_slots.get(i) {
                Some(&slot) => self.rtvs.write(slot, view)?,
                None => {
                    let slot = self.rtvs.allocate(view)?;
                    self.rtv_slots.push(slot);
                }
            }
            handles.push(texture);
        }
        self.back_buffers = handles;
        self.current = 0;
        self.last_presented = None;
        Ok(self.rtv_slots[..self.back_buffers.len()].to_vec())
    }

    /// Replace the depth buffer record.
    pub fn set_depth(&mut self, depth: Option<DepthBuffer>) -> Option<DepthBuffer> {
        std::mem::replace(&mut self.depth, depth)
    }

    /// Record a new back buffer size.
    pub fn set_extent(&mut self, size: Extent2d) {
        self.descriptor.size = size;
    }

    /// Mark the current image presented and move to the next one.
    pub fn advance(&mut self) -> u32 {
        let presented = self.current;
        self.last_presented = Some(presented);
        self.current = (self.current + 1) % self.image_count().max(1);
        presented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::test_texture;
    use crate::types::Handle;

    fn swapchain(images: u32) -> Swapchain {
        let mut swapchain =
            Swapchain::new(SwapchainDescriptor::new(64, 32, TextureFormat::Bgra8Unorm), images);
        let images = (0..images)
            .map(|i| {
                (
                    TextureHandle::from_raw(i + 10),
                    Descriptor::RenderTarget(test_texture(64, 32)),
                )
            })
            .collect();
        swapchain.set_back_buffers(images).unwrap();
        swapchain
    }

    #[test]
    fn test_advance_round_robin() {
        let mut swapchain = swapchain(3);
        assert_eq!(swapchain.current_index(), 0);
        assert_eq!(swapchain.last_presented(), None);

        assert_eq!(swapchain.advance(), 0);
        assert_eq!(swapchain.advance(), 1);
        assert_eq!(swapchain.advance(), 2);
        assert_eq!(swapchain.current_index(), 0);
        assert_eq!(swapchain.last_presented(), Some(2));
        assert_eq!(
            swapchain.current_backbuffer().unwrap(),
            TextureHandle::from_raw(10)
        );
    }

    #[test]
    fn test_rebuild_reuses_view_slots() {
        let mut swapchain = swapchain(2);
        swapchain.advance();
        let before: Vec<_> = (0..2).map(|i| swapchain.rtv_slots[i]).collect();

        let images = vec![
            (TextureHandle::from_raw(20), Descriptor::RenderTarget(test_texture(8, 8))),
            (TextureHandle::from_raw(21), Descriptor::RenderTarget(test_texture(8, 8))),
        ];
        let slots = swapchain.set_back_buffers(images).unwrap();
        assert_eq!(slots, before);
        assert_eq!(swapchain.rtv_heap().len(), 2);
        assert_eq!(swapchain.current_index(), 0);
        assert_eq!(swapchain.image_index_of(TextureHandle::from_raw(21)), Some(1));
        assert_eq!(swapchain.image_index_of(TextureHandle::from_raw(10)), None);
    }

    #[test]
    fn test_empty_swapchain_has_no_backbuffer() {
        let swapchain = Swapchain::new(SwapchainDescriptor::new(4, 4, TextureFormat::Rgba8Unorm), 2);
        assert!(swapchain.current_backbuffer().is_err());
    }
}
