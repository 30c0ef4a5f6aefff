//! Swapchain creation, resizing and presentation.

use std::sync::Arc;

use crate::api::Capabilities;
use crate::descriptors::{CpuDescriptor, Descriptor};
use crate::error::RhiError;
use crate::frame::FrameState;
use crate::resources::{HandleTable, ResourceState, TextureOwner, TextureRecord};
use crate::swapchain::{DepthBuffer, Swapchain};
use crate::types::{
    Extent2d, SwapchainDescriptor, SwapchainHandle, TextureDescriptor, TextureHandle,
    TextureUsage,
};

use super::Renderer;

/// Register new back buffers with a swapchain and record their view slots on
/// the texture records.
fn install_back_buffers(
    textures: &mut HandleTable<TextureHandle, TextureRecord>,
    swapchain: &mut Swapchain,
    images: Vec<(TextureHandle, Descriptor)>,
) -> Result<(), RhiError> {
    let handles: Vec<TextureHandle> = images.iter().map(|(handle, _)| *handle).collect();
    let slots = swapchain.set_back_buffers(images)?;
    for (texture, slot) in handles.into_iter().zip(slots) {
        textures.get_mut(texture)?.rtv = Some(slot);
    }
    Ok(())
}

impl Renderer {
    fn validate_swapchain(descriptor: &SwapchainDescriptor) -> Result<(), RhiError> {
        if descriptor.size.is_empty() {
            return Err(RhiError::InvalidArgument(format!(
                "swapchain size {}x{} is empty",
                descriptor.size.width, descriptor.size.height
            )));
        }
        if descriptor.format.is_depth_stencil() {
            return Err(RhiError::InvalidArgument(format!(
                "swapchain format cannot be {:?}",
                descriptor.format
            )));
        }
        if let Some(depth) = descriptor.depth_format
            && !depth.is_depth_stencil()
        {
            return Err(RhiError::InvalidArgument(format!(
                "{depth:?} is not a depth format"
            )));
        }
        Ok(())
    }

    /// Create `count` back buffers in the `Present` state.
    fn create_back_buffers(
        &mut self,
        descriptor: &SwapchainDescriptor,
        count: u32,
    ) -> Result<Vec<(TextureHandle, Descriptor)>, RhiError> {
        let mut images = Vec::with_capacity(count as usize);
        for index in 0..count {
            let texture = TextureDescriptor::new_2d(
                descriptor.size.width,
                descriptor.size.height,
                descriptor.format,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
            )
            .with_label(format!("back buffer {index}"));
            let native = self
                .device
                .backend()
                .create_texture(&texture, ResourceState::Present)?;
            let handle = self.textures.insert(TextureRecord {
                native: native.clone(),
                descriptor: texture,
                state: ResourceState::Present,
                owner: TextureOwner::Swapchain,
                srv: None,
                rtv: None,
                dsv: None,
            })?;
            images.push((handle, Descriptor::RenderTarget(native)));
        }
        Ok(images)
    }

    /// Create the swapchain's depth buffer, rewriting `slot` in place when
    /// a view already exists.
    fn create_depth_buffer(
        &mut self,
        descriptor: &SwapchainDescriptor,
        slot: Option<CpuDescriptor>,
    ) -> Result<Option<DepthBuffer>, RhiError> {
        let Some(format) = descriptor.depth_format else {
            return Ok(None);
        };
        let texture = TextureDescriptor::new_2d(
            descriptor.size.width,
            descriptor.size.height,
            format,
            TextureUsage::RENDER_ATTACHMENT,
        )
        .with_label("swapchain depth");
        let native = self
            .device
            .backend()
            .create_texture(&texture, ResourceState::DepthWrite)?;
        let view = Descriptor::DepthStencil(native.clone());
        let dsv = match slot {
            Some(slot) => {
                self.dsv_heap.write(slot, view)?;
                slot
            }
            None => self.dsv_heap.allocate(view)?,
        };
        let handle = self.textures.insert(TextureRecord {
            native,
            descriptor: texture,
            state: ResourceState::DepthWrite,
            owner: TextureOwner::DepthBuffer,
            srv: None,
            rtv: None,
            dsv: Some(dsv),
        })?;
        Ok(Some(DepthBuffer {
            texture: handle,
            dsv,
            format,
        }))
    }

    /// Create the swapchain: one back buffer per frame in flight plus an
    /// optional depth buffer.
    ///
    /// Only one swapchain may exist at a time, and it cannot be created
    /// while a frame is open.
    pub fn create_swapchain(
        &mut self,
        descriptor: &SwapchainDescriptor,
    ) -> Result<SwapchainHandle, RhiError> {
        self.ensure_alive()?;
        if self.frame_open {
            return Err(RhiError::InvalidOperation(
                "cannot create a swapchain inside a frame".to_string(),
            ));
        }
        if !self.swapchains.is_empty() {
            return Err(RhiError::InvalidOperation(
                "a swapchain already exists".to_string(),
            ));
        }
        Self::validate_swapchain(descriptor)?;

        let count = self.frames.len() as u32;
        let mut swapchain = Swapchain::new(*descriptor, count);
        let images = self.create_back_buffers(descriptor, count)?;
        install_back_buffers(&mut self.textures, &mut swapchain, images)?;
        let depth = self.create_depth_buffer(descriptor, None)?;
        swapchain.set_depth(depth);

        let handle = self.swapchains.insert(swapchain)?;
        log::info!(
            "Swapchain created: {}x{} {:?}, {count} images, depth {:?}",
            descriptor.size.width,
            descriptor.size.height,
            descriptor.format,
            descriptor.depth_format
        );
        Ok(handle)
    }

    /// Resize the swapchain.
    ///
    /// Holds the queue lock for the whole operation. Pending frame work is
    /// submitted, the device drains, and every back buffer and the depth
    /// buffer are recreated at the new size with their views rewritten in
    /// place. Handles of the old images become invalid.
    ///
    /// Inside an open frame the frame is reopened on slot 0 with a new
    /// command list handle; the previous handle is stale afterwards.
    pub fn resize_swapchain(
        &mut self,
        swapchain: SwapchainHandle,
        width: u32,
        height: u32,
    ) -> Result<(), RhiError> {
        self.ensure_alive()?;
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "cannot resize the swapchain to {width}x{height}"
            )));
        }
        let (old_images, old_depth, mut descriptor) = {
            let current = self.swapchains.get(swapchain)?;
            (
                current.back_buffers().to_vec(),
                current.depth().copied(),
                *current.descriptor(),
            )
        };
        if self.frame_open && self.frames[self.current_frame].commands.is_rendering() {
            return Err(RhiError::InvalidOperation(
                "cannot resize the swapchain inside a rendering pass".to_string(),
            ));
        }

        let device = Arc::clone(&self.device);
        let _queue = device.lock();
        let reopen = self.frame_open;
        if reopen {
            self.flush_frame()?;
            self.frame_open = false;
        }
        device.wait_idle()?;

        for texture in old_images {
            self.textures.remove(texture)?;
        }
        if let Some(depth) = old_depth {
            self.textures.remove(depth.texture)?;
        }

        descriptor.size = Extent2d::new(width, height);
        let count = self.frames.len() as u32;
        let images = self.create_back_buffers(&descriptor, count)?;
        let depth = self.create_depth_buffer(&descriptor, old_depth.map(|d| d.dsv))?;

        let target = self.swapchains.get_mut(swapchain)?;
        install_back_buffers(&mut self.textures, target, images)?;
        target.set_depth(depth);
        target.set_extent(descriptor.size);

        if reopen {
            self.open_slot(0)?;
            self.stats.frames -= 1;
        }
        log::info!("Swapchain resized to {width}x{height}");
        Ok(())
    }

    /// Destroy the swapchain together with its back buffers and depth
    /// buffer.
    pub fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> Result<(), RhiError> {
        if self.frame_open {
            return Err(RhiError::InvalidOperation(
                "cannot destroy the swapchain inside a frame".to_string(),
            ));
        }
        let removed = self.swapchains.remove(swapchain)?;
        for &texture in removed.back_buffers() {
            self.remove_texture(texture)?;
        }
        if let Some(depth) = removed.depth() {
            self.remove_texture(depth.texture)?;
        }
        log::info!("Swapchain destroyed");
        Ok(())
    }

    /// Queue presentation of the current back buffer and advance to the
    /// next image.
    ///
    /// The back buffer must be in the `Present` state, which
    /// `cmd_end_rendering` restores, and the frame's work must already be
    /// submitted.
    pub fn present(&mut self, swapchain: SwapchainHandle) -> Result<(), RhiError> {
        self.ensure_alive()?;
        self.capabilities.require(Capabilities::PRESENT)?;
        let chain = self.swapchains.get(swapchain)?;
        let index = chain.current_index();
        let texture = chain.current_backbuffer()?;

        let frame = &self.frames[self.current_frame];
        if self.frame_open && frame.state() == FrameState::Recording && !frame.commands.is_empty()
        {
            return Err(RhiError::InvalidOperation(
                "submit the frame's commands before presenting".to_string(),
            ));
        }
        let record = self.textures.get(texture)?;
        if record.state != ResourceState::Present {
            return Err(RhiError::InvalidOperation(format!(
                "back buffer {texture} is in the {} state, expected present",
                record.state
            )));
        }

        self.device.present(&record.native, index)?;
        self.swapchains.get_mut(swapchain)?.advance();
        self.stats.presents += 1;
        log::trace!("presented image {index}");
        Ok(())
    }

    /// The swapchain record.
    pub fn swapchain(&self, swapchain: SwapchainHandle) -> Result<&Swapchain, RhiError> {
        self.swapchains.get(swapchain)
    }

    /// The back buffer the open frame renders to.
    pub fn current_backbuffer(
        &self,
        swapchain: SwapchainHandle,
    ) -> Result<TextureHandle, RhiError> {
        self.swapchains.get(swapchain)?.current_backbuffer()
    }

    /// The swapchain's depth buffer, if it has one.
    pub fn depth_buffer(
        &self,
        swapchain: SwapchainHandle,
    ) -> Result<Option<TextureHandle>, RhiError> {
        Ok(self.swapchains.get(swapchain)?.depth().map(|d| d.texture))
    }
}
