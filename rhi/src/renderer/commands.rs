//! Command recording.

use crate::commands::{
    ActiveRendering, Command, DescriptorTables, ResolvedColorAttachment, ResolvedDepthAttachment,
    RenderingInfo,
};
use crate::descriptors::Descriptor;
use crate::error::RhiError;
use crate::frame::FrameState;
use crate::resources::{ResourceState, TextureOwner};
use crate::types::{
    BindGroupHandle, BufferHandle, BufferUsage, CommandListHandle, Extent2d, Handle, IndexFormat,
    PipelineHandle, ScissorRect, TextureUsage, Viewport,
};

use super::Renderer;

impl Renderer {
    /// Open command recording for the current frame, opening the frame
    /// first if needed.
    ///
    /// Each frame has exactly one command list; calling this again while it
    /// is still open returns the same handle.
    pub fn begin_commands(&mut self) -> Result<CommandListHandle, RhiError> {
        if !self.frame_open {
            self.begin_frame()?;
        }
        if !self.frames[self.current_frame].commands.is_open() {
            return Err(RhiError::InvalidOperation(
                "the frame's command list was already closed".to_string(),
            ));
        }
        Ok(self.current_list)
    }

    fn check_list(&self, cmd: CommandListHandle) -> Result<usize, RhiError> {
        if cmd.is_null() || cmd.raw() > self.current_list.raw() {
            return Err(RhiError::InvalidHandle {
                kind: CommandListHandle::KIND,
                handle: cmd.raw(),
            });
        }
        if cmd != self.current_list {
            return Err(RhiError::StaleHandle {
                kind: CommandListHandle::KIND,
                handle: cmd.raw(),
            });
        }
        Ok(self.current_frame)
    }

    /// Resolve a handle to the slot of an open, recording command list.
    fn recording_slot(&self, cmd: CommandListHandle) -> Result<usize, RhiError> {
        let slot = self.check_list(cmd)?;
        if !self.frame_open || !self.frames[slot].commands.is_open() {
            return Err(RhiError::InvalidOperation(format!(
                "{cmd} is not recording"
            )));
        }
        Ok(slot)
    }

    fn rendering_slot(&self, cmd: CommandListHandle) -> Result<usize, RhiError> {
        let slot = self.recording_slot(cmd)?;
        if !self.frames[slot].commands.is_rendering() {
            return Err(RhiError::InvalidOperation(
                "draw recorded outside of cmd_begin_rendering".to_string(),
            ));
        }
        if self.frames[slot].commands.recording.pipeline.is_none() {
            return Err(RhiError::InvalidOperation(
                "draw recorded without a pipeline".to_string(),
            ));
        }
        Ok(slot)
    }

    /// Start rendering into the given attachments.
    ///
    /// Color targets transition to `RenderTarget` and the depth target to
    /// `DepthWrite`. Viewport and scissor are set to cover the targets.
    pub fn cmd_begin_rendering(
        &mut self,
        cmd: CommandListHandle,
        info: &RenderingInfo,
    ) -> Result<(), RhiError> {
        let slot = self.recording_slot(cmd)?;
        if self.frames[slot].commands.is_rendering() {
            return Err(RhiError::InvalidOperation(
                "cmd_begin_rendering called inside a rendering pass".to_string(),
            ));
        }
        if info.color.is_empty() && info.depth.is_none() {
            return Err(RhiError::InvalidArgument(
                "rendering needs at least one attachment".to_string(),
            ));
        }

        let mut extent: Option<Extent2d> = None;
        let mut check_extent = |size: Extent2d| match extent {
            Some(e) if e != size => Err(RhiError::InvalidArgument(format!(
                "attachment sizes differ: {}x{} vs {}x{}",
                e.width, e.height, size.width, size.height
            ))),
            _ => {
                extent = Some(size);
                Ok(())
            }
        };

        // Validate and resolve before recording anything.
        let mut color = Vec::with_capacity(info.color.len());
        for (i, attachment) in info.color.iter().enumerate() {
            if info.color[..i].iter().any(|a| a.texture == attachment.texture) {
                return Err(RhiError::InvalidArgument(format!(
                    "{} is bound as more than one color attachment",
                    attachment.texture
                )));
            }
            let record = self.textures.get(attachment.texture)?;
            if record.descriptor.format.is_depth_stencil()
                || !record.descriptor.usage.contains(TextureUsage::RENDER_ATTACHMENT)
            {
                return Err(RhiError::InvalidArgument(format!(
                    "{} is not a color render target",
                    attachment.texture
                )));
            }
            check_extent(record.descriptor.size)?;
            let rtv = record.rtv.ok_or_else(|| {
                RhiError::InvalidArgument(format!("{} has no render target view", attachment.texture))
            })?;
            let view = match record.owner {
                TextureOwner::Swapchain => match self.single_swapchain() {
                    Some(swapchain) => swapchain.rtv_heap().get(rtv)?,
                    None => {
                        return Err(RhiError::InvalidOperation(
                            "back buffer without a swapchain".to_string(),
                        ));
                    }
                },
                _ => self.rtv_heap.get(rtv)?,
            };
            let Descriptor::RenderTarget(target) = view else {
                return Err(RhiError::InvalidArgument(format!(
                    "{} has an invalid render target view",
                    attachment.texture
                )));
            };
            color.push(ResolvedColorAttachment {
                target: target.clone(),
                load_op: attachment.load_op,
                clear: attachment.clear,
            });
        }

        let depth = match &info.depth {
            Some(attachment) => {
                let record = self.textures.get(attachment.texture)?;
                if !record.descriptor.format.is_depth_stencil() {
                    return Err(RhiError::InvalidArgument(format!(
                        "{} is not a depth texture",
                        attachment.texture
                    )));
                }
                check_extent(record.descriptor.size)?;
                let dsv = record.dsv.ok_or_else(|| {
                    RhiError::InvalidArgument(format!(
                        "{} has no depth stencil view",
                        attachment.texture
                    ))
                })?;
                let Descriptor::DepthStencil(target) = self.dsv_heap.get(dsv)? else {
                    return Err(RhiError::InvalidArgument(format!(
                        "{} has an invalid depth stencil view",
                        attachment.texture
                    )));
                };
                Some(ResolvedDepthAttachment {
                    target: target.clone(),
                    load_op: attachment.load_op,
                    clear_depth: attachment.clear_depth,
                })
            }
            None => None,
        };
        let extent = extent.unwrap_or_default();

        let list = &mut self.frames[slot].commands;
        for attachment in &info.color {
            self.textures
                .get_mut(attachment.texture)?
                .transition(list, ResourceState::RenderTarget);
        }
        if let Some(attachment) = &info.depth {
            self.textures
                .get_mut(attachment.texture)?
                .transition(list, ResourceState::DepthWrite);
        }
        list.push(Command::BeginRendering {
            color,
            depth,
            extent,
        });
        list.push(Command::SetViewport(Viewport::from_extent(extent)));
        list.push(Command::SetScissor(ScissorRect::from_extent(extent)));
        list.recording.rendering = Some(ActiveRendering {
            color: info.color.iter().map(|a| a.texture).collect(),
            depth: info.depth.as_ref().map(|a| a.texture),
        });
        Ok(())
    }

    /// Finish the rendering pass. Back buffers move to `Present`.
    pub fn cmd_end_rendering(&mut self, cmd: CommandListHandle) -> Result<(), RhiError> {
        let slot = self.recording_slot(cmd)?;
        let list = &mut self.frames[slot].commands;
        let Some(active) = list.recording.rendering.take() else {
            return Err(RhiError::InvalidOperation(
                "cmd_end_rendering without cmd_begin_rendering".to_string(),
            ));
        };
        list.push(Command::EndRendering);
        for texture in active.color {
            // A target destroyed mid-pass keeps its native object alive
            // through the recorded commands; there is nothing to transition.
            if let Ok(record) = self.textures.get_mut(texture)
                && record.owner == TextureOwner::Swapchain
            {
                record.transition(list, ResourceState::Present);
            }
        }
        Ok(())
    }

    /// Bind a pipeline.
    pub fn cmd_set_pipeline(
        &mut self,
        cmd: CommandListHandle,
        pipeline: PipelineHandle,
    ) -> Result<(), RhiError> {
        let slot = self.recording_slot(cmd)?;
        let native = self.pipelines.get(pipeline)?.native.clone();
        let list = &mut self.frames[slot].commands;
        list.push(Command::SetPipeline(native));
        list.recording.pipeline = Some(pipeline);
        Ok(())
    }

    /// Bind a group to set `index` (only set 0 exists).
    ///
    /// The group's CPU descriptors are copied into freshly allocated slots of
    /// the frame's shader-visible heaps. A group without a constant buffer
    /// binds the fallback buffer; one without a texture or sampler binds
    /// null descriptors.
    pub fn cmd_set_bind_group(
        &mut self,
        cmd: CommandListHandle,
        index: u32,
        group: BindGroupHandle,
    ) -> Result<(), RhiError> {
        let slot = self.recording_slot(cmd)?;
        if index != 0 {
            return Err(RhiError::InvalidArgument(format!(
                "bind group index {index} is out of range; only set 0 exists"
            )));
        }
        let record = self.bind_space.groups.get(group)?;
        let (buffer, cbv) = self.bind_space.constant_buffer(record);
        let (texture, srv) = (record.texture, record.srv);
        let (sampler, sampler_view) = (record.sampler_handle, record.sampler);

        // Resolve everything first so a stale resource records nothing.
        self.buffers.get(buffer)?;
        if let Some(texture) = texture {
            self.textures.get(texture)?;
        }
        if let Some(sampler) = sampler {
            self.samplers.get(sampler)?;
        }
        let cbv = self.view_heap.get(cbv)?.clone();
        let srv = match srv {
            Some(srv) => self.view_heap.get(srv)?.clone(),
            None => Descriptor::Null,
        };
        let sampler_view = match sampler_view {
            Some(view) => self.sampler_heap.get(view)?.clone(),
            None => Descriptor::Null,
        };

        let frame = &mut self.frames[slot];
        self.buffers
            .get_mut(buffer)?
            .transition(&mut frame.commands, ResourceState::VertexAndConstant);
        if let Some(texture) = texture {
            self.textures
                .get_mut(texture)?
                .transition(&mut frame.commands, ResourceState::ShaderRead);
        }

        let constant_buffer = frame.descriptors.alloc_view();
        frame.descriptors.copy_view(constant_buffer, &cbv)?;
        let shader_resource = frame.descriptors.alloc_view();
        frame.descriptors.copy_view(shader_resource, &srv)?;
        let sampler_slot = frame.descriptors.alloc_sampler();
        frame.descriptors.copy_sampler(sampler_slot, &sampler_view)?;

        let tables = DescriptorTables {
            views: frame.descriptors.view_heap().clone(),
            samplers: frame.descriptors.sampler_heap().clone(),
            constant_buffer: constant_buffer.0,
            shader_resource: shader_resource.0,
            sampler: sampler_slot.0,
        };
        frame.commands.push(Command::SetDescriptorTables(tables));
        Ok(())
    }

    /// Bind the vertex stream.
    pub fn cmd_set_vertex_buffer(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> Result<(), RhiError> {
        let slot = self.recording_slot(cmd)?;
        let record = self.buffers.get_mut(buffer)?;
        if !record.usage.contains(BufferUsage::VERTEX) {
            return Err(RhiError::InvalidArgument(format!(
                "{buffer} was not created with VERTEX usage"
            )));
        }
        if offset >= record.size {
            return Err(RhiError::InvalidArgument(format!(
                "vertex offset {offset} is past the end of {buffer} ({} bytes)",
                record.size
            )));
        }
        let list = &mut self.frames[slot].commands;
        record.transition(list, ResourceState::VertexAndConstant);
        list.push(Command::SetVertexBuffer {
            buffer: record.native.clone(),
            offset,
        });
        Ok(())
    }

    /// Bind the index stream.
    pub fn cmd_set_index_buffer(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) -> Result<(), RhiError> {
        let slot = self.recording_slot(cmd)?;
        let record = self.buffers.get_mut(buffer)?;
        if !record.usage.contains(BufferUsage::INDEX) {
            return Err(RhiError::InvalidArgument(format!(
                "{buffer} was not created with INDEX usage"
            )));
        }
        if offset >= record.size || offset % format.size() != 0 {
            return Err(RhiError::InvalidArgument(format!(
                "index offset {offset} is invalid for {buffer} ({} bytes, {format:?})",
                record.size
            )));
        }
        let list = &mut self.frames[slot].commands;
        record.transition(list, ResourceState::Index);
        list.push(Command::SetIndexBuffer {
            buffer: record.native.clone(),
            offset,
            format,
        });
        list.recording.index_buffer = true;
        Ok(())
    }

    /// Record a non-indexed draw.
    pub fn cmd_draw(
        &mut self,
        cmd: CommandListHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        let slot = self.rendering_slot(cmd)?;
        self.frames[slot].commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        self.stats.draws += 1;
        Ok(())
    }

    /// Record an indexed draw.
    pub fn cmd_draw_indexed(
        &mut self,
        cmd: CommandListHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        let slot = self.rendering_slot(cmd)?;
        let list = &mut self.frames[slot].commands;
        if !list.recording.index_buffer {
            return Err(RhiError::InvalidOperation(
                "indexed draw recorded without an index buffer".to_string(),
            ));
        }
        list.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
        self.stats.draws += 1;
        Ok(())
    }

    /// Close the command list.
    pub fn end_commands(&mut self, cmd: CommandListHandle) -> Result<(), RhiError> {
        let slot = self.recording_slot(cmd)?;
        if self.frames[slot].commands.is_rendering() {
            return Err(RhiError::InvalidOperation(
                "end_commands called inside a rendering pass".to_string(),
            ));
        }
        self.close_list(slot);
        Ok(())
    }

    /// Submit the closed list and stamp a new fence value on its frame.
    pub fn submit(&mut self, cmd: CommandListHandle) -> Result<u64, RhiError> {
        let slot = self.check_list(cmd)?;
        if !self.frame_open {
            return Err(RhiError::InvalidOperation(format!(
                "{cmd} belongs to a frame that was already closed"
            )));
        }
        let frame = &self.frames[slot];
        if frame.commands.is_open() {
            return Err(RhiError::InvalidOperation(format!(
                "{cmd} must be closed with end_commands before submission"
            )));
        }
        if frame.state() != FrameState::Recording {
            return Err(RhiError::InvalidOperation(format!("{cmd} was already submitted")));
        }
        let commands = frame.commands.len();
        let value = self.submit_slot(slot)?;
        log::debug!(
            "frame slot {slot} submitted {commands} commands, fence value {value}"
        );
        Ok(value)
    }
}
