//! Buffers, textures and samplers.

use crate::api::Capabilities;
use crate::backend::{GpuBuffer, GpuTexture};
use crate::commands::{Barrier, BarrierResource, Command};
use crate::descriptors::Descriptor;
use crate::error::RhiError;
use crate::resources::{
    BufferRecord, ResourceState, SamplerRecord, TextureOwner, TextureRecord, align_up,
};
use crate::types::{
    BufferDescriptor, BufferHandle, BufferUsage, SamplerDescriptor, SamplerHandle,
    TextureDescriptor, TextureHandle, TextureUsage,
};

use super::Renderer;

/// Row pitch alignment of buffer-to-texture copies.
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u64 = 256;

/// Placement alignment of texture upload footprints.
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

/// Copies tightly packed rows into a buffer with `row_pitch` bytes per row.
fn pitch_rows(data: &[u8], row_bytes: usize, row_pitch: usize, rows: usize) -> Vec<u8> {
    let mut padded = vec![0u8; row_pitch * rows];
    for (src, dst) in data
        .chunks_exact(row_bytes)
        .zip(padded.chunks_exact_mut(row_pitch))
    {
        dst[..row_bytes].copy_from_slice(src);
    }
    padded
}

impl Renderer {
    // ------------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------------

    /// Create a buffer, optionally filled with `data`.
    ///
    /// Inside an open frame the initial data is copied by the frame's
    /// command list, staged through the upload ring or, when it does not
    /// fit, through a dedicated staging buffer. Outside a frame it is
    /// uploaded through a one-shot command list that is waited on before
    /// returning.
    pub fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> Result<BufferHandle, RhiError> {
        self.ensure_alive()?;
        if descriptor.size == 0 {
            return Err(RhiError::InvalidArgument(
                "buffer size cannot be zero".to_string(),
            ));
        }
        if let Some(data) = data
            && data.len() as u64 > descriptor.size
        {
            return Err(RhiError::InvalidArgument(format!(
                "{} bytes of initial data exceed the buffer size of {}",
                data.len(),
                descriptor.size
            )));
        }

        let native = self
            .device
            .backend()
            .create_buffer(descriptor, ResourceState::Common)?;
        let handle = self.buffers.insert(BufferRecord {
            native,
            size: descriptor.size,
            usage: descriptor.usage,
            label: descriptor.label.clone(),
            state: ResourceState::Common,
        })?;

        if let Some(data) = data.filter(|d| !d.is_empty()) {
            let uploaded = match self.update_buffer(handle, 0, data) {
                Err(e) if e.is_exhaustion() => self.update_buffer_immediate(handle, 0, data),
                other => other,
            };
            if let Err(e) = uploaded {
                self.buffers.remove(handle)?;
                return Err(e);
            }
        }
        log::trace!(
            "created {handle} ({} bytes, {:?})",
            descriptor.size,
            descriptor.label
        );
        Ok(handle)
    }

    /// Destroy a buffer. Its handle is never reused.
    ///
    /// Command lists already recorded keep the native buffer alive until
    /// they finished executing.
    pub fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), RhiError> {
        if buffer == self.bind_space.fallback_buffer() {
            return Err(RhiError::InvalidOperation(
                "the fallback constant buffer cannot be destroyed".to_string(),
            ));
        }
        self.buffers.remove(buffer)?;
        Ok(())
    }

    fn writable_buffer(
        &self,
        buffer: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<&BufferRecord, RhiError> {
        if buffer == self.bind_space.fallback_buffer() {
            return Err(RhiError::InvalidOperation(
                "the fallback constant buffer is read-only".to_string(),
            ));
        }
        let record = self.buffers.get(buffer)?;
        if size == 0 {
            return Err(RhiError::InvalidArgument("update of zero bytes".to_string()));
        }
        match dst_offset.checked_add(size) {
            Some(end) if end <= record.size => Ok(record),
            _ => Err(RhiError::InvalidArgument(format!(
                "update range {dst_offset}+{size} is outside {buffer} ({} bytes)",
                record.size
            ))),
        }
    }

    /// Write `data` into a buffer at `dst_offset`.
    ///
    /// Inside an open frame the bytes are staged in the frame's upload ring
    /// and a copy is recorded into the frame's command list: the buffer
    /// transitions to `CopyDest` and stays there until its next consumer
    /// transitions it. A payload larger than the ring fails with
    /// [`RhiError::UploadOverflow`] and records nothing; callers fall back to
    /// [`update_buffer_immediate`](Self::update_buffer_immediate).
    ///
    /// Outside a frame this is the same as `update_buffer_immediate`.
    pub fn update_buffer(
        &mut self,
        buffer: BufferHandle,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<(), RhiError> {
        self.writable_buffer(buffer, dst_offset, data.len() as u64)?;
        let slot = self.current_frame;
        if !self.frame_open || !self.frames[slot].commands.is_open() {
            return self.update_buffer_immediate(buffer, dst_offset, data);
        }

        let alignment = self.config.upload_alignment;
        let frame = &mut self.frames[slot];
        let staged = frame.upload.stage(data, alignment)?;
        let record = self.buffers.get_mut(buffer)?;
        record.transition(&mut frame.commands, ResourceState::CopyDest);
        frame.commands.push(Command::CopyBufferRegion {
            src: staged.buffer,
            src_offset: staged.offset,
            dst: record.native.clone(),
            dst_offset,
            size: staged.size,
        });
        self.stats.staged_uploads += 1;
        self.stats.staged_bytes += staged.size;
        Ok(())
    }

    /// Write `data` through a dedicated staging buffer, bypassing the
    /// upload ring.
    ///
    /// Inside an open frame the copy is recorded into the frame's command
    /// list, so it lands after every write recorded before it and before
    /// every command recorded after it. Outside a frame the copy goes
    /// through a one-shot command list that is waited on before returning.
    /// Buffers are always in `Common` when no list of theirs is executing,
    /// which is the state that copy starts from.
    pub fn update_buffer_immediate(
        &mut self,
        buffer: BufferHandle,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<(), RhiError> {
        let native = self
            .writable_buffer(buffer, dst_offset, data.len() as u64)?
            .native
            .clone();
        let staging = self.staging_buffer(data)?;
        let copy = Command::CopyBufferRegion {
            src: staging,
            src_offset: 0,
            dst: native.clone(),
            dst_offset,
            size: data.len() as u64,
        };

        let slot = self.current_frame;
        if self.frame_open && self.frames[slot].commands.is_open() {
            let frame = &mut self.frames[slot];
            self.buffers
                .get_mut(buffer)?
                .transition(&mut frame.commands, ResourceState::CopyDest);
            frame.commands.push(copy);
        } else {
            let commands = vec![
                Command::Barrier(Barrier {
                    resource: BarrierResource::Buffer(native),
                    before: ResourceState::Common,
                    after: ResourceState::CopyDest,
                }),
                copy,
            ];
            self.submit_and_wait(commands)?;
            self.buffers.get_mut(buffer)?.state = ResourceState::Common;
        }
        self.stats.immediate_uploads += 1;
        Ok(())
    }

    fn staging_buffer(&self, data: &[u8]) -> Result<GpuBuffer, RhiError> {
        let backend = self.device.backend();
        let descriptor = BufferDescriptor::new(
            data.len() as u64,
            BufferUsage::HOST_VISIBLE | BufferUsage::COPY_SRC,
        )
        .with_label("immediate upload");
        let staging = backend.create_buffer(&descriptor, ResourceState::GenericRead)?;
        backend.map_buffer(&staging)?.write(0, data)?;
        Ok(staging)
    }

    fn submit_and_wait(&self, commands: Vec<Command>) -> Result<(), RhiError> {
        let value = self.device.submit(commands)?;
        self.device.wait(value)
    }

    /// Cached access state of a buffer.
    pub fn buffer_state(&self, buffer: BufferHandle) -> Result<ResourceState, RhiError> {
        Ok(self.buffers.get(buffer)?.state)
    }

    /// Size of a buffer in bytes.
    pub fn buffer_size(&self, buffer: BufferHandle) -> Result<u64, RhiError> {
        Ok(self.buffers.get(buffer)?.size)
    }

    /// Wait for the GPU and read back a buffer range.
    pub fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, RhiError> {
        self.capabilities.require(Capabilities::READBACK)?;
        let native = &self.buffers.get(buffer)?.native;
        self.device.wait_idle()?;
        self.device.backend().read_buffer(native, offset, size)
    }

    // ------------------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------------------

    /// Create a 2D texture, optionally filled with tightly packed mip 0
    /// texels.
    ///
    /// The texture starts in `CopyDest` when data follows, `DepthWrite` for
    /// depth formats and `Common` otherwise. After the upload it is left in
    /// `ShaderRead` if it can be sampled. Sampled textures get a permanent
    /// shader-resource view, color attachments a render-target view and
    /// depth textures a depth-stencil view.
    pub fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> Result<TextureHandle, RhiError> {
        self.ensure_alive()?;
        let format = descriptor.format;
        if descriptor.size.is_empty() {
            return Err(RhiError::InvalidArgument(format!(
                "texture size {}x{} is empty",
                descriptor.size.width, descriptor.size.height
            )));
        }
        if descriptor.mip_level_count == 0 {
            return Err(RhiError::InvalidArgument(
                "texture needs at least one mip level".to_string(),
            ));
        }
        if let Some(data) = data {
            if format.is_depth_stencil() {
                return Err(RhiError::InvalidArgument(
                    "depth textures cannot be created with initial data".to_string(),
                ));
            }
            if data.len() as u64 != descriptor.level0_size() {
                return Err(RhiError::InvalidArgument(format!(
                    "initial data is {} bytes, mip 0 of a {}x{} {format:?} texture is {}",
                    data.len(),
                    descriptor.size.width,
                    descriptor.size.height,
                    descriptor.level0_size()
                )));
            }
        }

        let initial_state = if data.is_some() {
            ResourceState::CopyDest
        } else if format.is_depth_stencil() {
            ResourceState::DepthWrite
        } else {
            ResourceState::Common
        };
        let native = self
            .device
            .backend()
            .create_texture(descriptor, initial_state)?;

        let srv = if descriptor.usage.contains(TextureUsage::TEXTURE_BINDING) {
            Some(self.view_heap.allocate(Descriptor::ShaderResource(native.clone()))?)
        } else {
            None
        };
        let (rtv, dsv) = if format.is_depth_stencil() {
            let dsv = self.dsv_heap.allocate(Descriptor::DepthStencil(native.clone()))?;
            (None, Some(dsv))
        } else if descriptor.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            let rtv = self.rtv_heap.allocate(Descriptor::RenderTarget(native.clone()))?;
            (Some(rtv), None)
        } else {
            (None, None)
        };

        let handle = self.textures.insert(TextureRecord {
            native,
            descriptor: descriptor.clone(),
            state: initial_state,
            owner: TextureOwner::User,
            srv,
            rtv,
            dsv,
        })?;

        if let Some(data) = data
            && let Err(e) = self.upload_texture(handle, data)
        {
            self.destroy_texture(handle)?;
            return Err(e);
        }
        log::trace!(
            "created {handle} ({}x{} {format:?}, {:?})",
            descriptor.size.width,
            descriptor.size.height,
            descriptor.label
        );
        Ok(handle)
    }

    fn upload_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), RhiError> {
        let record = self.textures.get(texture)?;
        let extent = record.descriptor.size;
        let row_bytes = extent.width as u64 * record.descriptor.format.block_size() as u64;
        let row_pitch = align_up(row_bytes, TEXTURE_ROW_PITCH_ALIGNMENT);
        let footprint = pitch_rows(
            data,
            row_bytes as usize,
            row_pitch as usize,
            extent.height as usize,
        );
        let after = if record.descriptor.usage.contains(TextureUsage::TEXTURE_BINDING) {
            ResourceState::ShaderRead
        } else {
            ResourceState::Common
        };
        let native = record.native.clone();

        let slot = self.current_frame;
        let in_frame = self.frame_open && self.frames[slot].commands.is_open();
        if in_frame && footprint.len() as u64 <= self.frames[slot].upload.capacity() {
            let frame = &mut self.frames[slot];
            let staged = frame
                .upload
                .stage(&footprint, TEXTURE_PLACEMENT_ALIGNMENT)?;
            frame.commands.push(Command::CopyBufferToTexture {
                src: staged.buffer,
                src_offset: staged.offset,
                row_pitch: row_pitch as u32,
                dst: native,
                extent,
            });
            self.textures
                .get_mut(texture)?
                .transition(&mut frame.commands, after);
            self.stats.staged_uploads += 1;
            self.stats.staged_bytes += staged.size;
            return Ok(());
        }

        let staging = self.staging_buffer(&footprint)?;
        let mut commands = vec![Command::CopyBufferToTexture {
            src: staging,
            src_offset: 0,
            row_pitch: row_pitch as u32,
            dst: native.clone(),
            extent,
        }];
        if after != ResourceState::CopyDest {
            commands.push(Command::Barrier(Barrier {
                resource: BarrierResource::Texture(native),
                before: ResourceState::CopyDest,
                after,
            }));
        }
        self.submit_and_wait(commands)?;
        self.textures.get_mut(texture)?.state = after;
        self.stats.immediate_uploads += 1;
        Ok(())
    }

    fn release_views(&mut self, record: &TextureRecord) -> Result<(), RhiError> {
        if let Some(srv) = record.srv {
            self.view_heap.write(srv, Descriptor::Null)?;
        }
        if let Some(dsv) = record.dsv {
            self.dsv_heap.write(dsv, Descriptor::Null)?;
        }
        if let (Some(rtv), TextureOwner::User) = (record.rtv, record.owner) {
            self.rtv_heap.write(rtv, Descriptor::Null)?;
        }
        Ok(())
    }

    /// Destroy a texture. Back buffers and the swapchain depth buffer are
    /// owned by the swapchain and cannot be destroyed directly.
    pub fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), RhiError> {
        let record = self.textures.get(texture)?;
        if record.owner != TextureOwner::User {
            return Err(RhiError::InvalidOperation(format!(
                "{texture} is owned by the swapchain"
            )));
        }
        let record = self.textures.remove(texture)?;
        self.release_views(&record)
    }

    /// Remove a texture regardless of its owner.
    pub(super) fn remove_texture(&mut self, texture: TextureHandle) -> Result<GpuTexture, RhiError> {
        let record = self.textures.remove(texture)?;
        self.release_views(&record)?;
        Ok(record.native)
    }

    /// Cached access state of a texture.
    pub fn texture_state(&self, texture: TextureHandle) -> Result<ResourceState, RhiError> {
        Ok(self.textures.get(texture)?.state)
    }

    /// Creation parameters of a texture.
    pub fn texture_descriptor(&self, texture: TextureHandle) -> Result<&TextureDescriptor, RhiError> {
        Ok(&self.textures.get(texture)?.descriptor)
    }

    /// Wait for the GPU and read back mip 0 of a texture, rows tightly
    /// packed. Depth textures read back as `f32` per texel.
    pub fn read_texture(&self, texture: TextureHandle) -> Result<Vec<u8>, RhiError> {
        self.capabilities.require(Capabilities::READBACK)?;
        let native = &self.textures.get(texture)?.native;
        self.device.wait_idle()?;
        self.device.backend().read_texture(native)
    }

    // ------------------------------------------------------------------------
    // Samplers
    // ------------------------------------------------------------------------

    /// Create a sampler with a permanent descriptor.
    pub fn create_sampler(&mut self, descriptor: &SamplerDescriptor) -> Result<SamplerHandle, RhiError> {
        self.ensure_alive()?;
        if descriptor.lod_min_clamp > descriptor.lod_max_clamp || descriptor.lod_min_clamp < 0.0 {
            return Err(RhiError::InvalidArgument(format!(
                "invalid LOD clamp range {}..{}",
                descriptor.lod_min_clamp, descriptor.lod_max_clamp
            )));
        }
        let native = self.device.backend().create_sampler(descriptor)?;
        let view = self.sampler_heap.allocate(Descriptor::Sampler(native.clone()))?;
        self.samplers.insert(SamplerRecord {
            native,
            descriptor: descriptor.clone(),
            view,
        })
    }

    /// Destroy a sampler.
    pub fn destroy_sampler(&mut self, sampler: SamplerHandle) -> Result<(), RhiError> {
        let record = self.samplers.remove(sampler)?;
        self.sampler_heap.write(record.view, Descriptor::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_rows_pads_each_row() {
        let data: Vec<u8> = (0..12).collect();
        let padded = pitch_rows(&data, 4, 8, 3);
        assert_eq!(padded.len(), 24);
        assert_eq!(&padded[0..4], &[0, 1, 2, 3]);
        assert_eq!(&padded[4..8], &[0, 0, 0, 0]);
        assert_eq!(&padded[8..12], &[4, 5, 6, 7]);
        assert_eq!(&padded[16..20], &[8, 9, 10, 11]);
    }
}
