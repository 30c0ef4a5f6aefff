//! The renderer: resource tables, frame pipelining and command recording.
//!
//! [`Renderer`] is the single entry point of the RHI. It owns the device,
//! one [`FrameContext`] per frame in flight, every resource table and the
//! permanent descriptor heaps. Callers hold it directly (there is no global
//! instance) and pass it by `&mut` into the render graph.
//!
//! # Frame lifecycle
//!
//! ```text
//! begin_frame ─► begin_commands ─► cmd_* ... ─► end_commands ─► submit ─► end_frame ─► present
//!     │                                                            │
//!     └ waits for the slot's previous fence value                  └ stamps a new fence value
//! ```
//!
//! # State tracking
//!
//! Every buffer and texture carries the access state it will be in when the
//! next recorded command runs. Consumers transition lazily: each `cmd_*`
//! call records a barrier only when the cached state differs from what the
//! command needs. Closing a command list resets every cached buffer state to
//! `Common`, matching the implicit decay buffers undergo once a command list
//! finishes executing. Textures keep their state across lists.

mod commands;
mod pipelines;
mod present;
mod resources;

use std::sync::Arc;

use crate::api::{Capabilities, RendererApi};
use crate::backend::{GpuBackend, create_backend};
use crate::bind_group::{BindSpace, CONSTANT_BUFFER_ALIGNMENT};
use crate::commands::{BarrierResource, Command, RenderingInfo};
use crate::config::RendererConfig;
use crate::descriptors::{CpuDescriptorHeap, Descriptor, GpuDescriptorAllocator, HeapKind};
use crate::device::Device;
use crate::error::RhiError;
use crate::frame::{FrameContext, FrameState};
use crate::pipeline::{PipelineRecord, ShaderModuleRecord};
use crate::resources::{
    BufferRecord, HandleTable, ResourceState, SamplerRecord, TextureRecord, UploadRing,
};
use crate::swapchain::Swapchain;
use crate::types::{
    BindGroupHandle, BufferDescriptor, BufferHandle, BufferUsage, CommandListHandle, Handle,
    IndexFormat, PipelineHandle, SamplerHandle, ShaderModuleHandle, SwapchainHandle,
    TextureHandle,
};

/// Counters describing renderer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    /// Frames begun.
    pub frames: u64,
    /// Command lists handed to the queue.
    pub submissions: u64,
    /// Uploads staged through a frame's upload ring.
    pub staged_uploads: u64,
    /// Bytes staged through upload rings.
    pub staged_bytes: u64,
    /// Uploads that went through a one-shot synchronous command list.
    pub immediate_uploads: u64,
    /// Draw calls recorded.
    pub draws: u64,
    /// Frames presented.
    pub presents: u64,
    /// Upload ring wraps across all frames.
    pub upload_wraps: u64,
    /// Shader-visible descriptor heap wraps across all frames.
    pub descriptor_wraps: u64,
    pub live_buffers: usize,
    pub live_textures: usize,
    pub live_samplers: usize,
    pub live_pipelines: usize,
    pub live_bind_groups: usize,
}

/// Render hardware interface over one backend.
pub struct Renderer {
    config: RendererConfig,
    device: Arc<Device>,
    capabilities: Capabilities,

    frames: Vec<FrameContext>,
    current_frame: usize,
    frame_number: u64,
    frame_open: bool,
    current_list: CommandListHandle,

    buffers: HandleTable<BufferHandle, BufferRecord>,
    textures: HandleTable<TextureHandle, TextureRecord>,
    samplers: HandleTable<SamplerHandle, SamplerRecord>,
    shader_modules: HandleTable<ShaderModuleHandle, ShaderModuleRecord>,
    pipelines: HandleTable<PipelineHandle, PipelineRecord>,
    bind_space: BindSpace,
    swapchains: HandleTable<SwapchainHandle, Swapchain>,

    view_heap: CpuDescriptorHeap,
    sampler_heap: CpuDescriptorHeap,
    rtv_heap: CpuDescriptorHeap,
    dsv_heap: CpuDescriptorHeap,

    stats: RendererStats,
    shut_down: bool,
}

fn init_error(what: &str) -> impl FnOnce(RhiError) -> RhiError + '_ {
    move |e| match e {
        RhiError::InitializationFailed(_) | RhiError::Config(_) => e,
        other => RhiError::InitializationFailed(format!("{what}: {other}")),
    }
}

impl Renderer {
    /// Create the backend named in `config` and initialize on top of it.
    pub fn new(config: RendererConfig) -> Result<Self, RhiError> {
        config.validate()?;
        let backend = create_backend(config.backend, &config)?;
        Self::with_backend(backend, config)
    }

    /// Initialize on top of an existing backend.
    pub fn with_backend(
        backend: Arc<dyn GpuBackend>,
        config: RendererConfig,
    ) -> Result<Self, RhiError> {
        config.validate()?;
        let capabilities = backend.capabilities();
        let device = Arc::new(Device::new(Arc::clone(&backend), config.fence_timeout()));

        let mut frames = Vec::with_capacity(config.frame_count as usize);
        for index in 0..config.frame_count {
            let descriptor = BufferDescriptor::new(
                config.upload_ring_size,
                BufferUsage::HOST_VISIBLE | BufferUsage::COPY_SRC,
            )
            .with_label(format!("upload ring {index}"));
            let buffer = backend
                .create_buffer(&descriptor, ResourceState::GenericRead)
                .map_err(init_error("upload ring"))?;
            let mapping = backend
                .map_buffer(&buffer)
                .map_err(init_error("upload ring mapping"))?;
            let upload = UploadRing::new(buffer, mapping, config.upload_ring_size)
                .map_err(init_error("upload ring"))?;
            let descriptors = GpuDescriptorAllocator::new(
                config.gpu_view_descriptors_per_frame,
                config.gpu_sampler_descriptors_per_frame,
            );
            frames.push(FrameContext::new(index, descriptors, upload));
        }

        let mut view_heap = CpuDescriptorHeap::new(HeapKind::View, config.cpu_view_heap_capacity);
        let sampler_heap =
            CpuDescriptorHeap::new(HeapKind::Sampler, config.cpu_sampler_heap_capacity);
        let rtv_heap = CpuDescriptorHeap::new(HeapKind::RenderTarget, config.rtv_heap_capacity);
        let dsv_heap = CpuDescriptorHeap::new(HeapKind::DepthStencil, config.dsv_heap_capacity);

        // Reserved all-zero constant buffer for groups that bind none.
        let fallback = BufferDescriptor::new(
            CONSTANT_BUFFER_ALIGNMENT,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        )
        .with_label("fallback constants");
        let native = backend
            .create_buffer(&fallback, ResourceState::Common)
            .map_err(init_error("fallback constant buffer"))?;
        let fallback_cbv = view_heap
            .allocate(Descriptor::ConstantBuffer {
                buffer: native.clone(),
                offset: 0,
                size: CONSTANT_BUFFER_ALIGNMENT,
            })
            .map_err(init_error("fallback constant buffer view"))?;
        let mut buffers = HandleTable::new();
        let fallback_buffer = buffers.insert(BufferRecord {
            native,
            size: CONSTANT_BUFFER_ALIGNMENT,
            usage: fallback.usage,
            label: fallback.label,
            state: ResourceState::Common,
        })?;

        log::info!(
            "Renderer initialized: {} backend, {} frames in flight, {} byte upload rings",
            backend.name(),
            config.frame_count,
            config.upload_ring_size
        );

        Ok(Self {
            config,
            device,
            capabilities,
            frames,
            current_frame: 0,
            frame_number: 0,
            frame_open: false,
            current_list: CommandListHandle::NULL,
            buffers,
            textures: HandleTable::new(),
            samplers: HandleTable::new(),
            shader_modules: HandleTable::new(),
            pipelines: HandleTable::new(),
            bind_space: BindSpace::new(fallback_buffer, fallback_cbv),
            swapchains: HandleTable::new(),
            view_heap,
            sampler_heap,
            rtv_heap,
            dsv_heap,
            stats: RendererStats::default(),
            shut_down: false,
        })
    }

    /// Configuration the renderer was created with.
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The device wrapping the backend queue and fence.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.device.backend().name()
    }

    /// Capabilities of the active backend.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Number of frames in flight.
    pub fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    /// Frame context of slot `index`.
    pub fn frame(&self, index: u32) -> Option<&FrameContext> {
        self.frames.get(index as usize)
    }

    /// Slot of the open (or most recent) frame.
    pub fn frame_index(&self) -> u32 {
        self.current_frame as u32
    }

    /// Returns true between `begin_frame` and `end_frame`.
    pub fn is_frame_open(&self) -> bool {
        self.frame_open
    }

    /// The reserved all-zero constant buffer.
    pub fn fallback_constant_buffer(&self) -> BufferHandle {
        self.bind_space.fallback_buffer()
    }

    /// Activity counters.
    pub fn stats(&self) -> RendererStats {
        let mut stats = self.stats;
        stats.upload_wraps = self.frames.iter().map(|f| f.upload.wrap_count()).sum();
        stats.descriptor_wraps = self.frames.iter().map(|f| f.descriptors.wrap_count()).sum();
        stats.live_buffers = self.buffers.len();
        stats.live_textures = self.textures.len();
        stats.live_samplers = self.samplers.len();
        stats.live_pipelines = self.pipelines.len();
        stats.live_bind_groups = self.bind_space.groups.len();
        stats
    }

    fn ensure_alive(&self) -> Result<(), RhiError> {
        if self.shut_down {
            Err(RhiError::InvalidOperation(
                "the renderer was shut down".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn single_swapchain(&self) -> Option<&Swapchain> {
        self.swapchains.iter().next().map(|(_, s)| s)
    }

    // ------------------------------------------------------------------------
    // Frame lifecycle
    // ------------------------------------------------------------------------

    /// Open a frame.
    ///
    /// Picks the slot of the swapchain's current image (or the next slot
    /// round-robin without a swapchain), blocks until the GPU reached the
    /// fence value stamped on that slot's previous submission and resets
    /// the slot's recorder, descriptor cursors and upload ring.
    pub fn begin_frame(&mut self) -> Result<(), RhiError> {
        self.ensure_alive()?;
        if self.frame_open {
            return Err(RhiError::InvalidOperation(
                "begin_frame called while a frame is open".to_string(),
            ));
        }
        let count = self.frames.len();
        let slot = match self.single_swapchain() {
            Some(swapchain) => swapchain.current_index() as usize % count,
            None => (self.frame_number % count as u64) as usize,
        };
        self.open_slot(slot)?;
        log::trace!("frame {} begun on slot {slot}", self.frame_number);
        Ok(())
    }

    fn open_slot(&mut self, slot: usize) -> Result<(), RhiError> {
        self.frames[slot].begin(&self.device)?;
        let raw = (self.frame_number % u32::MAX as u64) as u32 + 1;
        self.current_list = CommandListHandle::from_raw(raw);
        self.current_frame = slot;
        self.frame_number += 1;
        self.frame_open = true;
        self.stats.frames += 1;
        Ok(())
    }

    /// Close the frame.
    ///
    /// Work recorded into the frame's list but never submitted is submitted
    /// here, because the cached resource states already assume it runs.
    pub fn end_frame(&mut self) -> Result<(), RhiError> {
        if !self.frame_open {
            return Err(RhiError::InvalidOperation(
                "end_frame called without an open frame".to_string(),
            ));
        }
        if let Some(value) = self.flush_frame()? {
            log::warn!(
                "end_frame submitted work left in frame slot {} (fence {value})",
                self.current_frame
            );
        }
        self.frame_open = false;
        Ok(())
    }

    /// Close the frame without submitting its pending work.
    ///
    /// Commands recorded since the last submission are dropped, staged
    /// uploads included, and every cached buffer and texture state rolls
    /// back to where it stood before the first dropped barrier.
    pub fn abort_frame(&mut self) -> Result<(), RhiError> {
        if !self.frame_open {
            return Err(RhiError::InvalidOperation(
                "abort_frame called without an open frame".to_string(),
            ));
        }
        let slot = self.current_frame;
        let dropped = self.frames[slot].commands.discard();
        self.restore_states(&dropped);
        self.frame_open = false;
        if !dropped.is_empty() {
            log::warn!(
                "frame slot {slot} aborted, dropped {} unsubmitted commands",
                dropped.len()
            );
        }
        Ok(())
    }

    fn restore_states(&mut self, dropped: &[Command]) {
        for command in dropped.iter().rev() {
            let Command::Barrier(barrier) = command else {
                continue;
            };
            match &barrier.resource {
                BarrierResource::Buffer(native) => {
                    if let Some((_, record)) = self
                        .buffers
                        .iter_mut()
                        .find(|(_, record)| record.native.same_object(native))
                    {
                        record.state = barrier.before;
                    }
                }
                BarrierResource::Texture(native) => {
                    if let Some((_, record)) = self
                        .textures
                        .iter_mut()
                        .find(|(_, record)| record.native.same_object(native))
                    {
                        record.state = barrier.before;
                    }
                }
            }
        }
    }

    /// Close and submit the current frame's list if it holds unsubmitted
    /// work. Returns the fence value of that submission.
    fn flush_frame(&mut self) -> Result<Option<u64>, RhiError> {
        let slot = self.current_frame;
        let list = &self.frames[slot].commands;
        if list.is_rendering() {
            return Err(RhiError::InvalidOperation(
                "the frame's command list is still inside a rendering pass".to_string(),
            ));
        }
        if list.is_open() {
            self.close_list(slot);
        }
        let frame = &self.frames[slot];
        if frame.state() != FrameState::Recording || frame.commands.is_empty() {
            return Ok(None);
        }
        self.submit_slot(slot).map(Some)
    }

    fn close_list(&mut self, slot: usize) {
        self.frames[slot].commands.close();
        for (_, buffer) in self.buffers.iter_mut() {
            buffer.state = ResourceState::Common;
        }
    }

    fn submit_slot(&mut self, slot: usize) -> Result<u64, RhiError> {
        let frame = &mut self.frames[slot];
        let commands = frame.commands.take_for_submit();
        let value = self.device.submit(commands)?;
        frame.mark_submitted(value);
        self.stats.submissions += 1;
        Ok(value)
    }

    /// Block until every submission retired.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        self.device.wait_idle()
    }

    /// Wait for the GPU, then release every object in dependency order.
    ///
    /// An open frame is flushed first. Calling this twice is a no-op.
    pub fn shutdown(&mut self) -> Result<(), RhiError> {
        if self.shut_down {
            return Ok(());
        }
        if self.frame_open {
            self.end_frame()?;
        }
        self.device.wait_idle()?;

        let groups = self.bind_space.groups.drain().len();
        self.bind_space.layouts.drain();
        let pipelines = self.pipelines.drain().len();
        self.shader_modules.drain();
        self.samplers.drain();
        self.swapchains.drain();
        let textures = self.textures.drain().len();
        let buffers = self.buffers.drain().len();
        for frame in &mut self.frames {
            frame.release();
        }
        self.shut_down = true;
        log::info!(
            "Renderer shut down: released {buffers} buffers, {textures} textures, \
             {pipelines} pipelines, {groups} bind groups"
        );
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if !self.shut_down
            && let Err(e) = self.device.wait_idle()
        {
            log::warn!("failed to wait for the GPU while dropping the renderer: {e}");
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend_name())
            .field("frame_count", &self.frames.len())
            .field("frame_open", &self.frame_open)
            .field("current_frame", &self.current_frame)
            .finish()
    }
}

impl RendererApi for Renderer {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn begin_frame(&mut self) -> Result<(), RhiError> {
        Renderer::begin_frame(self)
    }

    fn end_frame(&mut self) -> Result<(), RhiError> {
        Renderer::end_frame(self)
    }

    fn abort_frame(&mut self) -> Result<(), RhiError> {
        Renderer::abort_frame(self)
    }

    fn is_frame_open(&self) -> bool {
        self.frame_open
    }

    fn frame_index(&self) -> u32 {
        Renderer::frame_index(self)
    }

    fn current_backbuffer(&self, swapchain: SwapchainHandle) -> Result<TextureHandle, RhiError> {
        Renderer::current_backbuffer(self, swapchain)
    }

    fn depth_buffer(&self, swapchain: SwapchainHandle) -> Result<Option<TextureHandle>, RhiError> {
        Renderer::depth_buffer(self, swapchain)
    }

    fn update_buffer(
        &mut self,
        buffer: BufferHandle,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<(), RhiError> {
        Renderer::update_buffer(self, buffer, dst_offset, data)
    }

    fn begin_commands(&mut self) -> Result<CommandListHandle, RhiError> {
        Renderer::begin_commands(self)
    }

    fn cmd_begin_rendering(
        &mut self,
        cmd: CommandListHandle,
        info: &RenderingInfo,
    ) -> Result<(), RhiError> {
        Renderer::cmd_begin_rendering(self, cmd, info)
    }

    fn cmd_end_rendering(&mut self, cmd: CommandListHandle) -> Result<(), RhiError> {
        Renderer::cmd_end_rendering(self, cmd)
    }

    fn cmd_set_pipeline(
        &mut self,
        cmd: CommandListHandle,
        pipeline: PipelineHandle,
    ) -> Result<(), RhiError> {
        Renderer::cmd_set_pipeline(self, cmd, pipeline)
    }

    fn cmd_set_bind_group(
        &mut self,
        cmd: CommandListHandle,
        index: u32,
        group: BindGroupHandle,
    ) -> Result<(), RhiError> {
        Renderer::cmd_set_bind_group(self, cmd, index, group)
    }

    fn cmd_set_vertex_buffer(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> Result<(), RhiError> {
        Renderer::cmd_set_vertex_buffer(self, cmd, buffer, offset)
    }

    fn cmd_set_index_buffer(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) -> Result<(), RhiError> {
        Renderer::cmd_set_index_buffer(self, cmd, buffer, offset, format)
    }

    fn cmd_draw(
        &mut self,
        cmd: CommandListHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        Renderer::cmd_draw(self, cmd, vertex_count, instance_count, first_vertex, first_instance)
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: CommandListHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        Renderer::cmd_draw_indexed(
            self,
            cmd,
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        )
    }

    fn end_commands(&mut self, cmd: CommandListHandle) -> Result<(), RhiError> {
        Renderer::end_commands(self, cmd)
    }

    fn submit(&mut self, cmd: CommandListHandle) -> Result<u64, RhiError> {
        Renderer::submit(self, cmd)
    }

    fn present(&mut self, swapchain: SwapchainHandle) -> Result<(), RhiError> {
        Renderer::present(self, swapchain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    fn renderer(frames: u32) -> Renderer {
        let config = RendererConfig::new()
            .with_frame_count(frames)
            .with_upload_ring_size(4096);
        Renderer::with_backend(Arc::new(SoftwareBackend::new().unwrap()), config).unwrap()
    }

    #[test]
    fn test_init_reserves_fallback_buffer() {
        let renderer = renderer(2);
        assert_eq!(renderer.frame_count(), 2);
        assert_eq!(renderer.stats().live_buffers, 1);
        assert_eq!(
            renderer.buffer_state(renderer.fallback_constant_buffer()).unwrap(),
            ResourceState::Common
        );
    }

    #[test]
    fn test_begin_frame_twice_rejected() {
        let mut renderer = renderer(2);
        renderer.begin_frame().unwrap();
        assert!(matches!(
            renderer.begin_frame(),
            Err(RhiError::InvalidOperation(_))
        ));
        renderer.end_frame().unwrap();
        assert!(renderer.end_frame().is_err());
    }

    #[test]
    fn test_slots_round_robin_without_swapchain() {
        let mut renderer = renderer(3);
        let mut slots = Vec::new();
        for _ in 0..4 {
            renderer.begin_frame().unwrap();
            slots.push(renderer.frame_index());
            renderer.end_frame().unwrap();
        }
        assert_eq!(slots, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_submission_stamps_fence_on_slot() {
        let mut renderer = renderer(2);
        let cmd = renderer.begin_commands().unwrap();
        renderer.end_commands(cmd).unwrap();
        let value = renderer.submit(cmd).unwrap();
        let frame = renderer.frame(0).unwrap();
        assert_eq!(frame.fence_value(), value);
        assert_eq!(frame.state(), FrameState::Submitted);
        renderer.end_frame().unwrap();
    }

    #[test]
    fn test_abort_frame_drops_work_and_restores_states() {
        let mut renderer = renderer(2);
        let buffer = renderer
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::VERTEX), None)
            .unwrap();
        let before = renderer.device().last_signaled();

        let cmd = renderer.begin_commands().unwrap();
        renderer.update_buffer(buffer, 0, &[7; 16]).unwrap();
        renderer.cmd_set_vertex_buffer(cmd, buffer, 0).unwrap();
        assert_eq!(
            renderer.buffer_state(buffer).unwrap(),
            ResourceState::VertexAndConstant
        );

        renderer.abort_frame().unwrap();
        assert!(!renderer.is_frame_open());
        assert_eq!(renderer.buffer_state(buffer).unwrap(), ResourceState::Common);
        assert_eq!(renderer.stats().submissions, 0);
        assert_eq!(renderer.device().last_signaled(), before);
        assert!(renderer.submit(cmd).is_err());
        assert!(renderer.abort_frame().is_err());

        renderer.begin_frame().unwrap();
        renderer.end_frame().unwrap();
        assert_eq!(renderer.read_buffer(buffer, 0, 16).unwrap(), vec![0; 16]);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut renderer = renderer(2);
        renderer.begin_frame().unwrap();
        renderer.shutdown().unwrap();
        assert_eq!(renderer.stats().live_buffers, 0);
        assert!(!renderer.is_frame_open());
        assert!(renderer.begin_frame().is_err());
        renderer.shutdown().unwrap();
    }
}
