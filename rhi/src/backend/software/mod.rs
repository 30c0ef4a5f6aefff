//! CPU backend.
//!
//! Command lists are executed in submission order on a dedicated queue
//! thread fed through a `flume` channel. Fence completion is published
//! through a `parking_lot` mutex and condition variable, so host waits
//! block instead of spinning.
//!
//! Every resource carries its true access state. The queue compares each
//! barrier's before-state and every use of a resource against that state
//! and records a validation error on mismatch, the way a native debug layer
//! would. Buffers touched by a command list decay back to `Common` when the
//! list finishes executing.
//!
//! The queue can be paused through [`SoftwareQueueControl`] to hold GPU
//! progress still while a test inspects CPU-side behavior.

mod queue;
mod raster;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::api::Capabilities;
use crate::backend::{
    FenceStatus, GpuBackend, GpuBuffer, GpuPipeline, GpuSampler, GpuShaderModule, GpuTexture,
    HostMapping, MappedRange, PipelineBuildInfo,
};
use crate::commands::Command;
use crate::error::RhiError;
use crate::resources::ResourceState;
use crate::types::{
    BufferDescriptor, BufferUsage, DepthStencilState, PrimitiveTopology, SamplerDescriptor,
    ShaderModuleDescriptor, ShaderStage, TextureDescriptor, TextureFormat, VertexLayout,
};

use queue::QueueItem;

// ============================================================================
// Resources
// ============================================================================

/// CPU-memory buffer.
pub struct SoftBuffer {
    label: Option<String>,
    size: u64,
    usage: BufferUsage,
    inner: Mutex<SoftBufferInner>,
}

struct SoftBufferInner {
    data: Vec<u8>,
    state: ResourceState,
}

impl SoftBuffer {
    fn new(descriptor: &BufferDescriptor, state: ResourceState) -> Self {
        Self {
            label: descriptor.label.clone(),
            size: descriptor.size,
            usage: descriptor.usage,
            inner: Mutex::new(SoftBufferInner {
                data: vec![0; descriptor.size as usize],
                state,
            }),
        }
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage flags.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// True access state.
    pub fn state(&self) -> ResourceState {
        self.inner.lock().state
    }

    fn set_state(&self, state: ResourceState) {
        self.inner.lock().state = state;
    }

    fn range(&self, offset: u64, size: u64) -> Result<std::ops::Range<usize>, RhiError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(offset as usize..end as usize),
            _ => Err(RhiError::InvalidArgument(format!(
                "range {offset}+{size} is outside buffer {:?} of {} bytes",
                self.label, self.size
            ))),
        }
    }

    fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, RhiError> {
        let range = self.range(offset, size)?;
        Ok(self.inner.lock().data[range].to_vec())
    }

    fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        let range = self.range(offset, data.len() as u64)?;
        self.inner.lock().data[range].copy_from_slice(data);
        Ok(())
    }

    fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }
}

impl HostMapping for SoftBuffer {
    fn len(&self) -> u64 {
        self.size
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        self.write_bytes(offset, data)
    }
}

/// Texel storage of a software texture (mip 0 only).
enum Texels {
    /// Four bytes per texel in the texture's channel order.
    Color(Vec<u8>),
    /// One float per texel.
    Depth(Vec<f32>),
}

/// CPU-memory texture.
pub struct SoftTexture {
    descriptor: TextureDescriptor,
    inner: Mutex<SoftTextureInner>,
}

struct SoftTextureInner {
    texels: Texels,
    state: ResourceState,
}

impl SoftTexture {
    fn new(descriptor: &TextureDescriptor, state: ResourceState) -> Self {
        let count = descriptor.size.area() as usize;
        let texels = if descriptor.format.is_depth_stencil() {
            Texels::Depth(vec![0.0; count])
        } else {
            Texels::Color(vec![0; count * descriptor.format.block_size() as usize])
        };
        Self {
            descriptor: descriptor.clone(),
            inner: Mutex::new(SoftTextureInner { texels, state }),
        }
    }

    /// Creation parameters.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// True access state.
    pub fn state(&self) -> ResourceState {
        self.inner.lock().state
    }

    fn set_state(&self, state: ResourceState) {
        self.inner.lock().state = state;
    }

    fn read(&self) -> Vec<u8> {
        match &self.inner.lock().texels {
            Texels::Color(texels) => texels.clone(),
            Texels::Depth(depth) => bytemuck::cast_slice(depth).to_vec(),
        }
    }
}

/// Fixed-function pipeline state.
#[derive(Debug, Clone)]
pub struct SoftPipeline {
    pub topology: PrimitiveTopology,
    pub layout: VertexLayout,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_format: Option<TextureFormat>,
}

impl GpuBuffer {
    #[allow(unreachable_patterns)]
    fn as_software(&self) -> Option<&Arc<SoftBuffer>> {
        match self {
            Self::Software(buffer) => Some(buffer),
            _ => None,
        }
    }
}

impl GpuTexture {
    #[allow(unreachable_patterns)]
    fn as_software(&self) -> Option<&Arc<SoftTexture>> {
        match self {
            Self::Software(texture) => Some(texture),
            _ => None,
        }
    }
}

impl GpuSampler {
    #[allow(unreachable_patterns)]
    fn as_software(&self) -> Option<&Arc<SamplerDescriptor>> {
        match self {
            Self::Software(sampler) => Some(sampler),
            _ => None,
        }
    }
}

impl GpuShaderModule {
    #[allow(unreachable_patterns)]
    fn as_software(&self) -> Option<&Arc<ShaderModuleDescriptor>> {
        match self {
            Self::Software(module) => Some(module),
            _ => None,
        }
    }
}

impl GpuPipeline {
    #[allow(unreachable_patterns)]
    fn as_software(&self) -> Option<&Arc<SoftPipeline>> {
        match self {
            Self::Software(pipeline) => Some(pipeline),
            _ => None,
        }
    }
}

fn foreign(kind: &str) -> RhiError {
    RhiError::InvalidArgument(format!("{kind} was not created by the software backend"))
}

// ============================================================================
// Queue state shared with the queue thread
// ============================================================================

/// Counters of work executed by the software queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub command_lists: u64,
    pub commands: u64,
    pub barriers: u64,
    pub buffer_copies: u64,
    pub texture_copies: u64,
    pub draws: u64,
    pub presents: u64,
}

struct Shared {
    completed: Mutex<u64>,
    completed_cv: Condvar,
    paused: Mutex<bool>,
    paused_cv: Condvar,
    validation_errors: Mutex<Vec<String>>,
    presented: Mutex<Vec<u32>>,
    stats: Mutex<QueueStats>,
}

impl Shared {
    fn new() -> Self {
        Self {
            completed: Mutex::new(0),
            completed_cv: Condvar::new(),
            paused: Mutex::new(false),
            paused_cv: Condvar::new(),
            validation_errors: Mutex::new(Vec::new()),
            presented: Mutex::new(Vec::new()),
            stats: Mutex::new(QueueStats::default()),
        }
    }

    fn wait_while_paused(&self) {
        let mut paused = self.paused.lock();
        while *paused {
            self.paused_cv.wait(&mut paused);
        }
    }

    fn complete(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
        }
        self.completed_cv.notify_all();
    }

    fn report(&self, message: String) {
        log::error!("software validation: {message}");
        self.validation_errors.lock().push(message);
    }
}

/// Test-facing control over the software queue.
#[derive(Clone)]
pub struct SoftwareQueueControl {
    shared: Arc<Shared>,
}

impl SoftwareQueueControl {
    /// Stop executing queued work after the item in progress.
    pub fn pause(&self) {
        *self.shared.paused.lock() = true;
    }

    /// Continue executing queued work.
    pub fn resume(&self) {
        *self.shared.paused.lock() = false;
        self.shared.paused_cv.notify_all();
    }

    /// Returns true while paused.
    pub fn is_paused(&self) -> bool {
        *self.shared.paused.lock()
    }

    /// Validation errors reported so far.
    pub fn validation_errors(&self) -> Vec<String> {
        self.shared.validation_errors.lock().clone()
    }

    /// Drain the reported validation errors.
    pub fn take_validation_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.shared.validation_errors.lock())
    }

    /// Image indices presented so far, in order.
    pub fn presented_images(&self) -> Vec<u32> {
        self.shared.presented.lock().clone()
    }

    /// Highest completed fence value.
    pub fn completed_value(&self) -> u64 {
        *self.shared.completed.lock()
    }

    /// Executed work counters.
    pub fn stats(&self) -> QueueStats {
        *self.shared.stats.lock()
    }
}

impl std::fmt::Debug for SoftwareQueueControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareQueueControl")
            .field("paused", &self.is_paused())
            .field("completed", &self.completed_value())
            .finish()
    }
}

// ============================================================================
// Backend
// ============================================================================

/// CPU backend with a validation layer.
pub struct SoftwareBackend {
    capabilities: Capabilities,
    shared: Arc<Shared>,
    sender: Option<flume::Sender<QueueItem>>,
    thread: Option<JoinHandle<()>>,
}

impl SoftwareBackend {
    /// Create a backend implementing every capability.
    pub fn new() -> Result<Self, RhiError> {
        Self::with_capabilities(Capabilities::all())
    }

    /// Create a backend that reports only `capabilities`.
    pub fn with_capabilities(capabilities: Capabilities) -> Result<Self, RhiError> {
        let shared = Arc::new(Shared::new());
        let (sender, receiver) = flume::unbounded();
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("rhi-software-queue".to_string())
            .spawn(move || queue::run(receiver, thread_shared))
            .map_err(|e| RhiError::InitializationFailed(format!("queue thread: {e}")))?;

        Ok(Self {
            capabilities,
            shared,
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    /// Handle for pausing the queue and inspecting validation results.
    pub fn control(&self) -> SoftwareQueueControl {
        SoftwareQueueControl {
            shared: Arc::clone(&self.shared),
        }
    }

    fn enqueue(&self, item: QueueItem) -> Result<(), RhiError> {
        let lost = self.thread.as_ref().is_none_or(|t| t.is_finished());
        match &self.sender {
            Some(sender) if !lost => sender.send(item).map_err(|_| RhiError::DeviceLost),
            _ => Err(RhiError::DeviceLost),
        }
    }
}

impl Drop for SoftwareBackend {
    fn drop(&mut self) {
        // Closing the channel ends the queue loop once queued work drained.
        self.sender.take();
        *self.shared.paused.lock() = false;
        self.shared.paused_cv.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("software queue thread panicked");
            }
        }
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuBuffer, RhiError> {
        if descriptor.size == 0 {
            return Err(RhiError::InvalidArgument(
                "buffer size cannot be zero".to_string(),
            ));
        }
        Ok(GpuBuffer::Software(Arc::new(SoftBuffer::new(
            descriptor,
            initial_state,
        ))))
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuTexture, RhiError> {
        if descriptor.size.is_empty() {
            return Err(RhiError::InvalidArgument(format!(
                "texture size {}x{} is empty",
                descriptor.size.width, descriptor.size.height
            )));
        }
        Ok(GpuTexture::Software(Arc::new(SoftTexture::new(
            descriptor,
            initial_state,
        ))))
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, RhiError> {
        Ok(GpuSampler::Software(Arc::new(descriptor.clone())))
    }

    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<GpuShaderModule, RhiError> {
        // Bytecode is carried along for debugging only; the software
        // pipeline is fixed-function.
        Ok(GpuShaderModule::Software(Arc::new(descriptor.clone())))
    }

    fn create_pipeline(&self, info: &PipelineBuildInfo<'_>) -> Result<GpuPipeline, RhiError> {
        let vertex = info.vertex.as_software().ok_or_else(|| foreign("vertex shader"))?;
        let fragment = info
            .fragment
            .as_software()
            .ok_or_else(|| foreign("fragment shader"))?;
        if vertex.stage != ShaderStage::Vertex || fragment.stage != ShaderStage::Fragment {
            return Err(RhiError::InvalidArgument(
                "pipeline shader stages do not match their slots".to_string(),
            ));
        }
        let descriptor = info.descriptor;
        Ok(GpuPipeline::Software(Arc::new(SoftPipeline {
            topology: descriptor.topology,
            layout: descriptor.vertex_layout.clone(),
            depth_stencil: descriptor.depth_stencil,
            color_format: descriptor.color_format,
        })))
    }

    fn map_buffer(&self, buffer: &GpuBuffer) -> Result<MappedRange, RhiError> {
        let soft = buffer.as_software().ok_or_else(|| foreign("buffer"))?;
        if !soft.usage.contains(BufferUsage::HOST_VISIBLE) {
            return Err(RhiError::InvalidArgument(format!(
                "buffer {:?} is not host visible",
                soft.label
            )));
        }
        let mapping: MappedRange = soft.clone();
        Ok(mapping)
    }

    fn submit(&self, commands: Vec<Command>) -> Result<(), RhiError> {
        self.enqueue(QueueItem::Execute(commands))
    }

    fn signal(&self, value: u64) -> Result<(), RhiError> {
        self.enqueue(QueueItem::Signal(value))
    }

    fn completed_value(&self) -> u64 {
        *self.shared.completed.lock()
    }

    fn wait(&self, value: u64, timeout: Duration) -> Result<FenceStatus, RhiError> {
        let deadline = Instant::now() + timeout;
        let mut completed = self.shared.completed.lock();
        while *completed < value {
            if self.thread.as_ref().is_none_or(|t| t.is_finished()) {
                return Err(RhiError::DeviceLost);
            }
            if self
                .shared
                .completed_cv
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                break;
            }
        }
        Ok(if *completed >= value {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        })
    }

    fn present(&self, texture: &GpuTexture, image_index: u32) -> Result<(), RhiError> {
        let soft = texture.as_software().ok_or_else(|| foreign("texture"))?;
        self.enqueue(QueueItem::Present {
            texture: Arc::clone(soft),
            image_index,
        })
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Result<Vec<u8>, RhiError> {
        buffer
            .as_software()
            .ok_or_else(|| foreign("buffer"))?
            .read(offset, size)
    }

    fn read_texture(&self, texture: &GpuTexture) -> Result<Vec<u8>, RhiError> {
        Ok(texture
            .as_software()
            .ok_or_else(|| foreign("texture"))?
            .read())
    }
}

/// Standalone buffer for unit tests of the frontend containers.
#[cfg(test)]
pub(crate) fn test_buffer(size: u64) -> GpuBuffer {
    GpuBuffer::Software(Arc::new(SoftBuffer::new(
        &BufferDescriptor::new(size, BufferUsage::UNIFORM),
        ResourceState::Common,
    )))
}

/// Standalone texture for unit tests of the frontend containers.
#[cfg(test)]
pub(crate) fn test_texture(width: u32, height: u32) -> GpuTexture {
    use crate::types::TextureUsage;
    GpuTexture::Software(Arc::new(SoftTexture::new(
        &TextureDescriptor::new_2d(
            width,
            height,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        ),
        ResourceState::Common,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Barrier, BarrierResource};
    use crate::types::TextureUsage;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn upload(backend: &SoftwareBackend, data: &[u8]) -> GpuBuffer {
        let buffer = backend
            .create_buffer(
                &BufferDescriptor::new(data.len() as u64, BufferUsage::HOST_VISIBLE),
                ResourceState::GenericRead,
            )
            .unwrap();
        backend.map_buffer(&buffer).unwrap().write(0, data).unwrap();
        buffer
    }

    #[test]
    fn test_signal_and_wait() {
        let backend = SoftwareBackend::new().unwrap();
        backend.signal(1).unwrap();
        assert_eq!(backend.wait(1, TIMEOUT).unwrap(), FenceStatus::Signaled);
        assert_eq!(backend.completed_value(), 1);
    }

    #[test]
    fn test_wait_times_out_while_paused() {
        let backend = SoftwareBackend::new().unwrap();
        let control = backend.control();
        control.pause();
        backend.signal(1).unwrap();
        assert_eq!(
            backend.wait(1, Duration::from_millis(20)).unwrap(),
            FenceStatus::Unsignaled
        );
        control.resume();
        assert_eq!(backend.wait(1, TIMEOUT).unwrap(), FenceStatus::Signaled);
    }

    #[test]
    fn test_copy_and_decay() {
        let backend = SoftwareBackend::new().unwrap();
        let src = upload(&backend, &[1, 2, 3, 4]);
        let dst = backend
            .create_buffer(
                &BufferDescriptor::new(8, BufferUsage::VERTEX | BufferUsage::COPY_DST),
                ResourceState::Common,
            )
            .unwrap();

        backend
            .submit(vec![
                Command::Barrier(Barrier {
                    resource: BarrierResource::Buffer(dst.clone()),
                    before: ResourceState::Common,
                    after: ResourceState::CopyDest,
                }),
                Command::CopyBufferRegion {
                    src: src.clone(),
                    src_offset: 0,
                    dst: dst.clone(),
                    dst_offset: 4,
                    size: 4,
                },
            ])
            .unwrap();
        backend.signal(1).unwrap();
        backend.wait(1, TIMEOUT).unwrap();

        assert_eq!(backend.read_buffer(&dst, 0, 8).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(dst.as_software().unwrap().state(), ResourceState::Common);
        assert_eq!(src.as_software().unwrap().state(), ResourceState::GenericRead);
        assert!(backend.control().validation_errors().is_empty());
        assert_eq!(backend.control().stats().buffer_copies, 1);
    }

    #[test]
    fn test_barrier_mismatch_reported() {
        let backend = SoftwareBackend::new().unwrap();
        let texture = backend
            .create_texture(
                &TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::COPY_DST),
                ResourceState::Common,
            )
            .unwrap();
        backend
            .submit(vec![Command::Barrier(Barrier {
                resource: BarrierResource::Texture(texture.clone()),
                before: ResourceState::ShaderRead,
                after: ResourceState::CopyDest,
            })])
            .unwrap();
        backend.signal(1).unwrap();
        backend.wait(1, TIMEOUT).unwrap();

        let errors = backend.control().take_validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("shader-read"), "{}", errors[0]);
        assert_eq!(
            texture.as_software().unwrap().state(),
            ResourceState::CopyDest
        );
    }

    #[test]
    fn test_present_requires_present_state() {
        let backend = SoftwareBackend::new().unwrap();
        let texture = backend
            .create_texture(
                &TextureDescriptor::new_2d(
                    2,
                    2,
                    TextureFormat::Bgra8Unorm,
                    TextureUsage::RENDER_ATTACHMENT,
                ),
                ResourceState::RenderTarget,
            )
            .unwrap();
        backend.present(&texture, 0).unwrap();
        backend.signal(1).unwrap();
        backend.wait(1, TIMEOUT).unwrap();
        let control = backend.control();
        assert_eq!(control.presented_images(), vec![0]);
        assert_eq!(control.validation_errors().len(), 1);
    }

    #[test]
    fn test_map_requires_host_visible() {
        let backend = SoftwareBackend::new().unwrap();
        let buffer = backend
            .create_buffer(
                &BufferDescriptor::new(16, BufferUsage::VERTEX),
                ResourceState::Common,
            )
            .unwrap();
        assert!(backend.map_buffer(&buffer).is_err());
    }

    #[test]
    fn test_depth_texture_reads_back_floats() {
        let backend = SoftwareBackend::new().unwrap();
        let texture = backend
            .create_texture(
                &TextureDescriptor::new_2d(
                    2,
                    1,
                    TextureFormat::Depth32Float,
                    TextureUsage::RENDER_ATTACHMENT,
                ),
                ResourceState::DepthWrite,
            )
            .unwrap();
        assert_eq!(backend.read_texture(&texture).unwrap().len(), 8);
    }
}
