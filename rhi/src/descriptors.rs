//! Descriptor heaps.
//!
//! Two kinds of heaps exist:
//!
//! - [`CpuDescriptorHeap`]: permanent, non-shader-visible storage. Every
//!   created view takes one slot for the lifetime of the renderer; slots are
//!   bump-allocated and never reclaimed.
//! - [`GpuDescriptorAllocator`]: the shader-visible heaps owned by one frame
//!   slot. Bind groups copy their descriptors in at record time; the cursors
//!   reset when the slot is reused, so a GPU descriptor is only valid for the
//!   frame that allocated it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::backend::{GpuBuffer, GpuSampler, GpuTexture};
use crate::error::RhiError;

static NEXT_HEAP_ID: AtomicU32 = AtomicU32::new(1);

/// A resolved view of a resource.
#[derive(Debug, Clone, Default)]
pub enum Descriptor {
    /// Empty slot. Reads as zero.
    #[default]
    Null,
    /// Constant buffer view over a byte range.
    ConstantBuffer {
        buffer: GpuBuffer,
        offset: u64,
        size: u64,
    },
    /// Sampled texture view.
    ShaderResource(GpuTexture),
    /// Sampler state.
    Sampler(GpuSampler),
    /// Color attachment view.
    RenderTarget(GpuTexture),
    /// Depth attachment view.
    DepthStencil(GpuTexture),
}

impl Descriptor {
    /// Returns true for the null descriptor.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Category of a descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// Constant buffer and shader resource views.
    View,
    /// Samplers.
    Sampler,
    /// Render-target views.
    RenderTarget,
    /// Depth-stencil views.
    DepthStencil,
}

impl HeapKind {
    /// Name used in errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Sampler => "sampler",
            Self::RenderTarget => "render-target",
            Self::DepthStencil => "depth-stencil",
        }
    }

    fn accepts(self, descriptor: &Descriptor) -> bool {
        match descriptor {
            Descriptor::Null => true,
            Descriptor::ConstantBuffer { .. } | Descriptor::ShaderResource(_) => self == Self::View,
            Descriptor::Sampler(_) => self == Self::Sampler,
            Descriptor::RenderTarget(_) => self == Self::RenderTarget,
            Descriptor::DepthStencil(_) => self == Self::DepthStencil,
        }
    }
}

/// Location of a descriptor in a [`CpuDescriptorHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDescriptor {
    heap: u32,
    index: u32,
}

impl CpuDescriptor {
    /// Slot index within the heap.
    pub fn index(self) -> u32 {
        self.index
    }
}

/// Linear allocator over a fixed-capacity, non-shader-visible heap.
#[derive(Debug)]
pub struct CpuDescriptorHeap {
    id: u32,
    kind: HeapKind,
    capacity: u32,
    slots: Vec<Descriptor>,
}

impl CpuDescriptorHeap {
    /// Create an empty heap.
    pub fn new(kind: HeapKind, capacity: u32) -> Self {
        Self {
            id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            capacity,
            slots: Vec::with_capacity(capacity as usize),
        }
    }

    /// Store a descriptor in the next free slot.
    ///
    /// Running out of slots means the heap was sized too small for the
    /// application. Debug builds assert; release builds report
    /// [`RhiError::DescriptorHeapExhausted`].
    pub fn allocate(&mut self, descriptor: Descriptor) -> Result<CpuDescriptor, RhiError> {
        self.check_kind(&descriptor)?;
        debug_assert!(
            self.slots.len() < self.capacity as usize,
            "{} descriptor heap exhausted (capacity {})",
            self.kind.name(),
            self.capacity
        );
        if self.slots.len() >= self.capacity as usize {
            return Err(RhiError::DescriptorHeapExhausted {
                heap: self.kind.name(),
                capacity: self.capacity,
            });
        }
        let index = self.slots.len() as u32;
        self.slots.push(descriptor);
        Ok(CpuDescriptor { heap: self.id, index })
    }

    /// Overwrite an already allocated slot.
    pub fn write(&mut self, at: CpuDescriptor, descriptor: Descriptor) -> Result<(), RhiError> {
        self.check_kind(&descriptor)?;
        let slot = self.slot_mut(at)?;
        *slot = descriptor;
        Ok(())
    }

    /// Read a descriptor.
    pub fn get(&self, at: CpuDescriptor) -> Result<&Descriptor, RhiError> {
        if at.heap != self.id {
            return Err(RhiError::InvalidArgument(format!(
                "descriptor does not belong to this {} heap",
                self.kind.name()
            )));
        }
        self.slots.get(at.index as usize).ok_or_else(|| {
            RhiError::InvalidArgument(format!("descriptor slot {} was never allocated", at.index))
        })
    }

    fn slot_mut(&mut self, at: CpuDescriptor) -> Result<&mut Descriptor, RhiError> {
        if at.heap != self.id {
            return Err(RhiError::InvalidArgument(format!(
                "descriptor does not belong to this {} heap",
                self.kind.name()
            )));
        }
        self.slots.get_mut(at.index as usize).ok_or_else(|| {
            RhiError::InvalidArgument(format!("descriptor slot {} was never allocated", at.index))
        })
    }

    fn check_kind(&self, descriptor: &Descriptor) -> Result<(), RhiError> {
        if self.kind.accepts(descriptor) {
            Ok(())
        } else {
            Err(RhiError::InvalidArgument(format!(
                "cannot store {descriptor:?} in a {} heap",
                self.kind.name()
            )))
        }
    }

    /// Heap category.
    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Number of allocated slots.
    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Returns true if nothing was allocated yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// A shader-visible descriptor table shared with the backend.
///
/// The frontend writes slots while recording; the backend reads them when
/// the command list referencing them executes.
#[derive(Debug)]
pub struct GpuDescriptorHeap {
    kind: HeapKind,
    slots: RwLock<Vec<Descriptor>>,
}

impl GpuDescriptorHeap {
    fn new(kind: HeapKind, capacity: u32) -> Self {
        Self {
            kind,
            slots: RwLock::new(vec![Descriptor::Null; capacity as usize]),
        }
    }

    /// Heap category.
    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Number of slots.
    pub fn capacity(&self) -> u32 {
        self.slots.read().len() as u32
    }

    /// Read a slot. Out-of-range reads return the null descriptor.
    pub fn read(&self, index: u32) -> Descriptor {
        self.slots
            .read()
            .get(index as usize)
            .cloned()
            .unwrap_or_default()
    }

    fn write(&self, index: u32, descriptor: Descriptor) {
        if let Some(slot) = self.slots.write().get_mut(index as usize) {
            *slot = descriptor;
        }
    }

    fn clear(&self) {
        self.slots.write().fill(Descriptor::Null);
    }
}

/// Index of a slot in a frame's shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuDescriptor(pub u32);

/// Per-frame allocator over the shader-visible view and sampler heaps.
///
/// Allocation wraps to slot 0 when a category runs out. Callers size the
/// heaps for one frame's worth of bindings; a wrap overwrites descriptors
/// that earlier commands of the same frame may still reference.
#[derive(Debug)]
pub struct GpuDescriptorAllocator {
    views: Arc<GpuDescriptorHeap>,
    samplers: Arc<GpuDescriptorHeap>,
    view_cursor: u32,
    sampler_cursor: u32,
    wraps: u64,
}

impl GpuDescriptorAllocator {
    /// Create the frame heaps.
    pub fn new(view_capacity: u32, sampler_capacity: u32) -> Self {
        Self {
            views: Arc::new(GpuDescriptorHeap::new(HeapKind::View, view_capacity)),
            samplers: Arc::new(GpuDescriptorHeap::new(HeapKind::Sampler, sampler_capacity)),
            view_cursor: 0,
            sampler_cursor: 0,
            wraps: 0,
        }
    }

    /// Rewind both cursors. Only valid once the frame's GPU work retired.
    pub fn reset(&mut self) {
        self.view_cursor = 0;
        self.sampler_cursor = 0;
        self.views.clear();
        self.samplers.clear();
    }

    /// Next view slot.
    pub fn alloc_view(&mut self) -> GpuDescriptor {
        let capacity = self.views.capacity();
        GpuDescriptor(Self::bump(
            &mut self.view_cursor,
            capacity,
            &mut self.wraps,
            HeapKind::View,
        ))
    }

    /// Next sampler slot.
    pub fn alloc_sampler(&mut self) -> GpuDescriptor {
        let capacity = self.samplers.capacity();
        GpuDescriptor(Self::bump(
            &mut self.sampler_cursor,
            capacity,
            &mut self.wraps,
            HeapKind::Sampler,
        ))
    }

    fn bump(cursor: &mut u32, capacity: u32, wraps: &mut u64, kind: HeapKind) -> u32 {
        if *cursor >= capacity {
            log::warn!(
                "shader-visible {} heap wrapped after {capacity} descriptors in one frame",
                kind.name()
            );
            *cursor = 0;
            *wraps += 1;
        }
        let slot = *cursor;
        *cursor += 1;
        slot
    }

    /// Copy a view descriptor into a shader-visible slot.
    pub fn copy_view(&self, dst: GpuDescriptor, descriptor: &Descriptor) -> Result<(), RhiError> {
        if !HeapKind::View.accepts(descriptor) {
            return Err(RhiError::InvalidArgument(format!(
                "{descriptor:?} is not a view descriptor"
            )));
        }
        self.views.write(dst.0, descriptor.clone());
        Ok(())
    }

    /// Copy a sampler descriptor into a shader-visible slot.
    pub fn copy_sampler(&self, dst: GpuDescriptor, descriptor: &Descriptor) -> Result<(), RhiError> {
        if !HeapKind::Sampler.accepts(descriptor) {
            return Err(RhiError::InvalidArgument(format!(
                "{descriptor:?} is not a sampler descriptor"
            )));
        }
        self.samplers.write(dst.0, descriptor.clone());
        Ok(())
    }

    /// Shared view heap.
    pub fn view_heap(&self) -> &Arc<GpuDescriptorHeap> {
        &self.views
    }

    /// Shared sampler heap.
    pub fn sampler_heap(&self) -> &Arc<GpuDescriptorHeap> {
        &self.samplers
    }

    /// View slots handed out since the last reset (before any wrap).
    pub fn views_allocated(&self) -> u32 {
        self.view_cursor
    }

    /// Sampler slots handed out since the last reset (before any wrap).
    pub fn samplers_allocated(&self) -> u32 {
        self.sampler_cursor
    }

    /// Number of wraps over the allocator's lifetime.
    pub fn wrap_count(&self) -> u64 {
        self.wraps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_heap_bumps() {
        let mut heap = CpuDescriptorHeap::new(HeapKind::View, 4);
        let a = heap.allocate(Descriptor::Null).unwrap();
        let b = heap.allocate(Descriptor::Null).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.capacity(), 4);
        assert!(heap.get(b).unwrap().is_null());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "view descriptor heap exhausted")]
    fn test_cpu_heap_overflow_asserts() {
        let mut heap = CpuDescriptorHeap::new(HeapKind::View, 1);
        heap.allocate(Descriptor::Null).unwrap();
        let _ = heap.allocate(Descriptor::Null);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_cpu_heap_overflow_reports() {
        let mut heap = CpuDescriptorHeap::new(HeapKind::View, 1);
        heap.allocate(Descriptor::Null).unwrap();
        assert_eq!(
            heap.allocate(Descriptor::Null).unwrap_err(),
            RhiError::DescriptorHeapExhausted {
                heap: "view",
                capacity: 1
            }
        );
    }

    #[test]
    fn test_descriptor_from_other_heap_rejected() {
        let mut first = CpuDescriptorHeap::new(HeapKind::View, 2);
        let second = CpuDescriptorHeap::new(HeapKind::View, 2);
        let slot = first.allocate(Descriptor::Null).unwrap();
        assert!(second.get(slot).is_err());
    }

    #[test]
    fn test_gpu_allocator_wraps_to_zero() {
        let mut gpu = GpuDescriptorAllocator::new(3, 2);
        let views: Vec<u32> = (0..5).map(|_| gpu.alloc_view().0).collect();
        assert_eq!(views, vec![0, 1, 2, 0, 1]);
        assert_eq!(gpu.wrap_count(), 1);

        assert_eq!(gpu.alloc_sampler().0, 0);
        assert_eq!(gpu.alloc_sampler().0, 1);
        assert_eq!(gpu.alloc_sampler().0, 0);
        assert_eq!(gpu.wrap_count(), 2);
    }

    #[test]
    fn test_gpu_allocator_reset_clears_slots() {
        let mut gpu = GpuDescriptorAllocator::new(4, 4);
        let slot = gpu.alloc_view();
        gpu.copy_view(
            slot,
            &Descriptor::ConstantBuffer {
                buffer: crate::backend::software::test_buffer(256),
                offset: 0,
                size: 256,
            },
        )
        .unwrap();
        assert!(!gpu.view_heap().read(slot.0).is_null());

        gpu.reset();
        assert_eq!(gpu.views_allocated(), 0);
        assert!(gpu.view_heap().read(slot.0).is_null());
        assert_eq!(gpu.alloc_view(), GpuDescriptor(0));
    }

    #[test]
    fn test_gpu_copy_checks_category() {
        let mut gpu = GpuDescriptorAllocator::new(4, 4);
        let slot = gpu.alloc_sampler();
        assert!(
            gpu.copy_sampler(
                slot,
                &Descriptor::ShaderResource(crate::backend::software::test_texture(4, 4))
            )
            .is_err()
        );
    }
}
