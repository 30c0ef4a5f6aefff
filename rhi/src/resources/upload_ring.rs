//! Per-frame upload ring.
//!
//! Each frame slot owns one persistently mapped, host-visible buffer. Data
//! for buffer and texture updates is copied into the ring at increasing
//! aligned offsets, and a GPU copy out of the ring is recorded into the
//! frame's command list. The whole ring is rewound when the slot is reused,
//! which happens only after the slot's fence shows the GPU finished reading
//! it.
//!
//! When an allocation does not fit behind the head it wraps to offset 0.
//! Data staged earlier in the same frame may then be overwritten before the
//! GPU copies it out; callers size the ring for one frame of uploads.

use crate::backend::{GpuBuffer, MappedRange};
use crate::error::RhiError;

/// A region of the ring holding staged bytes.
#[derive(Debug, Clone)]
pub struct StagingAllocation {
    /// The ring's native buffer.
    pub buffer: GpuBuffer,
    /// Byte offset of the staged data.
    pub offset: u64,
    /// Size of the staged data in bytes.
    pub size: u64,
}

impl StagingAllocation {
    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Linear staging allocator over a mapped upload buffer.
pub struct UploadRing {
    buffer: GpuBuffer,
    mapping: MappedRange,
    capacity: u64,
    head: u64,
    wrap_count: u64,
    staged_bytes: u64,
}

impl UploadRing {
    /// Wrap a mapped upload buffer of `capacity` bytes.
    pub fn new(buffer: GpuBuffer, mapping: MappedRange, capacity: u64) -> Result<Self, RhiError> {
        if capacity == 0 {
            return Err(RhiError::InvalidArgument(
                "upload ring capacity cannot be zero".to_string(),
            ));
        }
        if mapping.len() < capacity {
            return Err(RhiError::InvalidArgument(format!(
                "upload ring mapping of {} bytes is smaller than its capacity of {capacity}",
                mapping.len()
            )));
        }
        Ok(Self {
            buffer,
            mapping,
            capacity,
            head: 0,
            wrap_count: 0,
            staged_bytes: 0,
        })
    }

    /// Reserve `size` bytes at the next `alignment`-aligned offset.
    ///
    /// Wraps to offset 0 when the allocation does not fit behind the head.
    /// Fails with [`RhiError::UploadOverflow`] when `size` exceeds the
    /// whole ring.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<u64, RhiError> {
        if !alignment.is_power_of_two() {
            return Err(RhiError::InvalidArgument(format!(
                "alignment must be a power of 2, got {alignment}"
            )));
        }
        if size > self.capacity {
            return Err(RhiError::UploadOverflow {
                requested: size,
                capacity: self.capacity,
            });
        }

        let mut offset = align_up(self.head, alignment);
        if offset + size > self.capacity {
            log::warn!(
                "upload ring wrapped: {size} bytes requested at head {} of {}",
                self.head,
                self.capacity
            );
            offset = 0;
            self.wrap_count += 1;
        }
        self.head = offset + size;
        Ok(offset)
    }

    /// Copy `data` into the ring and return where it landed.
    pub fn stage(&mut self, data: &[u8], alignment: u64) -> Result<StagingAllocation, RhiError> {
        let size = data.len() as u64;
        let offset = self.allocate(size, alignment)?;
        self.mapping.write(offset, data)?;
        self.staged_bytes += size;
        Ok(StagingAllocation {
            buffer: self.buffer.clone(),
            offset,
            size,
        })
    }

    /// Rewind to the start of the ring.
    pub fn reset(&mut self) {
        self.head = 0;
        self.staged_bytes = 0;
    }

    /// Native buffer backing the ring.
    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    /// Host mapping of the ring.
    pub fn mapping(&self) -> &MappedRange {
        &self.mapping
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Offset the next allocation starts searching from.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Bytes staged since the last reset.
    pub fn staged_bytes(&self) -> u64 {
        self.staged_bytes
    }

    /// Number of wraps over the ring's lifetime.
    pub fn wrap_count(&self) -> u64 {
        self.wrap_count
    }
}

impl std::fmt::Debug for UploadRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRing")
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("wrap_count", &self.wrap_count)
            .finish_non_exhaustive()
    }
}

/// Align `value` up to the next multiple of `alignment` (a power of two).
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::GpuBackend;
    use crate::resources::ResourceState;
    use crate::types::{BufferDescriptor, BufferUsage};

    fn ring(capacity: u64) -> (SoftwareBackend, UploadRing) {
        let backend = SoftwareBackend::new().unwrap();
        let buffer = backend
            .create_buffer(
                &BufferDescriptor::new(capacity, BufferUsage::HOST_VISIBLE | BufferUsage::COPY_SRC),
                ResourceState::GenericRead,
            )
            .unwrap();
        let mapping = backend.map_buffer(&buffer).unwrap();
        let ring = UploadRing::new(buffer, mapping, capacity).unwrap();
        (backend, ring)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(255, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(100, 1), 100);
    }

    #[test]
    fn test_allocations_are_aligned() {
        let (_backend, mut ring) = ring(4096);
        assert_eq!(ring.allocate(10, 256).unwrap(), 0);
        assert_eq!(ring.allocate(10, 256).unwrap(), 256);
        assert_eq!(ring.allocate(300, 256).unwrap(), 512);
        assert_eq!(ring.head(), 812);
    }

    #[test]
    fn test_wraps_to_zero_when_full() {
        let (_backend, mut ring) = ring(1024);
        assert_eq!(ring.allocate(700, 256).unwrap(), 0);
        assert_eq!(ring.allocate(400, 256).unwrap(), 0);
        assert_eq!(ring.wrap_count(), 1);
        assert_eq!(ring.head(), 400);
    }

    #[test]
    fn test_overflow_reported() {
        let (_backend, mut ring) = ring(1024);
        ring.allocate(100, 256).unwrap();
        assert_eq!(
            ring.stage(&[0u8; 1025], 256).unwrap_err(),
            RhiError::UploadOverflow {
                requested: 1025,
                capacity: 1024
            }
        );
        // A failed stage leaves the head untouched.
        assert_eq!(ring.head(), 100);
        assert_eq!(ring.wrap_count(), 0);
    }

    #[test]
    fn test_reset_rewinds() {
        let (_backend, mut ring) = ring(1024);
        ring.stage(&[1u8; 512], 256).unwrap();
        assert_eq!(ring.staged_bytes(), 512);
        ring.reset();
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.staged_bytes(), 0);
        assert_eq!(ring.stage(&[2u8; 16], 256).unwrap().offset, 0);
    }

    #[test]
    fn test_rejects_bad_alignment() {
        let (_backend, mut ring) = ring(1024);
        assert!(matches!(
            ring.allocate(16, 3),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_sized_stage() {
        let (_backend, mut ring) = ring(1024);
        let alloc = ring.stage(&[], 256).unwrap();
        assert_eq!(alloc.size, 0);
        assert_eq!(alloc.end(), alloc.offset);
    }

    /// A payload of exactly the ring's capacity lands at offset 0 intact,
    /// wrapping when earlier data moved the head.
    #[rstest::rstest]
    #[case::empty_ring(0, 0)]
    #[case::after_small_stage(40, 1)]
    #[case::head_at_end(4096, 1)]
    fn test_stage_full_capacity_round_trips(#[case] staged_first: usize, #[case] wraps: u64) {
        let (backend, mut ring) = ring(4096);
        if staged_first > 0 {
            ring.stage(&vec![9u8; staged_first], 256).unwrap();
            assert_ne!(ring.head(), 0);
        }
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 241) as u8).collect();
        let alloc = ring.stage(&data, 256).unwrap();
        assert_eq!(alloc.offset, 0);
        assert_eq!(alloc.end(), ring.capacity());
        assert_eq!(ring.head(), ring.capacity());
        assert_eq!(ring.wrap_count(), wraps);
        let read = backend
            .read_buffer(&alloc.buffer, alloc.offset, alloc.size)
            .unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn test_stage_round_trips_bytes() {
        let (backend, mut ring) = ring(4096);
        ring.stage(&[9u8; 40], 256).unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let alloc = ring.stage(&data, 256).unwrap();
        assert_eq!(alloc.offset, 256);
        let read = backend
            .read_buffer(&alloc.buffer, alloc.offset, alloc.size)
            .unwrap();
        assert_eq!(read, data);
    }
}
