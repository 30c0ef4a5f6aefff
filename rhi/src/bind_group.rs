//! Bind group layouts and bind groups.
//!
//! A layout has at most one constant-buffer slot, one texture slot and one
//! sampler slot. A bind group resolves its entries to permanent CPU
//! descriptors once, at creation; binding it copies those descriptors into
//! the recording frame's shader-visible heaps. Groups are immutable and are
//! recreated wholesale when a binding changes.
//!
//! Groups without a constant buffer bind the reserved fallback buffer: 256
//! zero bytes with a permanent constant buffer view.

use crate::descriptors::CpuDescriptor;
use crate::error::RhiError;
use crate::resources::HandleTable;
use crate::types::{
    BindGroupDescriptor, BindGroupHandle, BindGroupLayoutDescriptor, BindGroupLayoutHandle,
    BindingType, BufferHandle, SamplerHandle, TextureHandle,
};

/// Size of the fallback constant buffer and the alignment of constant buffer
/// view offsets.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// A registered bind group layout.
#[derive(Debug)]
pub struct BindGroupLayoutRecord {
    pub descriptor: BindGroupLayoutDescriptor,
}

impl BindGroupLayoutRecord {
    /// Validate and wrap a layout descriptor.
    pub fn new(descriptor: BindGroupLayoutDescriptor) -> Result<Self, RhiError> {
        for (i, entry) in descriptor.entries.iter().enumerate() {
            let earlier = &descriptor.entries[..i];
            if earlier.iter().any(|e| e.binding == entry.binding) {
                return Err(RhiError::InvalidArgument(format!(
                    "binding {} is declared twice",
                    entry.binding
                )));
            }
            if earlier.iter().any(|e| e.ty == entry.ty) {
                return Err(RhiError::InvalidArgument(format!(
                    "a bind group layout holds at most one {:?} slot",
                    entry.ty
                )));
            }
            if entry.visibility.is_empty() {
                return Err(RhiError::InvalidArgument(format!(
                    "binding {} is not visible to any stage",
                    entry.binding
                )));
            }
        }
        Ok(Self { descriptor })
    }

    /// Binding type declared for `binding`.
    pub fn binding_type(&self, binding: u32) -> Option<BindingType> {
        self.descriptor
            .entries
            .iter()
            .find(|e| e.binding == binding)
            .map(|e| e.ty)
    }
}

/// A bind group with its entries resolved to CPU descriptors.
#[derive(Debug)]
pub struct BindGroupRecord {
    pub layout: BindGroupLayoutHandle,
    /// Constant buffer view, `None` to bind the fallback buffer.
    pub cbv: Option<CpuDescriptor>,
    pub srv: Option<CpuDescriptor>,
    pub sampler: Option<CpuDescriptor>,
    pub buffer: Option<BufferHandle>,
    pub texture: Option<TextureHandle>,
    pub sampler_handle: Option<SamplerHandle>,
}

/// Checks that every entry of `descriptor` names a layout slot of the same
/// type and that no slot is bound twice.
pub fn validate_entries(
    layout: &BindGroupLayoutRecord,
    descriptor: &BindGroupDescriptor,
) -> Result<(), RhiError> {
    for (i, entry) in descriptor.entries.iter().enumerate() {
        if descriptor.entries[..i]
            .iter()
            .any(|e| e.binding == entry.binding)
        {
            return Err(RhiError::InvalidArgument(format!(
                "binding {} is bound twice",
                entry.binding
            )));
        }
        let actual = entry.resource.binding_type();
        match layout.binding_type(entry.binding) {
            Some(expected) if expected == actual => {}
            Some(expected) => {
                return Err(RhiError::InvalidArgument(format!(
                    "binding {} expects {expected:?}, got {actual:?}",
                    entry.binding
                )));
            }
            None => {
                return Err(RhiError::InvalidArgument(format!(
                    "binding {} is not part of the layout",
                    entry.binding
                )));
            }
        }
    }
    Ok(())
}

/// Resolves the byte range of a constant buffer binding. A size of zero
/// binds the rest of the buffer.
pub fn uniform_range(offset: u64, size: u64, buffer_size: u64) -> Result<u64, RhiError> {
    if offset % CONSTANT_BUFFER_ALIGNMENT != 0 {
        return Err(RhiError::InvalidArgument(format!(
            "constant buffer offset {offset} is not a multiple of {CONSTANT_BUFFER_ALIGNMENT}"
        )));
    }
    let size = if size == 0 {
        buffer_size.saturating_sub(offset)
    } else {
        size
    };
    match offset.checked_add(size) {
        Some(end) if size > 0 && end <= buffer_size => Ok(size),
        _ => Err(RhiError::InvalidArgument(format!(
            "constant buffer range {offset}+{size} is outside a buffer of {buffer_size} bytes"
        ))),
    }
}

/// Bind group layouts, bind groups and the fallback constant buffer.
#[derive(Debug)]
pub struct BindSpace {
    pub layouts: HandleTable<BindGroupLayoutHandle, BindGroupLayoutRecord>,
    pub groups: HandleTable<BindGroupHandle, BindGroupRecord>,
    fallback_buffer: BufferHandle,
    fallback_cbv: CpuDescriptor,
}

impl BindSpace {
    /// Create empty tables around an existing fallback buffer and its view.
    pub fn new(fallback_buffer: BufferHandle, fallback_cbv: CpuDescriptor) -> Self {
        Self {
            layouts: HandleTable::new(),
            groups: HandleTable::new(),
            fallback_buffer,
            fallback_cbv,
        }
    }

    /// The reserved all-zero constant buffer.
    pub fn fallback_buffer(&self) -> BufferHandle {
        self.fallback_buffer
    }

    /// Permanent view of the fallback buffer.
    pub fn fallback_cbv(&self) -> CpuDescriptor {
        self.fallback_cbv
    }

    /// Constant buffer a group binds: its own, or the fallback.
    pub fn constant_buffer(&self, group: &BindGroupRecord) -> (BufferHandle, CpuDescriptor) {
        match (group.buffer, group.cbv) {
            (Some(buffer), Some(cbv)) => (buffer, cbv),
            _ => (self.fallback_buffer, self.fallback_cbv),
        }
    }

    /// Returns true if any live group references `buffer`.
    pub fn references_buffer(&self, buffer: BufferHandle) -> bool {
        self.groups.iter().any(|(_, g)| g.buffer == Some(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{CpuDescriptorHeap, Descriptor, HeapKind};
    use crate::types::{BindGroupEntry, BindGroupLayoutEntry, Handle, ShaderStages};

    fn standard() -> BindGroupLayoutRecord {
        BindGroupLayoutRecord::new(BindGroupLayoutDescriptor::standard()).unwrap()
    }

    #[test]
    fn test_layout_rejects_duplicate_types() {
        let descriptor = BindGroupLayoutDescriptor::new(vec![
            BindGroupLayoutEntry::new(0, BindingType::Texture),
            BindGroupLayoutEntry::new(1, BindingType::Texture),
        ]);
        assert!(BindGroupLayoutRecord::new(descriptor).is_err());
    }

    #[test]
    fn test_layout_rejects_invisible_binding() {
        let descriptor = BindGroupLayoutDescriptor::new(vec![
            BindGroupLayoutEntry::new(0, BindingType::Sampler).with_visibility(ShaderStages::empty()),
        ]);
        assert!(BindGroupLayoutRecord::new(descriptor).is_err());
    }

    #[test]
    fn test_entries_must_match_layout() {
        let layout = standard();
        let layout_handle = BindGroupLayoutHandle::from_raw(1);

        let ok = BindGroupDescriptor::new(
            layout_handle,
            vec![BindGroupEntry::texture(1, TextureHandle::from_raw(3))],
        );
        assert!(validate_entries(&layout, &ok).is_ok());

        let wrong_type = BindGroupDescriptor::new(
            layout_handle,
            vec![BindGroupEntry::sampler(1, SamplerHandle::from_raw(1))],
        );
        assert!(validate_entries(&layout, &wrong_type).is_err());

        let unknown = BindGroupDescriptor::new(
            layout_handle,
            vec![BindGroupEntry::texture(9, TextureHandle::from_raw(3))],
        );
        assert!(validate_entries(&layout, &unknown).is_err());
    }

    #[test]
    fn test_uniform_range() {
        assert_eq!(uniform_range(0, 64, 64).unwrap(), 64);
        assert_eq!(uniform_range(256, 0, 512).unwrap(), 256);
        assert!(uniform_range(16, 16, 512).is_err());
        assert!(uniform_range(256, 512, 512).is_err());
        assert!(uniform_range(512, 0, 512).is_err());
    }

    #[test]
    fn test_fallback_constant_buffer() {
        let mut heap = CpuDescriptorHeap::new(HeapKind::View, 4);
        let cbv = heap.allocate(Descriptor::Null).unwrap();
        let fallback = BufferHandle::from_raw(1);
        let space = BindSpace::new(fallback, cbv);

        let group = BindGroupRecord {
            layout: BindGroupLayoutHandle::from_raw(1),
            cbv: None,
            srv: None,
            sampler: None,
            buffer: None,
            texture: None,
            sampler_handle: None,
        };
        assert_eq!(space.constant_buffer(&group), (fallback, cbv));
    }
}
