//! Table records for buffers, textures and samplers.

use crate::backend::{GpuBuffer, GpuSampler, GpuTexture};
use crate::commands::{Barrier, BarrierResource, Command, CommandList};
use crate::descriptors::CpuDescriptor;
use crate::types::{BufferUsage, SamplerDescriptor, TextureDescriptor};

use super::ResourceState;

/// A buffer owned by the resource table.
#[derive(Debug)]
pub struct BufferRecord {
    pub native: GpuBuffer,
    pub size: u64,
    pub usage: BufferUsage,
    pub label: Option<String>,
    /// State the buffer will be in when the next recorded command runs.
    pub state: ResourceState,
}

impl BufferRecord {
    /// Record a transition to `after` unless the buffer is already there.
    /// Returns true if a barrier was recorded.
    pub fn transition(&mut self, list: &mut CommandList, after: ResourceState) -> bool {
        if self.state == after {
            return false;
        }
        list.push(Command::Barrier(Barrier {
            resource: BarrierResource::Buffer(self.native.clone()),
            before: self.state,
            after,
        }));
        self.state = after;
        true
    }
}

/// Who owns a texture's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureOwner {
    /// Created and destroyed by the caller.
    User,
    /// A swapchain back buffer.
    Swapchain,
    /// The swapchain's depth buffer.
    DepthBuffer,
}

/// A texture owned by the resource table.
#[derive(Debug)]
pub struct TextureRecord {
    pub native: GpuTexture,
    pub descriptor: TextureDescriptor,
    pub state: ResourceState,
    pub owner: TextureOwner,
    /// Shader-resource view in the permanent view heap.
    pub srv: Option<CpuDescriptor>,
    /// Render-target view, in the renderer's heap or the swapchain's.
    pub rtv: Option<CpuDescriptor>,
    /// Depth-stencil view in the permanent depth heap.
    pub dsv: Option<CpuDescriptor>,
}

impl TextureRecord {
    /// Record a transition to `after` unless the texture is already there.
    /// Returns true if a barrier was recorded.
    pub fn transition(&mut self, list: &mut CommandList, after: ResourceState) -> bool {
        if self.state == after {
            return false;
        }
        list.push(Command::Barrier(Barrier {
            resource: BarrierResource::Texture(self.native.clone()),
            before: self.state,
            after,
        }));
        self.state = after;
        true
    }
}

/// A sampler owned by the resource table.
#[derive(Debug)]
pub struct SamplerRecord {
    pub native: GpuSampler,
    pub descriptor: SamplerDescriptor,
    pub view: CpuDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software;

    #[test]
    fn test_transition_is_lazy() {
        let mut list = CommandList::new();
        list.reset();
        let mut record = BufferRecord {
            native: software::test_buffer(64),
            size: 64,
            usage: BufferUsage::VERTEX,
            label: None,
            state: ResourceState::Common,
        };

        assert!(record.transition(&mut list, ResourceState::CopyDest));
        assert!(!record.transition(&mut list, ResourceState::CopyDest));
        assert!(record.transition(&mut list, ResourceState::VertexAndConstant));
        assert_eq!(list.len(), 2);

        let Command::Barrier(barrier) = &list.commands()[1] else {
            panic!("expected a barrier");
        };
        assert_eq!(barrier.before, ResourceState::CopyDest);
        assert_eq!(barrier.after, ResourceState::VertexAndConstant);
    }
}
