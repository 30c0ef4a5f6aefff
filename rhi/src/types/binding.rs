//! Bind group layout and bind group descriptors.

use bitflags::bitflags;

use super::{BindGroupLayoutHandle, BufferHandle, SamplerHandle, TextureHandle};

/// Kind of resource a layout slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Constant buffer range.
    UniformBuffer,
    /// Sampled texture.
    Texture,
    /// Sampler.
    Sampler,
}

bitflags! {
    /// Shader stages that can see a binding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

impl Default for ShaderStages {
    fn default() -> Self {
        Self::VERTEX_FRAGMENT
    }
}

/// A single slot of a bind group layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutEntry {
    /// Binding index.
    pub binding: u32,
    /// Accepted resource kind.
    pub ty: BindingType,
    /// Stages that read the binding.
    pub visibility: ShaderStages,
}

impl BindGroupLayoutEntry {
    /// Create a layout entry visible to all stages.
    pub fn new(binding: u32, ty: BindingType) -> Self {
        Self {
            binding,
            ty,
            visibility: ShaderStages::VERTEX_FRAGMENT,
        }
    }

    /// Restrict visibility.
    pub fn with_visibility(mut self, visibility: ShaderStages) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Descriptor for a bind group layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BindGroupLayoutDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Layout slots.
    pub entries: Vec<BindGroupLayoutEntry>,
}

impl BindGroupLayoutDescriptor {
    /// Create a layout from entries.
    pub fn new(entries: Vec<BindGroupLayoutEntry>) -> Self {
        Self {
            label: None,
            entries,
        }
    }

    /// The conventional constant buffer + texture + sampler layout.
    pub fn standard() -> Self {
        Self::new(vec![
            BindGroupLayoutEntry::new(0, BindingType::UniformBuffer),
            BindGroupLayoutEntry::new(1, BindingType::Texture)
                .with_visibility(ShaderStages::FRAGMENT),
            BindGroupLayoutEntry::new(2, BindingType::Sampler)
                .with_visibility(ShaderStages::FRAGMENT),
        ])
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Resource bound to a bind group slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingResource {
    /// A constant buffer range. A size of zero binds the rest of the buffer.
    UniformBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    /// A sampled texture.
    Texture(TextureHandle),
    /// A sampler.
    Sampler(SamplerHandle),
}

impl BindingResource {
    /// Binding type this resource satisfies.
    pub fn binding_type(&self) -> BindingType {
        match self {
            Self::UniformBuffer { .. } => BindingType::UniformBuffer,
            Self::Texture(_) => BindingType::Texture,
            Self::Sampler(_) => BindingType::Sampler,
        }
    }
}

/// A concrete binding in a bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupEntry {
    /// Binding index in the layout.
    pub binding: u32,
    /// Bound resource.
    pub resource: BindingResource,
}

impl BindGroupEntry {
    /// Bind a constant buffer range.
    pub fn uniform_buffer(binding: u32, buffer: BufferHandle, offset: u64, size: u64) -> Self {
        Self {
            binding,
            resource: BindingResource::UniformBuffer {
                buffer,
                offset,
                size,
            },
        }
    }

    /// Bind a texture.
    pub fn texture(binding: u32, texture: TextureHandle) -> Self {
        Self {
            binding,
            resource: BindingResource::Texture(texture),
        }
    }

    /// Bind a sampler.
    pub fn sampler(binding: u32, sampler: SamplerHandle) -> Self {
        Self {
            binding,
            resource: BindingResource::Sampler(sampler),
        }
    }
}

/// Descriptor for creating a bind group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindGroupDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Layout the group conforms to.
    pub layout: BindGroupLayoutHandle,
    /// Concrete bindings.
    pub entries: Vec<BindGroupEntry>,
}

impl BindGroupDescriptor {
    /// Create a bind group descriptor.
    pub fn new(layout: BindGroupLayoutHandle, entries: Vec<BindGroupEntry>) -> Self {
        Self {
            label: None,
            layout,
            entries,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
