//! Sampler types and descriptors.

/// Texel filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest texel.
    #[default]
    Nearest,
    /// Bilinear interpolation between the four nearest texels.
    Linear,
}

/// How texture coordinates outside `[0, 1]` are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Tile the texture.
    Repeat,
    /// Tile the texture, mirroring every other repetition.
    MirrorRepeat,
    /// Clamp to the edge texel.
    #[default]
    ClampToEdge,
}

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDescriptor {
    /// Debug label for the sampler.
    pub label: Option<String>,
    /// Address mode for U coordinate.
    pub address_mode_u: AddressMode,
    /// Address mode for V coordinate.
    pub address_mode_v: AddressMode,
    /// Address mode for W coordinate.
    pub address_mode_w: AddressMode,
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Mipmap filter.
    pub mipmap_filter: FilterMode,
    /// Minimum LOD clamp.
    pub lod_min_clamp: f32,
    /// Maximum LOD clamp.
    pub lod_max_clamp: f32,
}

impl SamplerDescriptor {
    /// Create a new sampler descriptor with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a linear filtering sampler.
    pub fn linear() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            ..Default::default()
        }
    }

    /// Create a nearest neighbor filtering sampler.
    pub fn nearest() -> Self {
        Self {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set address mode for all coordinates.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_mode_u = mode;
        self.address_mode_v = mode;
        self.address_mode_w = mode;
        self
    }
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let linear = SamplerDescriptor::linear();
        assert_eq!(linear.min_filter, FilterMode::Linear);
        assert_eq!(linear.mipmap_filter, FilterMode::Linear);
        assert_eq!(linear.address_mode_u, AddressMode::ClampToEdge);

        let tiled = SamplerDescriptor::nearest()
            .with_address_mode(AddressMode::Repeat)
            .with_label("tiles");
        assert_eq!(tiled.mag_filter, FilterMode::Nearest);
        assert_eq!(
            [tiled.address_mode_u, tiled.address_mode_v, tiled.address_mode_w],
            [AddressMode::Repeat; 3]
        );
        assert_eq!(tiled.label.as_deref(), Some("tiles"));
        assert_eq!(tiled.lod_max_clamp, SamplerDescriptor::default().lod_max_clamp);
    }
}
