//! Renderer configuration.
//!
//! Sizes of the descriptor heaps, the per-frame upload rings and the number
//! of frames in flight are fixed at initialization. They can be set in code
//! through the builder methods or loaded from a TOML file:
//!
//! ```toml
//! backend = "software"
//! frame_count = 2
//! upload_ring_size = 4194304
//! ```
//!
//! Missing keys keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::backend::BackendKind;
use crate::error::RhiError;

/// Default number of frames in flight.
pub const DEFAULT_FRAME_COUNT: u32 = 3;

/// Default per-frame upload ring size (8 MiB).
pub const DEFAULT_UPLOAD_RING_SIZE: u64 = 8 * 1024 * 1024;

/// Alignment of constant buffer views and upload placements.
pub const DEFAULT_UPLOAD_ALIGNMENT: u64 = 256;

/// Renderer initialization parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Backend to create.
    pub backend: BackendKind,
    /// Number of frames in flight (and swapchain images).
    pub frame_count: u32,
    /// Capacity of the permanent CPU heap for buffer and texture views.
    pub cpu_view_heap_capacity: u32,
    /// Capacity of the permanent CPU heap for samplers.
    pub cpu_sampler_heap_capacity: u32,
    /// Capacity of the permanent CPU heap for depth-stencil views.
    pub dsv_heap_capacity: u32,
    /// Capacity of the permanent CPU heap for render-target views of
    /// off-screen color textures and of each swapchain's back buffers.
    pub rtv_heap_capacity: u32,
    /// Shader-visible view descriptors available to one frame.
    pub gpu_view_descriptors_per_frame: u32,
    /// Shader-visible sampler descriptors available to one frame.
    pub gpu_sampler_descriptors_per_frame: u32,
    /// Size of each frame's upload ring in bytes.
    pub upload_ring_size: u64,
    /// Alignment applied to every buffer upload placement.
    pub upload_alignment: u64,
    /// Upper bound on a single fence wait before it is reported as a hang.
    pub fence_timeout_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            frame_count: DEFAULT_FRAME_COUNT,
            cpu_view_heap_capacity: 2048,
            cpu_sampler_heap_capacity: 256,
            dsv_heap_capacity: 256,
            rtv_heap_capacity: 256,
            gpu_view_descriptors_per_frame: 1024,
            gpu_sampler_descriptors_per_frame: 64,
            upload_ring_size: DEFAULT_UPLOAD_RING_SIZE,
            upload_alignment: DEFAULT_UPLOAD_ALIGNMENT,
            fence_timeout_ms: 10_000,
        }
    }
}

impl RendererConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, RhiError> {
        let config: Self = toml::from_str(text).map_err(|e| RhiError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RhiError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RhiError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
            .map_err(|e| RhiError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Check that every size is usable.
    pub fn validate(&self) -> Result<(), RhiError> {
        if self.frame_count == 0 {
            return Err(RhiError::Config("frame_count must be at least 1".into()));
        }
        if self.upload_ring_size == 0 {
            return Err(RhiError::Config("upload_ring_size must be non-zero".into()));
        }
        if !self.upload_alignment.is_power_of_two() {
            return Err(RhiError::Config(format!(
                "upload_alignment must be a power of two, got {}",
                self.upload_alignment
            )));
        }
        let heaps = [
            ("cpu_view_heap_capacity", self.cpu_view_heap_capacity),
            ("cpu_sampler_heap_capacity", self.cpu_sampler_heap_capacity),
            ("dsv_heap_capacity", self.dsv_heap_capacity),
            ("rtv_heap_capacity", self.rtv_heap_capacity),
            (
                "gpu_view_descriptors_per_frame",
                self.gpu_view_descriptors_per_frame,
            ),
            (
                "gpu_sampler_descriptors_per_frame",
                self.gpu_sampler_descriptors_per_frame,
            ),
        ];
        if let Some((name, _)) = heaps.iter().find(|(_, capacity)| *capacity == 0) {
            return Err(RhiError::Config(format!("{name} must be non-zero")));
        }
        Ok(())
    }

    /// Fence wait timeout as a [`Duration`].
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the number of frames in flight.
    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count;
        self
    }

    /// Set the per-frame upload ring size.
    pub fn with_upload_ring_size(mut self, size: u64) -> Self {
        self.upload_ring_size = size;
        self
    }

    /// Set the permanent view heap capacity.
    pub fn with_cpu_view_heap_capacity(mut self, capacity: u32) -> Self {
        self.cpu_view_heap_capacity = capacity;
        self
    }

    /// Set the per-frame shader-visible descriptor capacities.
    pub fn with_gpu_descriptors_per_frame(mut self, views: u32, samplers: u32) -> Self {
        self.gpu_view_descriptors_per_frame = views;
        self.gpu_sampler_descriptors_per_frame = samplers;
        self
    }

    /// Set the fence wait timeout.
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.frame_count, 3);
        assert_eq!(config.cpu_view_heap_capacity, 2048);
        assert_eq!(config.gpu_view_descriptors_per_frame, 1024);
        assert_eq!(config.gpu_sampler_descriptors_per_frame, 64);
        assert_eq!(config.upload_ring_size, 8 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RendererConfig::from_toml_str("frame_count = 2\nupload_ring_size = 4096\n")
            .expect("valid config");
        assert_eq!(config.frame_count, 2);
        assert_eq!(config.upload_ring_size, 4096);
        assert_eq!(config.cpu_sampler_heap_capacity, 256);
        assert_eq!(config.backend, BackendKind::Software);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RendererConfig::from_toml_str("frames = 2").unwrap_err();
        assert!(matches!(err, RhiError::Config(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(RendererConfig::from_toml_str("frame_count = 0").is_err());
        assert!(RendererConfig::from_toml_str("upload_alignment = 100").is_err());
        assert!(
            RendererConfig::new()
                .with_gpu_descriptors_per_frame(0, 8)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_backend_from_toml() {
        let config = RendererConfig::from_toml_str("backend = \"wgpu\"").expect("valid config");
        assert_eq!(config.backend, BackendKind::Wgpu);
    }
}
