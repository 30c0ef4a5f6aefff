//! Common utilities for renderer integration tests.
//!
//! This module provides shared test infrastructure: a context that owns a
//! renderer on the requested backend, and builders for the textured quad
//! scene most tests draw.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ember_rhi::backend::software::{SoftwareBackend, SoftwareQueueControl};
use ember_rhi::{
    AddressMode, BackendKind, BindGroupDescriptor, BindGroupEntry, BindGroupHandle,
    BindGroupLayoutDescriptor, BufferDescriptor, BufferHandle, BufferUsage, Capabilities,
    GraphicsPipelineDescriptor, PipelineHandle, Renderer, RendererConfig, SamplerDescriptor,
    ShaderModuleDescriptor, ShaderStage, SwapchainDescriptor, SwapchainHandle, TextureDescriptor,
    TextureFormat, TextureHandle, TextureUsage, VertexAttribute, VertexFormat, VertexLayout,
};

/// Shader used by every textured draw: texture sample times vertex color
/// times a tint read from the constant buffer.
pub const TEXTURED_WGSL: &str = r#"
struct Constants {
    tint: vec4<f32>,
};

@group(0) @binding(0) var<uniform> constants: Constants;
@group(0) @binding(1) var color_texture: texture_2d<f32>;
@group(0) @binding(2) var color_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) color: vec3<f32>,
    @location(2) uv: vec2<f32>,
) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 1.0);
    out.color = color;
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var tint = constants.tint;
    if all(tint == vec4<f32>(0.0)) {
        tint = vec4<f32>(1.0);
    }
    let texel = textureSample(color_texture, color_sampler, in.uv);
    return vec4<f32>(texel.rgb * in.color * tint.rgb, texel.a * tint.a);
}
"#;

/// Bytes per interleaved quad vertex: position, color, uv.
pub const VERTEX_STRIDE: u32 = 32;

/// Clear color of the first pass in the textured quad scene.
pub const CLEAR: [f32; 4] = [0.07, 0.08, 0.12, 1.0];

/// Tint stored in the scene's constant buffer.
pub const TINT: [f32; 4] = [1.0, 0.5, 0.25, 1.0];

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// CPU backend with a validation layer.
    Software,
    /// wgpu on the first available adapter.
    Wgpu,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Software => true,
            Backend::Wgpu => cfg!(feature = "wgpu-backend"),
        }
    }
}

/// Install the test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context owning a renderer and, for the software backend, the queue
/// control used to pause the GPU and inspect validation results.
pub struct TestContext {
    pub backend: Backend,
    pub renderer: Renderer,
    pub control: Option<SoftwareQueueControl>,
}

impl TestContext {
    /// Create a context for `backend` with the default configuration.
    ///
    /// Returns `None` if the backend is not available.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_config(backend, test_config())
    }

    /// Create a context with a custom configuration.
    pub fn with_config(backend: Backend, config: RendererConfig) -> Option<Self> {
        init_logging();
        if !backend.is_available() {
            return None;
        }
        match backend {
            Backend::Software => {
                let software = SoftwareBackend::new().ok()?;
                let control = software.control();
                let renderer = Renderer::with_backend(Arc::new(software), config).ok()?;
                Some(Self {
                    backend,
                    renderer,
                    control: Some(control),
                })
            }
            Backend::Wgpu => {
                let renderer = Renderer::new(config.with_backend(BackendKind::Wgpu)).ok()?;
                Some(Self {
                    backend,
                    renderer,
                    control: None,
                })
            }
        }
    }

    /// Software context whose backend reports only `capabilities`.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        init_logging();
        let software =
            SoftwareBackend::with_capabilities(capabilities).expect("software backend");
        let control = software.control();
        let renderer =
            Renderer::with_backend(Arc::new(software), test_config()).expect("renderer");
        Self {
            backend: Backend::Software,
            renderer,
            control: Some(control),
        }
    }

    /// Software queue control. Panics for other backends.
    pub fn control(&self) -> &SoftwareQueueControl {
        self.control
            .as_ref()
            .expect("queue control is only available on the software backend")
    }

    /// Assert the software validation layer saw no errors.
    pub fn assert_no_validation_errors(&self) {
        if let Some(control) = &self.control {
            let errors = control.take_validation_errors();
            assert!(errors.is_empty(), "validation errors: {errors:#?}");
        }
    }
}

/// Configuration used by most tests: small heaps and rings, short fence
/// timeout so a hung queue fails fast.
pub fn test_config() -> RendererConfig {
    RendererConfig::default()
        .with_frame_count(2)
        .with_upload_ring_size(1024 * 1024)
        .with_fence_timeout(Duration::from_secs(5))
}

// ============================================================================
// Scene Helpers
// ============================================================================

/// A quad with position, white vertex color and uv per vertex, spanning
/// `[x0, x1] x [y0, y1]` in clip space.
pub fn quad_vertices(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<u8> {
    let corners: [([f32; 3], [f32; 2]); 4] = [
        ([x0, y1, 0.5], [0.0, 0.0]),
        ([x1, y1, 0.5], [1.0, 0.0]),
        ([x1, y0, 0.5], [1.0, 1.0]),
        ([x0, y0, 0.5], [0.0, 1.0]),
    ];
    let mut floats = Vec::with_capacity(4 * 8);
    for (position, uv) in corners {
        floats.extend_from_slice(&position);
        floats.extend_from_slice(&[1.0, 1.0, 1.0]);
        floats.extend_from_slice(&uv);
    }
    bytemuck::cast_slice(&floats).to_vec()
}

/// Two triangles over the four quad corners.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Interleaved position/color/uv layout.
pub fn quad_layout() -> VertexLayout {
    VertexLayout::new(VERTEX_STRIDE)
        .with_attribute(VertexAttribute::new(0, VertexFormat::Float32x3, 0))
        .with_attribute(VertexAttribute::new(1, VertexFormat::Float32x3, 12))
        .with_attribute(VertexAttribute::new(2, VertexFormat::Float32x2, 24))
}

/// RGBA8 checkerboard: white cells where `(cx + cy)` is even, black
/// elsewhere.
pub fn checker_rgba(size: u32, cell: u32) -> Vec<u8> {
    let mut texels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let white = ((x / cell) + (y / cell)) % 2 == 0;
            let v = if white { 255 } else { 0 };
            texels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    texels
}

/// Handles of the textured quad scene.
#[derive(Debug, Clone, Copy)]
pub struct QuadScene {
    pub swapchain: SwapchainHandle,
    pub pipeline: PipelineHandle,
    pub group: BindGroupHandle,
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
    pub constants: BufferHandle,
    pub texture: TextureHandle,
}

/// Build the textured quad scene: a 128x128 RGBA swapchain, a full-screen
/// quad, a 256x256 checker with 32-texel cells sampled with repeat/linear
/// and a 64-byte constant buffer holding [`TINT`].
pub fn build_quad_scene(renderer: &mut Renderer) -> QuadScene {
    let swapchain = renderer
        .create_swapchain(&SwapchainDescriptor::new(128, 128, TextureFormat::Rgba8Unorm))
        .expect("swapchain");

    let vertex = renderer
        .create_shader_module(
            &ShaderModuleDescriptor::new(ShaderStage::Vertex, TEXTURED_WGSL).with_label("quad vs"),
        )
        .expect("vertex shader");
    let fragment = renderer
        .create_shader_module(
            &ShaderModuleDescriptor::new(ShaderStage::Fragment, TEXTURED_WGSL)
                .with_label("quad fs"),
        )
        .expect("fragment shader");
    let pipeline = renderer
        .create_graphics_pipeline(
            &GraphicsPipelineDescriptor::new(vertex, fragment, quad_layout()).with_label("quad"),
        )
        .expect("pipeline");

    let vertex_data = quad_vertices(-1.0, -1.0, 1.0, 1.0);
    let vertices = renderer
        .create_buffer(
            &BufferDescriptor::new(vertex_data.len() as u64, BufferUsage::VERTEX)
                .with_label("quad vertices"),
            Some(&vertex_data),
        )
        .expect("vertex buffer");
    let indices = renderer
        .create_buffer(
            &BufferDescriptor::new(12, BufferUsage::INDEX).with_label("quad indices"),
            Some(bytemuck::cast_slice(&QUAD_INDICES)),
        )
        .expect("index buffer");

    let mut constant_data = [0.0f32; 16];
    constant_data[..4].copy_from_slice(&TINT);
    let constants = renderer
        .create_buffer(
            &BufferDescriptor::new(64, BufferUsage::UNIFORM).with_label("quad constants"),
            Some(bytemuck::cast_slice(&constant_data)),
        )
        .expect("constant buffer");

    let texture = renderer
        .create_texture(
            &TextureDescriptor::new_2d(
                256,
                256,
                TextureFormat::Rgba8Unorm,
                TextureUsage::TEXTURE_BINDING,
            )
            .with_label("checker"),
            Some(&checker_rgba(256, 32)),
        )
        .expect("texture");
    let sampler = renderer
        .create_sampler(&SamplerDescriptor::linear().with_address_mode(AddressMode::Repeat))
        .expect("sampler");

    let layout = renderer
        .create_bind_group_layout(&BindGroupLayoutDescriptor::standard())
        .expect("layout");
    let group = renderer
        .create_bind_group(&BindGroupDescriptor::new(
            layout,
            vec![
                BindGroupEntry::uniform_buffer(0, constants, 0, 64),
                BindGroupEntry::texture(1, texture),
                BindGroupEntry::sampler(2, sampler),
            ],
        ))
        .expect("bind group");

    QuadScene {
        swapchain,
        pipeline,
        group,
        vertices,
        indices,
        constants,
        texture,
    }
}

// ============================================================================
// Pixel Helpers
// ============================================================================

/// RGBA of pixel `(x, y)` in a tightly packed RGBA8 image.
pub fn get_pixel(data: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let i = ((y * width + x) * 4) as usize;
    [data[i], data[i + 1], data[i + 2], data[i + 3]]
}

/// Assert a pixel matches within `tolerance` per channel.
pub fn assert_pixel(data: &[u8], width: u32, x: u32, y: u32, expected: [u8; 4], tolerance: u8) {
    let actual = get_pixel(data, width, x, y);
    let close = actual
        .iter()
        .zip(expected)
        .all(|(&a, e)| a.abs_diff(e) <= tolerance);
    assert!(
        close,
        "pixel ({x}, {y}) is {actual:?}, expected {expected:?} +-{tolerance}"
    );
}

/// Clear color as stored in an RGBA8 target.
pub fn clear_rgba8(clear: [f32; 4]) -> [u8; 4] {
    clear.map(|c| (c * 255.0).round() as u8)
}
