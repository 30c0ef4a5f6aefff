//! # Ember Demos
//!
//! Headless demo scenes for the Ember render hardware interface.
//!
//! ## Available Demos
//!
//! - `textured_quad` - a checkerboard quad drawn by a Clear + Forward graph,
//!   captured to PNG

use ember_rhi::{
    AddressMode, BindGroupDescriptor, BindGroupEntry, BindGroupHandle, BindGroupLayoutDescriptor,
    BufferDescriptor, BufferHandle, BufferUsage, ColorTarget, ExecuteOptions, GraphError,
    GraphicsPipelineDescriptor, IndexFormat, MaterialId, PipelineCache, PipelineHandle,
    PipelineKey, PrimitiveTopology, RenderGraph, RenderPass, Renderer, RendererApi, RhiError,
    SamplerDescriptor, ShaderModuleDescriptor, ShaderStage, SwapchainDescriptor, SwapchainHandle,
    TextureDescriptor, TextureFormat, TextureHandle, TextureUsage, VertexAttribute, VertexFormat,
    VertexLayout,
};

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Clear color of the first pass.
pub const CLEAR_COLOR: [f32; 4] = [0.07, 0.08, 0.12, 1.0];

const QUAD_MATERIAL: MaterialId = MaterialId::new(1);

/// Textured quad shader: texture sample times vertex color times the tint
/// in the constant buffer.
const QUAD_SHADER_WGSL: &str = r#"
struct Constants {
    tint: vec4<f32>,
};

@group(0) @binding(0) var<uniform> constants: Constants;
@group(0) @binding(1) var quad_texture: texture_2d<f32>;
@group(0) @binding(2) var quad_sampler: sampler;

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
    let texel = textureSample(quad_texture, quad_sampler, in.uv);
    return vec4<f32>(texel.rgb * in.color * tint.rgb, texel.a * tint.a);
}
"#;

/// Errors of the demo scenes.
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to write {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("captured {actual} bytes for a {width}x{height} image")]
    Capture { width: u32, height: u32, actual: usize },
}

// === Vertex Data ===

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 3],
    color: [f32; 3],
    uv: [f32; 2],
}

/// A centered quad covering `extent` of clip space in each axis. Corners
/// are tinted so the vertex color interpolation is visible.
fn quad_vertices(extent: f32) -> [QuadVertex; 4] {
    [
        QuadVertex {
            position: [-extent, extent, 0.5],
            color: [1.0, 1.0, 1.0],
            uv: [0.0, 0.0],
        },
        QuadVertex {
            position: [extent, extent, 0.5],
            color: [1.0, 0.9, 0.9],
            uv: [2.0, 0.0],
        },
        QuadVertex {
            position: [extent, -extent, 0.5],
            color: [0.9, 0.9, 1.0],
            uv: [2.0, 2.0],
        },
        QuadVertex {
            position: [-extent, -extent, 0.5],
            color: [0.9, 1.0, 0.9],
            uv: [0.0, 2.0],
        },
    ]
}

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

fn quad_layout() -> VertexLayout {
    VertexLayout::new(std::mem::size_of::<QuadVertex>() as u32)
        .with_attribute(VertexAttribute::new(0, VertexFormat::Float32x3, 0))
        .with_attribute(VertexAttribute::new(1, VertexFormat::Float32x3, 12))
        .with_attribute(VertexAttribute::new(2, VertexFormat::Float32x2, 24))
}

/// RGBA8 checkerboard with `cell`-texel cells.
pub fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    let mut texels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let rgba = if light {
                [235, 235, 235, 255]
            } else {
                [40, 90, 160, 255]
            };
            texels.extend_from_slice(&rgba);
        }
    }
    texels
}

/// Tint of frame `frame`: a slow cycle through warm and cool colors.
pub fn frame_tint(frame: u64) -> [f32; 4] {
    let t = frame as f32 * 0.1;
    [
        0.75 + 0.25 * t.cos(),
        0.75 + 0.25 * (t + 2.1).cos(),
        0.75 + 0.25 * (t + 4.2).cos(),
        1.0,
    ]
}

// === Demo Scene ===

/// The textured quad scene and the graph that draws it.
pub struct TexturedQuad {
    swapchain: SwapchainHandle,
    constants: BufferHandle,
    pipelines: PipelineCache,
    graph: RenderGraph,
    frames: u64,
}

impl TexturedQuad {
    /// Create the scene's resources and its Clear + Forward graph.
    pub fn new(renderer: &mut Renderer, width: u32, height: u32) -> Result<Self, DemoError> {
        let swapchain = renderer.create_swapchain(&SwapchainDescriptor::new(
            width,
            height,
            TextureFormat::Rgba8Unorm,
        ))?;

        let mut pipelines = PipelineCache::new();
        let pipeline = pipelines.get_or_create(
            PipelineKey::new(QUAD_MATERIAL, PrimitiveTopology::TriangleList),
            || create_quad_pipeline(renderer),
        )?;

        let vertices = quad_vertices(0.6);
        let vertex_buffer = renderer.create_buffer(
            &BufferDescriptor::new(
                std::mem::size_of_val(&vertices) as u64,
                BufferUsage::VERTEX,
            )
            .with_label("quad vertices"),
            Some(bytemuck::cast_slice(&vertices)),
        )?;
        let index_buffer = renderer.create_buffer(
            &BufferDescriptor::new(std::mem::size_of_val(&QUAD_INDICES) as u64, BufferUsage::INDEX)
                .with_label("quad indices"),
            Some(bytemuck::cast_slice(&QUAD_INDICES)),
        )?;

        let mut constant_data = [0.0f32; 16];
        constant_data[..4].copy_from_slice(&frame_tint(0));
        let constants = renderer.create_buffer(
            &BufferDescriptor::new(64, BufferUsage::UNIFORM).with_label("quad constants"),
            Some(bytemuck::cast_slice(&constant_data)),
        )?;

        let texture = renderer.create_texture(
            &TextureDescriptor::new_2d(256, 256, TextureFormat::Rgba8Unorm, TextureUsage::TEXTURE_BINDING)
                .with_label("checkerboard"),
            Some(&checkerboard(256, 32)),
        )?;
        let sampler = renderer
            .create_sampler(&SamplerDescriptor::linear().with_address_mode(AddressMode::Repeat))?;
        let layout = renderer.create_bind_group_layout(&BindGroupLayoutDescriptor::standard())?;
        let group = renderer.create_bind_group(&BindGroupDescriptor::new(
            layout,
            vec![
                BindGroupEntry::uniform_buffer(0, constants, 0, 64),
                BindGroupEntry::texture(1, texture),
                BindGroupEntry::sampler(2, sampler),
            ],
        ))?;

        let graph = build_graph(swapchain, pipeline, group, vertex_buffer, index_buffer);
        log::info!("Textured quad scene ready ({width}x{height})");

        Ok(Self {
            swapchain,
            constants,
            pipelines,
            graph,
            frames: 0,
        })
    }

    /// Render one frame and return the back buffer it was drawn into.
    pub fn render_frame(&mut self, renderer: &mut Renderer) -> Result<TextureHandle, DemoError> {
        let target = renderer.current_backbuffer(self.swapchain)?;
        let constants = self.constants;
        let tint = frame_tint(self.frames);
        let mut stage_tint = |api: &mut dyn RendererApi| {
            api.update_buffer(constants, 0, bytemuck::cast_slice(&tint))
        };
        let options = ExecuteOptions {
            pre_record: Some(&mut stage_tint),
            ..Default::default()
        };
        let fence = self.graph.execute_with(renderer, self.swapchain, options)?;
        self.frames += 1;
        log::debug!("frame {} submitted (fence {fence})", self.frames);
        Ok(target)
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Destroy the cached pipelines.
    pub fn release(&mut self, renderer: &mut Renderer) -> Result<(), DemoError> {
        for pipeline in self.pipelines.clear() {
            renderer.destroy_pipeline(pipeline)?;
        }
        Ok(())
    }
}

fn create_quad_pipeline(renderer: &mut Renderer) -> Result<PipelineHandle, RhiError> {
    let vertex = renderer.create_shader_module(
        &ShaderModuleDescriptor::new(ShaderStage::Vertex, QUAD_SHADER_WGSL).with_label("quad vs"),
    )?;
    let fragment = renderer.create_shader_module(
        &ShaderModuleDescriptor::new(ShaderStage::Fragment, QUAD_SHADER_WGSL).with_label("quad fs"),
    )?;
    renderer.create_graphics_pipeline(
        &GraphicsPipelineDescriptor::new(vertex, fragment, quad_layout()).with_label("quad"),
    )
}

fn build_graph(
    swapchain: SwapchainHandle,
    pipeline: PipelineHandle,
    group: BindGroupHandle,
    vertices: BufferHandle,
    indices: BufferHandle,
) -> RenderGraph {
    let mut graph = RenderGraph::new();
    graph.add_pass(
        RenderPass::new("Clear").with_color(ColorTarget::backbuffer(swapchain, CLEAR_COLOR)),
    );
    graph.add_pass(
        RenderPass::new("Forward")
            .with_color(ColorTarget::backbuffer(swapchain, CLEAR_COLOR))
            .with_record(move |pass| {
                pass.set_pipeline(pipeline)?;
                pass.set_bind_group(0, group)?;
                pass.set_vertex_buffer(vertices, 0)?;
                pass.set_index_buffer(indices, 0, IndexFormat::Uint16)?;
                pass.draw_indexed(QUAD_INDICES.len() as u32, 1, 0)
            }),
    );
    graph
}

/// Read back `texture` as an RGBA8 image.
pub fn capture(renderer: &Renderer, texture: TextureHandle) -> Result<image::RgbaImage, DemoError> {
    let size = renderer.texture_descriptor(texture)?.size;
    let pixels = renderer.read_texture(texture)?;
    let actual = pixels.len();
    image::RgbaImage::from_raw(size.width, size.height, pixels).ok_or(DemoError::Capture {
        width: size.width,
        height: size.height,
        actual,
    })
}

/// Write a captured frame to `path` as PNG.
pub fn save_png(image: &image::RgbaImage, path: &str) -> Result<(), DemoError> {
    image.save(path).map_err(|source| DemoError::Image {
        path: path.to_string(),
        source,
    })
}
