//! Fixed-function rasterizer used by the software queue.
//!
//! Positions are read from location 0 in clip space with `w = 1` and mapped
//! to pixels through the viewport with y pointing down. Coverage is sampled
//! at pixel centers with an inclusive edge test, so pixels exactly on a
//! shared edge are written by both triangles. The fragment color is the
//! product of the sampled texture, the vertex color (location 1) and the
//! tint read from the bound constant buffer.

use crate::types::{
    AddressMode, DepthStencilState, Extent2d, FilterMode, IndexFormat, PrimitiveTopology,
    SamplerDescriptor, ScissorRect, VertexLayout, VertexSemantic, Viewport,
};

/// RGBA8 copy of a texture taken before a draw starts writing targets.
pub(super) struct SampledTexture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl SampledTexture {
    fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        let t = &self.rgba[i..i + 4];
        [
            f32::from(t[0]) / 255.0,
            f32::from(t[1]) / 255.0,
            f32::from(t[2]) / 255.0,
            f32::from(t[3]) / 255.0,
        ]
    }

    /// Sample mip 0 with the sampler's magnification filter.
    pub fn sample(&self, sampler: &SamplerDescriptor, uv: [f32; 2]) -> [f32; 4] {
        let (w, h) = (self.width, self.height);
        match sampler.mag_filter {
            FilterMode::Nearest => {
                let x = address((uv[0] * w as f32).floor() as i64, w, sampler.address_mode_u);
                let y = address((uv[1] * h as f32).floor() as i64, h, sampler.address_mode_v);
                self.texel(x, y)
            }
            FilterMode::Linear => {
                let fx = uv[0] * w as f32 - 0.5;
                let fy = uv[1] * h as f32 - 0.5;
                let (x0, y0) = (fx.floor(), fy.floor());
                let (tx, ty) = (fx - x0, fy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let xs = [
                    address(x0, w, sampler.address_mode_u),
                    address(x0 + 1, w, sampler.address_mode_u),
                ];
                let ys = [
                    address(y0, h, sampler.address_mode_v),
                    address(y0 + 1, h, sampler.address_mode_v),
                ];
                let top = lerp4(self.texel(xs[0], ys[0]), self.texel(xs[1], ys[0]), tx);
                let bottom = lerp4(self.texel(xs[0], ys[1]), self.texel(xs[1], ys[1]), tx);
                lerp4(top, bottom, ty)
            }
        }
    }
}

fn address(coord: i64, size: u32, mode: AddressMode) -> u32 {
    let size = i64::from(size);
    let wrapped = match mode {
        AddressMode::Repeat => coord.rem_euclid(size),
        AddressMode::MirrorRepeat => {
            let c = coord.rem_euclid(size * 2);
            if c < size { c } else { size * 2 - 1 - c }
        }
        AddressMode::ClampToEdge => coord.clamp(0, size - 1),
    };
    wrapped as u32
}

fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

/// A color target being written.
pub(super) struct ColorSurface<'a> {
    pub texels: &'a mut [u8],
    pub bgra: bool,
}

/// Targets of the active rendering scope.
pub(super) struct Framebuffer<'a> {
    pub extent: Extent2d,
    pub colors: Vec<ColorSurface<'a>>,
    pub depth: Option<&'a mut [f32]>,
}

/// Fixed state and inputs of one draw.
pub(super) struct DrawState<'a> {
    pub layout: &'a VertexLayout,
    pub topology: PrimitiveTopology,
    pub depth_stencil: Option<DepthStencilState>,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub vertices: &'a [u8],
    pub vertex_offset: u64,
    pub tint: [f32; 4],
    pub texture: Option<&'a SampledTexture>,
    pub sampler: &'a SamplerDescriptor,
}

/// Which vertices a draw reads.
pub(super) enum Indices<'a> {
    Sequential {
        first: u32,
        count: u32,
    },
    Indexed {
        data: &'a [u8],
        offset: u64,
        format: IndexFormat,
        first: u32,
        count: u32,
        base_vertex: i32,
    },
}

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
    color: [f32; 3],
    uv: [f32; 2],
}

struct ClipRect {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

/// Rasterize one draw into `fb`. Returns the number of fragments written.
pub(super) fn draw(
    state: &DrawState<'_>,
    indices: Indices<'_>,
    instance_count: u32,
    fb: &mut Framebuffer<'_>,
) -> Result<u64, String> {
    let ids = resolve_indices(&indices)?;
    let vertices = ids
        .iter()
        .map(|&id| fetch(state, id).map(|v| to_screen(v, &state.viewport)))
        .collect::<Result<Vec<_>, _>>()?;

    let clip = ClipRect {
        x0: i64::from(state.scissor.x).max(0),
        y0: i64::from(state.scissor.y).max(0),
        x1: (i64::from(state.scissor.x) + i64::from(state.scissor.width))
            .min(i64::from(fb.extent.width)),
        y1: (i64::from(state.scissor.y) + i64::from(state.scissor.height))
            .min(i64::from(fb.extent.height)),
    };

    let mut written = 0;
    for _ in 0..instance_count {
        match state.topology {
            PrimitiveTopology::TriangleList => {
                for tri in vertices.chunks_exact(3) {
                    written += triangle(state, &clip, fb, [tri[0], tri[1], tri[2]]);
                }
            }
            PrimitiveTopology::TriangleStrip => {
                for i in 0..vertices.len().saturating_sub(2) {
                    let (a, b) = if i % 2 == 0 { (i, i + 1) } else { (i + 1, i) };
                    let tri = [vertices[a], vertices[b], vertices[i + 2]];
                    written += triangle(state, &clip, fb, tri);
                }
            }
            PrimitiveTopology::LineList => {
                for pair in vertices.chunks_exact(2) {
                    written += line(state, &clip, fb, pair[0], pair[1]);
                }
            }
        }
    }
    Ok(written)
}

fn resolve_indices(indices: &Indices<'_>) -> Result<Vec<u32>, String> {
    match *indices {
        Indices::Sequential { first, count } => Ok((first..first + count).collect()),
        Indices::Indexed {
            data,
            offset,
            format,
            first,
            count,
            base_vertex,
        } => {
            let size = format.size() as usize;
            (first..first + count)
                .map(|i| {
                    let start = offset as usize + i as usize * size;
                    let bytes = data
                        .get(start..start + size)
                        .ok_or_else(|| format!("index {i} reads past the index buffer"))?;
                    let index = match format {
                        IndexFormat::Uint16 => {
                            i64::from(bytemuck::pod_read_unaligned::<u16>(bytes))
                        }
                        IndexFormat::Uint32 => {
                            i64::from(bytemuck::pod_read_unaligned::<u32>(bytes))
                        }
                    };
                    u32::try_from(index + i64::from(base_vertex))
                        .map_err(|_| format!("index {i} with base vertex {base_vertex} is negative"))
                })
                .collect()
        }
    }
}

struct Vertex {
    position: [f32; 4],
    color: [f32; 3],
    uv: [f32; 2],
}

fn fetch(state: &DrawState<'_>, index: u32) -> Result<Vertex, String> {
    let base = state.vertex_offset + u64::from(index) * u64::from(state.layout.stride);
    let mut vertex = Vertex {
        position: [0.0, 0.0, 0.0, 1.0],
        color: [1.0; 3],
        uv: [0.0; 2],
    };
    for attribute in &state.layout.attributes {
        let start = (base + u64::from(attribute.offset)) as usize;
        let bytes = state
            .vertices
            .get(start..start + attribute.format.size() as usize)
            .ok_or_else(|| {
                format!(
                    "vertex {index} location {} reads past the vertex buffer",
                    attribute.location
                )
            })?;
        let mut values = [0.0f32; 4];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = bytemuck::pod_read_unaligned(chunk);
        }
        let n = attribute.format.components();
        match attribute.semantic() {
            VertexSemantic::Position => vertex.position[..n].copy_from_slice(&values[..n]),
            VertexSemantic::Color => vertex.color = [values[0], values[1], values[2]],
            VertexSemantic::TexCoord if attribute.location == 2 => {
                vertex.uv = [values[0], values[1]];
            }
            VertexSemantic::TexCoord => {}
        }
    }
    Ok(vertex)
}

fn to_screen(vertex: Vertex, viewport: &Viewport) -> ScreenVertex {
    let [x, y, z, w] = vertex.position;
    let w = if w == 0.0 { 1.0 } else { w };
    let (x, y, z) = (x / w, y / w, z / w);
    ScreenVertex {
        x: viewport.x + (x + 1.0) * 0.5 * viewport.width,
        y: viewport.y + (1.0 - y) * 0.5 * viewport.height,
        z: viewport.min_depth + z * (viewport.max_depth - viewport.min_depth),
        color: vertex.color,
        uv: vertex.uv,
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

fn triangle(
    state: &DrawState<'_>,
    clip: &ClipRect,
    fb: &mut Framebuffer<'_>,
    v: [ScreenVertex; 3],
) -> u64 {
    let area = edge(&v[0], &v[1], v[2].x, v[2].y);
    if area == 0.0 {
        return 0;
    }

    let min_x = v.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let max_x = v.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = v.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_y = v.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
    let x0 = (min_x.floor() as i64).max(clip.x0);
    let x1 = (max_x.ceil() as i64).min(clip.x1);
    let y0 = (min_y.floor() as i64).max(clip.y0);
    let y1 = (max_y.ceil() as i64).min(clip.y1);

    let mut written = 0;
    for y in y0..y1 {
        for x in x0..x1 {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(&v[1], &v[2], px, py);
            let w1 = edge(&v[2], &v[0], px, py);
            let w2 = edge(&v[0], &v[1], px, py);
            let inside = if area > 0.0 {
                w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0
            } else {
                w0 <= 0.0 && w1 <= 0.0 && w2 <= 0.0
            };
            if inside {
                let b = [w0 / area, w1 / area, w2 / area];
                if shade(state, fb, x as u32, y as u32, interpolate(&v, b)) {
                    written += 1;
                }
            }
        }
    }
    written
}

fn line(
    state: &DrawState<'_>,
    clip: &ClipRect,
    fb: &mut Framebuffer<'_>,
    a: ScreenVertex,
    b: ScreenVertex,
) -> u64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as u32;
    let mut written = 0;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let p = interpolate(&[a, b, b], [1.0 - t, t, 0.0]);
        let (x, y) = (p.x.floor() as i64, p.y.floor() as i64);
        if x < clip.x0 || x >= clip.x1 || y < clip.y0 || y >= clip.y1 {
            continue;
        }
        if shade(state, fb, x as u32, y as u32, p) {
            written += 1;
        }
    }
    written
}

fn interpolate(v: &[ScreenVertex; 3], b: [f32; 3]) -> ScreenVertex {
    let mix = |f: fn(&ScreenVertex) -> f32| b[0] * f(&v[0]) + b[1] * f(&v[1]) + b[2] * f(&v[2]);
    ScreenVertex {
        x: mix(|p| p.x),
        y: mix(|p| p.y),
        z: mix(|p| p.z),
        color: [mix(|p| p.color[0]), mix(|p| p.color[1]), mix(|p| p.color[2])],
        uv: [mix(|p| p.uv[0]), mix(|p| p.uv[1])],
    }
}

fn shade(state: &DrawState<'_>, fb: &mut Framebuffer<'_>, x: u32, y: u32, f: ScreenVertex) -> bool {
    if f.z < state.viewport.min_depth || f.z > state.viewport.max_depth {
        return false;
    }
    let pixel = (y * fb.extent.width + x) as usize;

    if let (Some(ds), Some(depth)) = (state.depth_stencil, fb.depth.as_deref_mut()) {
        if ds.depth_test && !ds.compare.passes(f.z, depth[pixel]) {
            return false;
        }
        if ds.depth_write {
            depth[pixel] = f.z;
        }
    }

    let texel = state
        .texture
        .map_or([1.0; 4], |texture| texture.sample(state.sampler, f.uv));
    let rgba = [
        texel[0] * f.color[0] * state.tint[0],
        texel[1] * f.color[1] * state.tint[1],
        texel[2] * f.color[2] * state.tint[2],
        texel[3] * state.tint[3],
    ];
    for surface in &mut fb.colors {
        write_color(surface, pixel, rgba);
    }
    true
}

/// Store a color in a target's channel order.
pub(super) fn write_color(surface: &mut ColorSurface<'_>, pixel: usize, rgba: [f32; 4]) {
    let to_unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    let [r, g, b, a] = rgba.map(to_unorm);
    let texel = &mut surface.texels[pixel * 4..pixel * 4 + 4];
    if surface.bgra {
        texel.copy_from_slice(&[b, g, r, a]);
    } else {
        texel.copy_from_slice(&[r, g, b, a]);
    }
}
