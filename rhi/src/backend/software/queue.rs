//! Software queue thread and command executor.

use std::sync::Arc;

use parking_lot::MutexGuard;

use super::raster::{self, ColorSurface, DrawState, Framebuffer, Indices, SampledTexture};
use super::{Shared, SoftBuffer, SoftPipeline, SoftTexture, SoftTextureInner, Texels};
use crate::commands::{
    Barrier, BarrierResource, Command, DescriptorTables, LoadOp, ResolvedColorAttachment,
    ResolvedDepthAttachment,
};
use crate::descriptors::Descriptor;
use crate::resources::ResourceState;
use crate::types::{
    Extent2d, IndexFormat, SamplerDescriptor, ScissorRect, TextureFormat, Viewport,
};

/// Work item consumed by the queue thread, in submission order.
pub(super) enum QueueItem {
    Execute(Vec<Command>),
    Signal(u64),
    Present {
        texture: Arc<SoftTexture>,
        image_index: u32,
    },
}

/// Queue thread body. Returns once every sender is gone.
pub(super) fn run(receiver: flume::Receiver<QueueItem>, shared: Arc<Shared>) {
    while let Ok(item) = receiver.recv() {
        shared.wait_while_paused();
        match item {
            QueueItem::Execute(commands) => Executor::new(&shared).execute(commands),
            QueueItem::Signal(value) => {
                log::trace!("software queue: fence -> {value}");
                shared.complete(value);
            }
            QueueItem::Present {
                texture,
                image_index,
            } => {
                let state = texture.state();
                if state != ResourceState::Present {
                    shared.report(format!(
                        "presenting image {image_index} in {state} state, expected present"
                    ));
                }
                shared.presented.lock().push(image_index);
                shared.stats.lock().presents += 1;
            }
        }
    }
    log::debug!("software queue stopped");
}

enum DrawKind {
    Sequential {
        first: u32,
        count: u32,
    },
    Indexed {
        first: u32,
        count: u32,
        base_vertex: i32,
    },
}

struct Targets {
    color: Vec<Arc<SoftTexture>>,
    depth: Option<Arc<SoftTexture>>,
    extent: Extent2d,
}

#[derive(Default)]
struct BoundTables {
    constants: Option<(Arc<SoftBuffer>, u64, u64)>,
    texture: Option<Arc<SoftTexture>>,
    sampler: Option<SamplerDescriptor>,
}

/// Executes one command list.
struct Executor<'a> {
    shared: &'a Shared,
    touched: Vec<Arc<SoftBuffer>>,
    targets: Option<Targets>,
    viewport: Viewport,
    scissor: ScissorRect,
    pipeline: Option<Arc<SoftPipeline>>,
    tables: BoundTables,
    vertex_buffer: Option<(Arc<SoftBuffer>, u64)>,
    index_buffer: Option<(Arc<SoftBuffer>, u64, IndexFormat)>,
}

impl<'a> Executor<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            touched: Vec::new(),
            targets: None,
            viewport: Viewport::default(),
            scissor: ScissorRect::default(),
            pipeline: None,
            tables: BoundTables::default(),
            vertex_buffer: None,
            index_buffer: None,
        }
    }

    fn execute(mut self, commands: Vec<Command>) {
        let count = commands.len() as u64;
        for command in commands {
            log::trace!("software queue: {}", command.name());
            self.command(command);
        }
        if self.targets.is_some() {
            self.shared
                .report("command list ended inside a rendering scope".to_string());
        }
        // Buffers decay to common once the list retires.
        for buffer in &self.touched {
            if buffer.state() != ResourceState::GenericRead {
                buffer.set_state(ResourceState::Common);
            }
        }
        let mut stats = self.shared.stats.lock();
        stats.command_lists += 1;
        stats.commands += count;
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::Barrier(barrier) => self.barrier(barrier),
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let (Some(src), Some(dst)) = (src.as_software(), dst.as_software()) else {
                    return self.report("copy with a foreign buffer");
                };
                self.copy_buffer(src, src_offset, dst, dst_offset, size);
            }
            Command::CopyBufferToTexture {
                src,
                src_offset,
                row_pitch,
                dst,
                extent,
            } => {
                let (Some(src), Some(dst)) = (src.as_software(), dst.as_software()) else {
                    return self.report("copy with a foreign resource");
                };
                self.copy_to_texture(src, src_offset, row_pitch, dst, extent);
            }
            Command::BeginRendering {
                color,
                depth,
                extent,
            } => self.begin_rendering(color, depth, extent),
            Command::EndRendering => {
                if self.targets.take().is_none() {
                    self.report("end-rendering without begin-rendering");
                }
            }
            Command::SetViewport(viewport) => self.viewport = viewport,
            Command::SetScissor(scissor) => self.scissor = scissor,
            Command::SetPipeline(pipeline) => match pipeline.as_software() {
                Some(pipeline) => self.pipeline = Some(Arc::clone(pipeline)),
                None => self.report("foreign pipeline"),
            },
            Command::SetDescriptorTables(tables) => self.set_tables(&tables),
            Command::SetVertexBuffer { buffer, offset } => {
                let Some(buffer) = buffer.as_software() else {
                    return self.report("foreign vertex buffer");
                };
                self.expect_buffer(buffer, "vertex buffer", ResourceState::VertexAndConstant);
                self.vertex_buffer = Some((Arc::clone(buffer), offset));
            }
            Command::SetIndexBuffer {
                buffer,
                offset,
                format,
            } => {
                let Some(buffer) = buffer.as_software() else {
                    return self.report("foreign index buffer");
                };
                self.expect_buffer(buffer, "index buffer", ResourceState::Index);
                self.index_buffer = Some((Arc::clone(buffer), offset, format));
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                ..
            } => self.draw(
                DrawKind::Sequential {
                    first: first_vertex,
                    count: vertex_count,
                },
                instance_count,
            ),
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                ..
            } => self.draw(
                DrawKind::Indexed {
                    first: first_index,
                    count: index_count,
                    base_vertex,
                },
                instance_count,
            ),
        }
    }

    fn report(&self, message: impl Into<String>) {
        self.shared.report(message.into());
    }

    fn touch(&mut self, buffer: &Arc<SoftBuffer>) {
        if !self.touched.iter().any(|b| Arc::ptr_eq(b, buffer)) {
            self.touched.push(Arc::clone(buffer));
        }
    }

    fn expect_buffer(&mut self, buffer: &Arc<SoftBuffer>, what: &str, expected: ResourceState) {
        self.touch(buffer);
        let actual = buffer.state();
        if actual != expected {
            self.report(format!(
                "{what} {:?} used in {actual} state, expected {expected}",
                buffer.label()
            ));
        }
    }

    fn expect_texture(&self, texture: &SoftTexture, what: &str, expected: ResourceState) {
        let actual = texture.state();
        if actual != expected {
            self.report(format!(
                "{what} {:?} used in {actual} state, expected {expected}",
                texture.descriptor().label
            ));
        }
    }

    fn barrier(&mut self, barrier: Barrier) {
        self.shared.stats.lock().barriers += 1;
        let (actual, name) = match &barrier.resource {
            BarrierResource::Buffer(buffer) => {
                let Some(buffer) = buffer.as_software() else {
                    return self.report("barrier on a foreign buffer");
                };
                self.touch(buffer);
                let actual = buffer.state();
                buffer.set_state(barrier.after);
                (actual, format!("buffer {:?}", buffer.label()))
            }
            BarrierResource::Texture(texture) => {
                let Some(texture) = texture.as_software() else {
                    return self.report("barrier on a foreign texture");
                };
                let actual = texture.state();
                texture.set_state(barrier.after);
                (actual, format!("texture {:?}", texture.descriptor().label))
            }
        };
        if actual != barrier.before {
            self.report(format!(
                "barrier on {name} declares {} -> {}, but the resource is in {actual} state",
                barrier.before, barrier.after
            ));
        }
    }

    fn copy_buffer(
        &mut self,
        src: &Arc<SoftBuffer>,
        src_offset: u64,
        dst: &Arc<SoftBuffer>,
        dst_offset: u64,
        size: u64,
    ) {
        if src.state() != ResourceState::GenericRead {
            self.expect_buffer(src, "copy source", ResourceState::GenericRead);
        }
        self.expect_buffer(dst, "copy destination", ResourceState::CopyDest);
        let result = src
            .read(src_offset, size)
            .and_then(|bytes| dst.write_bytes(dst_offset, &bytes));
        match result {
            Ok(()) => self.shared.stats.lock().buffer_copies += 1,
            Err(e) => self.report(format!("buffer copy failed: {e}")),
        }
    }

    fn copy_to_texture(
        &mut self,
        src: &Arc<SoftBuffer>,
        src_offset: u64,
        row_pitch: u32,
        dst: &Arc<SoftTexture>,
        extent: Extent2d,
    ) {
        self.expect_texture(dst, "copy destination", ResourceState::CopyDest);
        let desc = dst.descriptor();
        if desc.format.is_depth_stencil() {
            return self.report("buffer-to-texture copies into depth textures are unsupported");
        }
        let row_bytes = (extent.width * desc.format.block_size()) as usize;
        if extent.width > desc.size.width || extent.height > desc.size.height {
            return self.report(format!(
                "texture copy of {}x{} exceeds {}x{}",
                extent.width, extent.height, desc.size.width, desc.size.height
            ));
        }
        if (row_pitch as usize) < row_bytes {
            return self.report(format!("row pitch {row_pitch} is below {row_bytes} bytes"));
        }
        let len = u64::from(row_pitch) * u64::from(extent.height.saturating_sub(1))
            + row_bytes as u64;
        let staged = match src.read(src_offset, len) {
            Ok(bytes) => bytes,
            Err(e) => return self.report(format!("texture copy failed: {e}")),
        };

        let dst_pitch = (desc.size.width * desc.format.block_size()) as usize;
        if let Texels::Color(texels) = &mut dst.inner.lock().texels {
            for row in 0..extent.height as usize {
                let from = row * row_pitch as usize;
                let to = row * dst_pitch;
                texels[to..to + row_bytes].copy_from_slice(&staged[from..from + row_bytes]);
            }
        }
        self.shared.stats.lock().texture_copies += 1;
    }

    fn begin_rendering(
        &mut self,
        color: Vec<ResolvedColorAttachment>,
        depth: Option<ResolvedDepthAttachment>,
        extent: Extent2d,
    ) {
        if self.targets.is_some() {
            self.report("begin-rendering inside a rendering scope");
        }
        let mut targets = Targets {
            color: Vec::with_capacity(color.len()),
            depth: None,
            extent,
        };

        for attachment in color {
            let Some(texture) = attachment.target.as_software() else {
                return self.report("foreign color target");
            };
            if targets.color.iter().any(|t| Arc::ptr_eq(t, texture)) {
                self.report("texture bound as more than one color target");
                continue;
            }
            self.expect_texture(texture, "color target", ResourceState::RenderTarget);
            if attachment.load_op == LoadOp::Clear {
                let rgba = attachment.clear.to_array();
                let bgra = texture.descriptor().format == TextureFormat::Bgra8Unorm;
                let mut inner = texture.inner.lock();
                if let Texels::Color(texels) = &mut inner.texels {
                    let mut surface = ColorSurface { texels, bgra };
                    let pixels = surface.texels.len() / 4;
                    for pixel in 0..pixels {
                        raster::write_color(&mut surface, pixel, rgba);
                    }
                }
            }
            targets.color.push(Arc::clone(texture));
        }

        if let Some(attachment) = depth {
            let Some(texture) = attachment.target.as_software() else {
                return self.report("foreign depth target");
            };
            self.expect_texture(texture, "depth target", ResourceState::DepthWrite);
            if attachment.load_op == LoadOp::Clear {
                if let Texels::Depth(values) = &mut texture.inner.lock().texels {
                    values.fill(attachment.clear_depth);
                }
            }
            targets.depth = Some(Arc::clone(texture));
        }

        for texture in targets.color.iter().chain(targets.depth.iter()) {
            let size = texture.descriptor().size;
            if size != extent {
                self.report(format!(
                    "attachment of {}x{} does not match the render area {}x{}",
                    size.width, size.height, extent.width, extent.height
                ));
            }
        }
        self.targets = Some(targets);
    }

    fn set_tables(&mut self, tables: &DescriptorTables) {
        let mut bound = BoundTables::default();
        match tables.views.read(tables.constant_buffer) {
            Descriptor::ConstantBuffer {
                buffer,
                offset,
                size,
            } => match buffer.as_software() {
                Some(buffer) => {
                    self.expect_buffer(buffer, "constant buffer", ResourceState::VertexAndConstant);
                    bound.constants = Some((Arc::clone(buffer), offset, size));
                }
                None => self.report("foreign constant buffer"),
            },
            Descriptor::Null => {}
            other => self.report(format!("constant buffer slot holds {other:?}")),
        }
        match tables.views.read(tables.shader_resource) {
            Descriptor::ShaderResource(texture) => match texture.as_software() {
                Some(texture) => {
                    self.expect_texture(texture, "sampled texture", ResourceState::ShaderRead);
                    bound.texture = Some(Arc::clone(texture));
                }
                None => self.report("foreign sampled texture"),
            },
            Descriptor::Null => {}
            other => self.report(format!("texture slot holds {other:?}")),
        }
        match tables.samplers.read(tables.sampler) {
            Descriptor::Sampler(sampler) => match sampler.as_software() {
                Some(sampler) => bound.sampler = Some((**sampler).clone()),
                None => self.report("foreign sampler"),
            },
            Descriptor::Null => {}
            other => self.report(format!("sampler slot holds {other:?}")),
        }
        self.tables = bound;
    }

    fn tint(&self) -> [f32; 4] {
        let Some((buffer, offset, size)) = &self.tables.constants else {
            return [1.0; 4];
        };
        let Ok(bytes) = buffer.read(*offset, (*size).min(16)) else {
            return [1.0; 4];
        };
        if bytes.len() < 16 {
            return [1.0; 4];
        }
        let tint: [f32; 4] = std::array::from_fn(|i| {
            bytemuck::pod_read_unaligned(&bytes[i * 4..i * 4 + 4])
        });
        // The zero-filled fallback constant buffer renders untinted.
        if tint == [0.0; 4] { [1.0; 4] } else { tint }
    }

    fn draw(&mut self, kind: DrawKind, instance_count: u32) {
        let Some(pipeline) = self.pipeline.clone() else {
            return self.report("draw without a pipeline");
        };
        let Some((vertex_buffer, vertex_offset)) = self.vertex_buffer.clone() else {
            return self.report("draw without a vertex buffer");
        };
        if self.targets.is_none() {
            return self.report("draw outside a rendering scope");
        }

        // Snapshot every input before locking targets: a texture may be
        // sampled and rendered to by the same draw.
        let vertices = vertex_buffer.snapshot();
        let index_data = self
            .index_buffer
            .as_ref()
            .map(|(buffer, offset, format)| (buffer.snapshot(), *offset, *format));
        let texture = self.tables.texture.as_ref().map(|t| sampled(t));
        let sampler = self.tables.sampler.clone().unwrap_or_default();
        let tint = self.tint();

        let indices = match kind {
            DrawKind::Sequential { first, count } => Indices::Sequential { first, count },
            DrawKind::Indexed {
                first,
                count,
                base_vertex,
            } => {
                let Some((data, offset, format)) = &index_data else {
                    return self.report("indexed draw without an index buffer");
                };
                Indices::Indexed {
                    data,
                    offset: *offset,
                    format: *format,
                    first,
                    count,
                    base_vertex,
                }
            }
        };
        let state = DrawState {
            layout: &pipeline.layout,
            topology: pipeline.topology,
            depth_stencil: pipeline.depth_stencil,
            viewport: self.viewport,
            scissor: self.scissor,
            vertices: &vertices,
            vertex_offset,
            tint,
            texture: texture.as_ref(),
            sampler: &sampler,
        };

        let Some(targets) = &self.targets else {
            return;
        };
        let mut color_guards: Vec<(MutexGuard<'_, SoftTextureInner>, bool)> = targets
            .color
            .iter()
            .map(|t| {
                let bgra = t.descriptor().format == TextureFormat::Bgra8Unorm;
                (t.inner.lock(), bgra)
            })
            .collect();
        let mut depth_guard = targets.depth.as_ref().map(|t| t.inner.lock());

        let colors = color_guards
            .iter_mut()
            .filter_map(|(guard, bgra)| match &mut guard.texels {
                Texels::Color(texels) => Some(ColorSurface {
                    texels: texels.as_mut_slice(),
                    bgra: *bgra,
                }),
                Texels::Depth(_) => None,
            })
            .collect();
        let depth = depth_guard.as_mut().and_then(|guard| match &mut guard.texels {
            Texels::Depth(values) => Some(values.as_mut_slice()),
            Texels::Color(_) => None,
        });
        let mut framebuffer = Framebuffer {
            extent: targets.extent,
            colors,
            depth,
        };

        let result = raster::draw(&state, indices, instance_count, &mut framebuffer);
        drop(framebuffer);
        drop(depth_guard);
        drop(color_guards);
        match result {
            Ok(fragments) => {
                log::trace!("software queue: draw wrote {fragments} fragments");
                self.shared.stats.lock().draws += 1;
            }
            Err(e) => self.report(format!("draw failed: {e}")),
        }
    }
}

/// RGBA8 snapshot of a color texture for sampling.
fn sampled(texture: &SoftTexture) -> SampledTexture {
    let desc = texture.descriptor();
    let inner = texture.inner.lock();
    let mut rgba = match &inner.texels {
        Texels::Color(texels) => texels.clone(),
        Texels::Depth(values) => values
            .iter()
            .flat_map(|&d| {
                let v = (d.clamp(0.0, 1.0) * 255.0).round() as u8;
                [v, v, v, 255]
            })
            .collect(),
    };
    drop(inner);
    if desc.format == TextureFormat::Bgra8Unorm {
        for texel in rgba.chunks_exact_mut(4) {
            texel.swap(0, 2);
        }
    }
    SampledTexture {
        width: desc.size.width,
        height: desc.size.height,
        rgba,
    }
}
