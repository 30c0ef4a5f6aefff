//! Translation of command lists onto a wgpu command encoder.
//!
//! wgpu forbids copies inside a render pass. A copy recorded between
//! `BeginRendering` and `EndRendering` suspends the pass; the next draw
//! state change reopens it with load ops that keep the attachments, and
//! the bound pipeline, tables and buffers are replayed.

use std::ops::Range;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::commands::{Command, ResolvedColorAttachment, ResolvedDepthAttachment};
use crate::error::RhiError;
use crate::types::{Extent2d, IndexFormat, ScissorRect, Viewport};

use super::conversion::{convert_depth_load_op, convert_index_format, convert_load_op};
use super::{WgpuBackend, WgpuBuffer, WgpuPipeline, WgpuTexture, foreign};

/// Encode `commands` into one command buffer.
pub(super) fn encode(
    backend: &WgpuBackend,
    commands: Vec<Command>,
) -> Result<wgpu::CommandBuffer, RhiError> {
    let mut encoder = ListEncoder::new(backend);
    for command in commands {
        encoder.command(command)?;
    }
    Ok(encoder.finish())
}

struct ColorTarget {
    texture: Arc<WgpuTexture>,
    load: wgpu::LoadOp<wgpu::Color>,
}

struct DepthTarget {
    texture: Arc<WgpuTexture>,
    load: wgpu::LoadOp<f32>,
}

/// Attachments of the open rendering scope.
struct Attachments {
    color: Vec<ColorTarget>,
    depth: Option<DepthTarget>,
    extent: Extent2d,
}

impl Attachments {
    /// Keep contents when the pass is reopened after a copy.
    fn switch_to_load(&mut self) {
        for target in &mut self.color {
            target.load = wgpu::LoadOp::Load;
        }
        if let Some(depth) = &mut self.depth {
            depth.load = wgpu::LoadOp::Load;
        }
    }
}

/// State that must be replayed on every wgpu render pass.
#[derive(Default)]
struct Bound {
    pipeline: Option<Arc<WgpuPipeline>>,
    bind_group: Option<wgpu::BindGroup>,
    vertex: Option<(Arc<WgpuBuffer>, u64)>,
    index: Option<(Arc<WgpuBuffer>, u64, IndexFormat)>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
}

struct ListEncoder<'a> {
    backend: &'a WgpuBackend,
    encoder: wgpu::CommandEncoder,
    pass: Option<wgpu::RenderPass<'static>>,
    attachments: Option<Attachments>,
    bound: Bound,
}

impl<'a> ListEncoder<'a> {
    fn new(backend: &'a WgpuBackend) -> Self {
        let encoder = backend
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ember command list"),
            });
        Self {
            backend,
            encoder,
            pass: None,
            attachments: None,
            bound: Bound::default(),
        }
    }

    fn finish(mut self) -> wgpu::CommandBuffer {
        self.pass = None;
        self.encoder.finish()
    }

    fn command(&mut self, command: Command) -> Result<(), RhiError> {
        match command {
            // wgpu tracks usage transitions itself.
            Command::Barrier(_) => {}
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let src = src.as_wgpu().ok_or_else(|| foreign("copy source"))?;
                let dst = dst.as_wgpu().ok_or_else(|| foreign("copy destination"))?;
                self.suspend_pass();
                self.copy_buffer(src, src_offset, dst, dst_offset, size)?;
            }
            Command::CopyBufferToTexture {
                src,
                src_offset,
                row_pitch,
                dst,
                extent,
            } => {
                let src = src.as_wgpu().ok_or_else(|| foreign("copy source"))?;
                let dst = dst.as_wgpu().ok_or_else(|| foreign("copy destination"))?;
                self.suspend_pass();
                self.copy_buffer_to_texture(src, src_offset, row_pitch, dst, extent)?;
            }
            Command::BeginRendering {
                color,
                depth,
                extent,
            } => self.begin_rendering(color, depth, extent)?,
            Command::EndRendering => {
                self.pass = None;
                self.attachments = None;
            }
            Command::SetViewport(viewport) => {
                self.bound.viewport = Some(viewport);
                if let Some(pass) = self.pass.as_mut() {
                    apply_viewport(pass, &viewport);
                }
            }
            Command::SetScissor(scissor) => {
                self.bound.scissor = Some(scissor);
                if let Some(pass) = self.pass.as_mut()
                    && let Some(attachments) = &self.attachments
                {
                    apply_scissor(pass, &scissor, attachments.extent);
                }
            }
            Command::SetPipeline(pipeline) => {
                let pipeline = pipeline.as_wgpu().ok_or_else(|| foreign("pipeline"))?;
                if let Some(pass) = self.pass.as_mut() {
                    pass.set_pipeline(&pipeline.pipeline);
                }
                self.bound.pipeline = Some(Arc::clone(pipeline));
            }
            Command::SetDescriptorTables(tables) => {
                let group = self.backend.bind_group(&tables);
                if let Some(pass) = self.pass.as_mut() {
                    pass.set_bind_group(0, &group, &[]);
                }
                self.bound.bind_group = Some(group);
            }
            Command::SetVertexBuffer { buffer, offset } => {
                let buffer = buffer.as_wgpu().ok_or_else(|| foreign("vertex buffer"))?;
                if let Some(pass) = self.pass.as_mut() {
                    pass.set_vertex_buffer(0, buffer.buffer.slice(offset..));
                }
                self.bound.vertex = Some((Arc::clone(buffer), offset));
            }
            Command::SetIndexBuffer {
                buffer,
                offset,
                format,
            } => {
                let buffer = buffer.as_wgpu().ok_or_else(|| foreign("index buffer"))?;
                if let Some(pass) = self.pass.as_mut() {
                    pass.set_index_buffer(buffer.buffer.slice(offset..), convert_index_format(format));
                }
                self.bound.index = Some((Arc::clone(buffer), offset, format));
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                let pass = self.render_pass()?;
                pass.draw(
                    span(first_vertex, vertex_count),
                    span(first_instance, instance_count),
                );
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                let pass = self.render_pass()?;
                pass.draw_indexed(
                    span(first_index, index_count),
                    base_vertex,
                    span(first_instance, instance_count),
                );
            }
        }
        Ok(())
    }

    fn begin_rendering(
        &mut self,
        color: Vec<ResolvedColorAttachment>,
        depth: Option<ResolvedDepthAttachment>,
        extent: Extent2d,
    ) -> Result<(), RhiError> {
        let color = color
            .into_iter()
            .map(|attachment| {
                let texture = attachment
                    .target
                    .as_wgpu()
                    .ok_or_else(|| foreign("color attachment"))?;
                Ok(ColorTarget {
                    texture: Arc::clone(texture),
                    load: convert_load_op(attachment.load_op, attachment.clear),
                })
            })
            .collect::<Result<Vec<_>, RhiError>>()?;
        let depth = match depth {
            Some(attachment) => {
                let texture = attachment
                    .target
                    .as_wgpu()
                    .ok_or_else(|| foreign("depth attachment"))?;
                Some(DepthTarget {
                    texture: Arc::clone(texture),
                    load: convert_depth_load_op(attachment.load_op, attachment.clear_depth),
                })
            }
            None => None,
        };
        self.pass = None;
        self.attachments = Some(Attachments {
            color,
            depth,
            extent,
        });
        self.open_pass();
        Ok(())
    }

    /// The open render pass, reopening a suspended one.
    fn render_pass(&mut self) -> Result<&mut wgpu::RenderPass<'static>, RhiError> {
        if self.pass.is_none() {
            if self.attachments.is_none() {
                return Err(RhiError::InvalidOperation(
                    "draw outside a rendering scope".to_string(),
                ));
            }
            self.open_pass();
        }
        self.pass
            .as_mut()
            .ok_or_else(|| RhiError::Backend("render pass could not be opened".to_string()))
    }

    fn open_pass(&mut self) {
        let Some(attachments) = self.attachments.as_mut() else {
            return;
        };
        let color: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = attachments
            .color
            .iter()
            .map(|target| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &target.texture.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: target.load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth = attachments.depth.as_ref().map(|target| {
            let stencil_ops = target
                .texture
                .descriptor
                .format
                .has_stencil()
                .then_some(wgpu::Operations {
                    load: match target.load {
                        wgpu::LoadOp::Load => wgpu::LoadOp::Load,
                        _ => wgpu::LoadOp::Clear(0),
                    },
                    store: wgpu::StoreOp::Store,
                });
            wgpu::RenderPassDepthStencilAttachment {
                view: &target.texture.view,
                depth_ops: Some(wgpu::Operations {
                    load: target.load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops,
            }
        });

        let mut pass = self
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ember rendering"),
                color_attachments: &color,
                depth_stencil_attachment: depth,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            })
            .forget_lifetime();
        let extent = attachments.extent;
        attachments.switch_to_load();

        let bound = &self.bound;
        if let Some(viewport) = &bound.viewport {
            apply_viewport(&mut pass, viewport);
        }
        if let Some(scissor) = &bound.scissor {
            apply_scissor(&mut pass, scissor, extent);
        }
        if let Some(pipeline) = &bound.pipeline {
            pass.set_pipeline(&pipeline.pipeline);
        }
        if let Some(group) = &bound.bind_group {
            pass.set_bind_group(0, group, &[]);
        }
        if let Some((buffer, offset)) = &bound.vertex {
            pass.set_vertex_buffer(0, buffer.buffer.slice(*offset..));
        }
        if let Some((buffer, offset, format)) = &bound.index {
            pass.set_index_buffer(buffer.buffer.slice(*offset..), convert_index_format(*format));
        }
        self.pass = Some(pass);
    }

    fn suspend_pass(&mut self) {
        if self.pass.take().is_some() {
            log::trace!("render pass suspended for a copy");
        }
    }

    fn copy_buffer(
        &mut self,
        src: &WgpuBuffer,
        src_offset: u64,
        dst: &WgpuBuffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), RhiError> {
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        // Padding the size is only safe when the copy ends the buffer.
        let padded = size.next_multiple_of(align);
        if dst_offset % align != 0 || (padded != size && dst_offset + size != dst.size()) {
            return Err(RhiError::InvalidArgument(format!(
                "buffer copy {dst_offset}+{size} is not {align}-byte aligned"
            )));
        }

        if src.is_host_visible() {
            let mut bytes = src.shadow_bytes(src_offset, size)?;
            bytes.resize(padded as usize, 0);
            let staging = self.transient(&bytes);
            self.encoder
                .copy_buffer_to_buffer(&staging, 0, &dst.buffer, dst_offset, padded);
        } else {
            self.encoder.copy_buffer_to_buffer(
                &src.buffer,
                src_offset,
                &dst.buffer,
                dst_offset,
                padded,
            );
        }
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: &WgpuBuffer,
        src_offset: u64,
        row_pitch: u32,
        dst: &WgpuTexture,
        extent: Extent2d,
    ) -> Result<(), RhiError> {
        let row_bytes = u64::from(extent.width) * u64::from(dst.descriptor.format.block_size());
        let footprint = u64::from(row_pitch) * u64::from(extent.height.saturating_sub(1)) + row_bytes;
        let layout_offset;
        let staging;
        let source = if src.is_host_visible() {
            staging = self.transient(&src.shadow_bytes(src_offset, footprint)?);
            layout_offset = 0;
            &staging
        } else {
            layout_offset = src_offset;
            &src.buffer
        };
        self.encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: source,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: layout_offset,
                    bytes_per_row: Some(row_pitch),
                    rows_per_image: Some(extent.height),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Snapshot host-visible bytes into a GPU copy source.
    fn transient(&self, bytes: &[u8]) -> wgpu::Buffer {
        self.backend
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("ember staging snapshot"),
                contents: bytes,
                usage: wgpu::BufferUsages::COPY_SRC,
            })
    }
}

fn span(first: u32, count: u32) -> Range<u32> {
    first..first.saturating_add(count)
}

fn apply_viewport(pass: &mut wgpu::RenderPass<'static>, viewport: &Viewport) {
    pass.set_viewport(
        viewport.x,
        viewport.y,
        viewport.width,
        viewport.height,
        viewport.min_depth,
        viewport.max_depth,
    );
}

/// wgpu rejects scissors outside the target; clip to it.
fn apply_scissor(pass: &mut wgpu::RenderPass<'static>, scissor: &ScissorRect, extent: Extent2d) {
    let x = (scissor.x.max(0) as u32).min(extent.width);
    let y = (scissor.y.max(0) as u32).min(extent.height);
    let width = scissor.width.min(extent.width - x);
    let height = scissor.height.min(extent.height - y);
    pass.set_scissor_rect(x, y, width, height);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span() {
        assert_eq!(span(2, 3), 2..5);
        assert_eq!(span(u32::MAX, 1), u32::MAX..u32::MAX);
    }
}
