//! Shader modules, pipelines, bind group layouts and bind groups.

use crate::backend::PipelineBuildInfo;
use crate::bind_group::{BindGroupLayoutRecord, BindGroupRecord, uniform_range, validate_entries};
use crate::descriptors::Descriptor;
use crate::error::RhiError;
use crate::pipeline::{PipelineRecord, ShaderModuleRecord, validate_pipeline};
use crate::types::{
    BindGroupDescriptor, BindGroupHandle, BindGroupLayoutDescriptor, BindGroupLayoutHandle,
    BindingResource, BufferUsage, GraphicsPipelineDescriptor, PipelineHandle,
    ShaderModuleDescriptor, ShaderModuleHandle, ShaderStage, TextureFormat,
};

use super::Renderer;

impl Renderer {
    /// Create a shader module from compiled bytecode.
    pub fn create_shader_module(
        &mut self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<ShaderModuleHandle, RhiError> {
        self.ensure_alive()?;
        if descriptor.code.is_empty() {
            return Err(RhiError::InvalidArgument(format!(
                "shader module {:?} has no bytecode",
                descriptor.label
            )));
        }
        let native = self.device.backend().create_shader_module(descriptor)?;
        self.shader_modules.insert(ShaderModuleRecord {
            native,
            stage: descriptor.stage,
            label: descriptor.label.clone(),
        })
    }

    /// Destroy a shader module. Pipelines built from it stay valid.
    pub fn destroy_shader_module(&mut self, module: ShaderModuleHandle) -> Result<(), RhiError> {
        self.shader_modules.remove(module)?;
        Ok(())
    }

    fn shader_stage(
        &self,
        module: ShaderModuleHandle,
        stage: ShaderStage,
    ) -> Result<&ShaderModuleRecord, RhiError> {
        let record = self.shader_modules.get(module)?;
        if record.stage != stage {
            return Err(RhiError::InvalidArgument(format!(
                "{module} is a {:?} module, expected {stage:?}",
                record.stage
            )));
        }
        Ok(record)
    }

    /// Create an immutable graphics pipeline.
    ///
    /// A missing color format resolves to the swapchain's format, or
    /// `Rgba8Unorm` without a swapchain. Depth-enabled pipelines render
    /// against the swapchain's depth format, or `Depth32Float`.
    pub fn create_graphics_pipeline(
        &mut self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineHandle, RhiError> {
        self.ensure_alive()?;
        validate_pipeline(descriptor)?;
        let vertex = self.shader_stage(descriptor.vertex_shader, ShaderStage::Vertex)?;
        let fragment = self.shader_stage(descriptor.fragment_shader, ShaderStage::Fragment)?;

        let swapchain = self.single_swapchain();
        let color_format = descriptor
            .color_format
            .or_else(|| swapchain.map(|s| s.format()))
            .unwrap_or(TextureFormat::Rgba8Unorm);
        let depth_format = descriptor.depth_stencil.map(|_| {
            swapchain
                .and_then(|s| s.depth())
                .map(|d| d.format)
                .unwrap_or(TextureFormat::Depth32Float)
        });

        let mut resolved = descriptor.clone();
        resolved.color_format = Some(color_format);
        let native = self.device.backend().create_pipeline(&PipelineBuildInfo {
            descriptor: &resolved,
            vertex: &vertex.native,
            fragment: &fragment.native,
            depth_format,
        })?;

        let handle = self.pipelines.insert(PipelineRecord {
            native,
            topology: descriptor.topology,
            vertex_stride: descriptor.vertex_layout.stride,
            layout: descriptor.vertex_layout.clone(),
            color_format,
            depth: descriptor.depth_stencil,
            label: descriptor.label.clone(),
        })?;
        log::debug!(
            "created {handle} ({:?}, {:?} -> {color_format:?})",
            descriptor.label,
            descriptor.topology
        );
        Ok(handle)
    }

    /// Destroy a pipeline.
    pub fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RhiError> {
        self.pipelines.remove(pipeline)?;
        Ok(())
    }

    /// Create a bind group layout.
    pub fn create_bind_group_layout(
        &mut self,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> Result<BindGroupLayoutHandle, RhiError> {
        self.ensure_alive()?;
        let record = BindGroupLayoutRecord::new(descriptor.clone())?;
        self.bind_space.layouts.insert(record)
    }

    /// Destroy a bind group layout. Groups created from it keep working.
    pub fn destroy_bind_group_layout(
        &mut self,
        layout: BindGroupLayoutHandle,
    ) -> Result<(), RhiError> {
        self.bind_space.layouts.remove(layout)?;
        Ok(())
    }

    /// Create an immutable bind group.
    ///
    /// Every entry is resolved to a permanent CPU descriptor here: constant
    /// buffer ranges get a new view, textures and samplers reuse the views
    /// created with them.
    pub fn create_bind_group(
        &mut self,
        descriptor: &BindGroupDescriptor,
    ) -> Result<BindGroupHandle, RhiError> {
        self.ensure_alive()?;
        validate_entries(self.bind_space.layouts.get(descriptor.layout)?, descriptor)?;

        let mut record = BindGroupRecord {
            layout: descriptor.layout,
            cbv: None,
            srv: None,
            sampler: None,
            buffer: None,
            texture: None,
            sampler_handle: None,
        };
        let mut constants = None;
        for entry in &descriptor.entries {
            match entry.resource {
                BindingResource::UniformBuffer {
                    buffer,
                    offset,
                    size,
                } => {
                    let target = self.buffers.get(buffer)?;
                    if !target.usage.contains(BufferUsage::UNIFORM) {
                        return Err(RhiError::InvalidArgument(format!(
                            "{buffer} was not created with UNIFORM usage"
                        )));
                    }
                    let size = uniform_range(offset, size, target.size)?;
                    constants = Some(Descriptor::ConstantBuffer {
                        buffer: target.native.clone(),
                        offset,
                        size,
                    });
                    record.buffer = Some(buffer);
                }
                BindingResource::Texture(texture) => {
                    let srv = self.textures.get(texture)?.srv.ok_or_else(|| {
                        RhiError::InvalidArgument(format!(
                            "{texture} was not created with TEXTURE_BINDING usage"
                        ))
                    })?;
                    record.srv = Some(srv);
                    record.texture = Some(texture);
                }
                BindingResource::Sampler(sampler) => {
                    record.sampler = Some(self.samplers.get(sampler)?.view);
                    record.sampler_handle = Some(sampler);
                }
            }
        }
        if let Some(view) = constants {
            record.cbv = Some(self.view_heap.allocate(view)?);
        }

        let handle = self.bind_space.groups.insert(record)?;
        log::trace!("created {handle} ({:?})", descriptor.label);
        Ok(handle)
    }

    /// Destroy a bind group, releasing its constant buffer view.
    pub fn destroy_bind_group(&mut self, group: BindGroupHandle) -> Result<(), RhiError> {
        let record = self.bind_space.groups.remove(group)?;
        if let Some(cbv) = record.cbv {
            self.view_heap.write(cbv, Descriptor::Null)?;
        }
        Ok(())
    }
}
