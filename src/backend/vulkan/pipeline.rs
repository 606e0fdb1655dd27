//! Shader modules, pipeline layouts and dynamic-rendering graphics pipelines

use std::ffi::CString;
use std::io::Cursor;
use std::path::Path;

use ash::vk;

use super::{convert, map_vk, VulkanBackend};
use crate::backend::traits::*;
use crate::backend::types::*;

impl VulkanBackend {
    pub(super) fn load_shader(&mut self, path: &Path) -> BackendResult<ShaderModuleHandle> {
        let fail = |reason: String| BackendError::ShaderCreationFailed {
            path: path.display().to_string(),
            reason,
        };
        let bytes = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| fail(e.to_string()))?;
        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { self.ctx.device.create_shader_module(&info, None) }
            .map_err(|e| fail(e.to_string()))?;
        log::debug!("Loaded shader {}", path.display());
        Ok(ShaderModuleHandle(self.res.shaders.insert(module)))
    }

    pub(super) fn make_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        let layouts = set_layouts
            .iter()
            .map(|l| {
                self.res
                    .set_layouts
                    .lookup(l.0, "descriptor set layout")
                    .copied()
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let ranges: Vec<vk::PushConstantRange> = push_constants
            .iter()
            .map(|r| vk::PushConstantRange {
                stage_flags: convert::shader_stages(r.stages),
                offset: r.offset,
                size: r.size,
            })
            .collect();
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&layouts)
            .push_constant_ranges(&ranges);
        let layout = unsafe { self.ctx.device.create_pipeline_layout(&info, None) }
            .map_err(map_vk(BackendError::PipelineCreationFailed))?;
        Ok(PipelineLayoutHandle(self.res.pipeline_layouts.insert(layout)))
    }

    pub(super) fn make_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let label = desc.label.as_deref().unwrap_or("pipeline");
        let fail = |reason: String| {
            BackendError::PipelineCreationFailed(format!("{}: {}", label, reason))
        };
        let layout = *self.res.pipeline_layouts.lookup(desc.layout.0, "pipeline layout")?;

        let entry_points = desc
            .stages
            .iter()
            .map(|s| CString::new(s.entry_point.as_str()).map_err(|e| fail(e.to_string())))
            .collect::<BackendResult<Vec<_>>>()?;
        let mut stages = Vec::with_capacity(desc.stages.len());
        for (stage, entry) in desc.stages.iter().zip(&entry_points) {
            let module = *self.res.shaders.lookup(stage.module.0, "shader module")?;
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(convert::shader_stage(stage.stage))
                    .module(module)
                    .name(entry),
            );
        }

        let bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_layouts
            .iter()
            .map(|l| vk::VertexInputBindingDescription {
                binding: l.binding,
                stride: l.array_stride as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_layouts
            .iter()
            .flat_map(|l| {
                l.attributes.iter().map(|a| vk::VertexInputAttributeDescription {
                    location: a.location,
                    binding: l.binding,
                    format: convert::vertex_format(a.format),
                    offset: a.offset as u32,
                })
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert::topology(desc.topology));
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_bias = desc.dynamic_states.contains(&DynamicState::DepthBias);
        let bias = desc.depth_bias.unwrap_or(DepthBias {
            constant_factor: 0.0,
            clamp: 0.0,
            slope_factor: 0.0,
        });
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(convert::polygon_mode(desc.polygon_mode))
            .cull_mode(convert::cull_mode(desc.cull_mode))
            .front_face(convert::front_face(desc.front_face))
            .line_width(desc.line_width)
            .depth_bias_enable(desc.depth_bias.is_some() || dynamic_bias)
            .depth_bias_constant_factor(bias.constant_factor)
            .depth_bias_clamp(bias.clamp)
            .depth_bias_slope_factor(bias.slope_factor);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(convert::sample_count(desc.sample_count));
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth.test_enabled)
            .depth_write_enable(desc.depth.write_enabled)
            .depth_compare_op(convert::compare_op(desc.depth.compare));

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..desc
            .color_formats
            .len())
            .map(|i| {
                let target = desc.color_targets.get(i).copied().unwrap_or_default();
                let blend = target.blend.unwrap_or(BlendState {
                    color: BlendComponent::default(),
                    alpha: BlendComponent::default(),
                });
                vk::PipelineColorBlendAttachmentState {
                    blend_enable: target.blend.is_some().into(),
                    src_color_blend_factor: convert::blend_factor(blend.color.src_factor),
                    dst_color_blend_factor: convert::blend_factor(blend.color.dst_factor),
                    color_blend_op: convert::blend_op(blend.color.operation),
                    src_alpha_blend_factor: convert::blend_factor(blend.alpha.src_factor),
                    dst_alpha_blend_factor: convert::blend_factor(blend.alpha.dst_factor),
                    alpha_blend_op: convert::blend_op(blend.alpha.operation),
                    color_write_mask: convert::color_writes(target.write_mask),
                }
            })
            .collect();
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states: Vec<vk::DynamicState> = desc
            .dynamic_states
            .iter()
            .map(|&s| convert::dynamic_state(s))
            .collect();
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats: Vec<vk::Format> = desc
            .color_formats
            .iter()
            .map(|&f| convert::format(f))
            .collect();
        let depth_format = desc.depth_format.map(convert::format).unwrap_or(vk::Format::UNDEFINED);
        let stencil_format = match desc.depth_format {
            Some(f) if f.has_stencil() => convert::format(f),
            _ => vk::Format::UNDEFINED,
        };
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .push_next(&mut rendering);

        let pipelines = unsafe {
            self.ctx
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| fail(e.to_string()))?;
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| fail("no pipeline returned".into()))?;

        log::debug!("Created pipeline '{}'", label);
        Ok(PipelineHandle(self.res.pipelines.insert(pipeline)))
    }
}
