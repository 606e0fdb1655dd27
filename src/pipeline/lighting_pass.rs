//! Deferred lighting pass
//!
//! Fullscreen pass that reconstructs world position from depth and the
//! inverse view-projection, then evaluates the directional light and every
//! uploaded point light with a Cook-Torrance BRDF. Output is HDR.
//!
//! Input set (set 1) bindings, in declaration order:
//! 0. albedo/metallic
//! 1. normal/roughness
//! 2. depth
//! 3. shadow map array (only when shadows are enabled)

use bytemuck::{Pod, Zeroable};

use crate::backend::*;
use crate::pipeline::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightingPush {
    pub debug_view: u32,
    pub shadows_enabled: u32,
    pub cascade_count: u32,
    pub _pad: u32,
}

/// Deferred lighting pass
pub struct LightingPass {
    gbuffer: GBufferTargets,
    shadow_map: Option<ResourceId>,
    hdr_output: ResourceId,
    cascade_count: u32,
    pipeline: Option<PassPipeline>,
}

impl LightingPass {
    pub fn new(
        gbuffer: GBufferTargets,
        shadow_map: Option<ResourceId>,
        hdr_output: ResourceId,
        cascade_count: u32,
    ) -> Self {
        Self {
            gbuffer,
            shadow_map,
            hdr_output,
            cascade_count,
            pipeline: None,
        }
    }

    pub fn hdr_output(&self) -> ResourceId {
        self.hdr_output
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "lighting"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.sample(self.gbuffer.albedo, SamplerKind::Point);
        ctx.sample(self.gbuffer.normal, SamplerKind::Point);
        ctx.sample(self.gbuffer.depth, SamplerKind::Point);
        if let Some(shadow_map) = self.shadow_map {
            ctx.sample(shadow_map, SamplerKind::ShadowCompare);
        }
        ctx.write(self.hdr_output, ResourceUsage::RenderTarget);
    }

    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()> {
        let vs = ctx.shaders.get(&mut *ctx.backend, "fullscreen.vert")?;
        let fs = ctx.shaders.get(&mut *ctx.backend, "lighting.frag")?;
        let format = ctx.format_of(self.hdr_output)?;
        let sets = ctx.layouts.pipeline_sets(ctx.input_layout_or_empty());
        let push = [push_range::<LightingPush>(ShaderStageFlags::FRAGMENT)];

        self.pipeline = Some(PassPipeline::create(ctx, &sets, &push, |b| {
            b.label("lighting")
                .vertex_shader(vs)
                .fragment_shader(fs)
                .cull_mode(CullMode::None)
                .no_depth()
                .color_formats(&[format])
        })?);
        Ok(())
    }

    fn destroy_pipelines(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(backend);
        }
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let pipeline = require_pipeline(self.pipeline, self.name())?;
        let view = ctx.view(self.hdr_output)?;
        let extent = ctx.extent(self.hdr_output)?;
        let input_set = ctx.input_set()?;
        let has_shadows = self.shadow_map.is_some();

        // Background pixels (depth == far) keep the clear color.
        ctx.cmd.cmd_begin_rendering(&RenderingInfo {
            label: Some("lighting"),
            extent,
            color_attachments: vec![clear_color_attachment(view, ctx.frame.clear_color)],
            depth_attachment: None,
        });
        set_viewport_scissor(ctx.cmd, extent);
        pipeline.bind(ctx, Some(input_set));
        pipeline.push(
            ctx.cmd,
            ShaderStageFlags::FRAGMENT,
            &LightingPush {
                debug_view: ctx.frame.debug_view.effective(has_shadows).as_raw(),
                shadows_enabled: has_shadows as u32,
                cascade_count: if has_shadows { self.cascade_count } else { 0 },
                _pad: 0,
            },
        );
        draw_fullscreen(ctx.cmd);
        ctx.cmd.cmd_end_rendering();
        Ok(())
    }
}
