//! G-Buffer generation pass for deferred rendering
//!
//! Renders geometry to multiple render targets:
//! - Albedo (RGBA8): base color in rgb, metallic in alpha
//! - Normal (RGBA16F): world-space normal in rgb, roughness in alpha
//! - Depth (D32, reversed-Z)

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::backend::*;
use crate::pipeline::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Targets written by the G-buffer pass and read by everything after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferTargets {
    pub albedo: ResourceId,
    pub normal: ResourceId,
    pub depth: ResourceId,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ModelPush {
    pub model: Mat4,
}

/// G-Buffer generation pass for deferred rendering
pub struct GBufferPass {
    targets: GBufferTargets,
    pipeline: Option<PassPipeline>,
}

impl GBufferPass {
    pub fn new(targets: GBufferTargets) -> Self {
        Self {
            targets,
            pipeline: None,
        }
    }

    pub fn targets(&self) -> GBufferTargets {
        self.targets
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "gbuffer"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.targets.albedo, ResourceUsage::RenderTarget);
        ctx.write(self.targets.normal, ResourceUsage::RenderTarget);
        ctx.write(self.targets.depth, ResourceUsage::DepthStencilWrite);
    }

    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()> {
        let vs = ctx.shaders.get(&mut *ctx.backend, "gbuffer.vert")?;
        let fs = ctx.shaders.get(&mut *ctx.backend, "gbuffer.frag")?;
        let formats = [
            ctx.format_of(self.targets.albedo)?,
            ctx.format_of(self.targets.normal)?,
        ];
        let sets = ctx.layouts.pipeline_sets(ctx.input_layout_or_empty());
        let push = [push_range::<ModelPush>(ShaderStageFlags::VERTEX)];

        self.pipeline = Some(PassPipeline::create(ctx, &sets, &push, |b| {
            b.label("gbuffer")
                .vertex_shader(vs)
                .fragment_shader(fs)
                .vertex_input(Vertex::layout())
                .color_formats(&formats)
                .depth_format(DEPTH_FORMAT)
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
        let albedo = ctx.view(self.targets.albedo)?;
        let normal = ctx.view(self.targets.normal)?;
        let depth = ctx.view(self.targets.depth)?;
        let extent = ctx.extent(self.targets.albedo)?;

        ctx.cmd.cmd_begin_rendering(&RenderingInfo {
            label: Some("gbuffer"),
            extent,
            color_attachments: vec![
                clear_color_attachment(albedo, [0.0; 4]),
                // Default roughness 0.5 where nothing is drawn
                clear_color_attachment(normal, [0.0, 0.0, 0.0, 0.5]),
            ],
            depth_attachment: Some(clear_depth_attachment(depth)),
        });
        set_viewport_scissor(ctx.cmd, extent);
        pipeline.bind(ctx, None);
        draw_meshes(ctx.cmd, &pipeline, ctx.draws, |cmd, draw| {
            pipeline.push(cmd, ShaderStageFlags::VERTEX, &ModelPush { model: draw.model });
        });
        ctx.cmd.cmd_end_rendering();
        Ok(())
    }
}
