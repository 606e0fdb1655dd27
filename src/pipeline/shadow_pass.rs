//! Cascaded shadow map rendering
//!
//! One depth-only rendering scope per cascade, each targeting its own layer
//! of the shadow map array. The vertex shader picks the cascade's matrix
//! from the global uniforms by the pushed index.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::backend::*;
use crate::pipeline::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Reversed-Z, so bias pushes depth towards 0 (away from the light)
pub const SHADOW_DEPTH_BIAS_CONSTANT: f32 = -1.25;
pub const SHADOW_DEPTH_BIAS_SLOPE: f32 = -1.75;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowPush {
    pub model: Mat4,
    pub cascade: u32,
    pub _pad: [u32; 3],
}

pub struct ShadowPass {
    shadow_map: ResourceId,
    cascade_count: u32,
    pipeline: Option<PassPipeline>,
}

impl ShadowPass {
    pub fn new(shadow_map: ResourceId, cascade_count: u32) -> Self {
        Self {
            shadow_map,
            cascade_count,
            pipeline: None,
        }
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "shadow"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.shadow_map, ResourceUsage::DepthStencilWrite);
    }

    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()> {
        let vs = ctx.shaders.get(&mut *ctx.backend, "shadow.vert")?;
        let sets = [ctx.layouts.global];
        let push = [push_range::<ShadowPush>(ShaderStageFlags::VERTEX)];

        self.pipeline = Some(PassPipeline::create(ctx, &sets, &push, |b| {
            b.label("shadow")
                .vertex_shader(vs)
                .vertex_input(Vertex::layout())
                .color_blend_attachments(0, false)
                .color_formats(&[])
                .depth_format(DEPTH_FORMAT)
                .depth_bias(SHADOW_DEPTH_BIAS_CONSTANT, 0.0, SHADOW_DEPTH_BIAS_SLOPE)
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
        let extent = ctx.extent(self.shadow_map)?;

        for cascade in 0..self.cascade_count {
            let layer = ctx.layer_view(self.shadow_map, cascade)?;
            ctx.cmd.cmd_begin_rendering(&RenderingInfo {
                label: Some("shadow_cascade"),
                extent,
                color_attachments: Vec::new(),
                depth_attachment: Some(clear_depth_attachment(layer)),
            });
            set_viewport_scissor(ctx.cmd, extent);
            pipeline.bind(ctx, None);
            draw_meshes_depth_only(ctx.cmd, &pipeline, ctx.draws, cascade);
            ctx.cmd.cmd_end_rendering();
        }
        Ok(())
    }
}

/// Shadow casters need no material, so set 2 is never bound.
fn draw_meshes_depth_only(
    cmd: &mut dyn CommandRecorder,
    pipeline: &PassPipeline,
    draws: &[crate::scene::DrawCall],
    cascade: u32,
) {
    for draw in draws {
        cmd.cmd_bind_vertex_buffer(draw.vertex_buffer, 0);
        cmd.cmd_bind_index_buffer(draw.index_buffer, 0);
        pipeline.push(
            cmd,
            ShaderStageFlags::VERTEX,
            &ShadowPush {
                model: draw.model,
                cascade,
                _pad: [0; 3],
            },
        );
        cmd.cmd_draw_indexed(0..draw.index_count, 0, 0..1);
    }
}
