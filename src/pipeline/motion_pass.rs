//! Motion vectors
//!
//! Reprojects every pixel's world position (from depth) through the
//! previous frame's unjittered view-projection and writes the screen-space
//! delta in UV units. Background pixels get zero velocity.

use crate::backend::*;
use crate::pipeline::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

pub struct MotionPass {
    depth: ResourceId,
    velocity: ResourceId,
    pipeline: Option<PassPipeline>,
}

impl MotionPass {
    pub fn new(depth: ResourceId, velocity: ResourceId) -> Self {
        Self {
            depth,
            velocity,
            pipeline: None,
        }
    }
}

impl RenderPass for MotionPass {
    fn name(&self) -> &str {
        "motion"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.sample(self.depth, SamplerKind::Point);
        ctx.write(self.velocity, ResourceUsage::RenderTarget);
    }

    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()> {
        let vs = ctx.shaders.get(&mut *ctx.backend, "fullscreen.vert")?;
        let fs = ctx.shaders.get(&mut *ctx.backend, "motion.frag")?;
        let format = ctx.format_of(self.velocity)?;
        let sets = ctx.layouts.pipeline_sets(ctx.input_layout_or_empty());

        self.pipeline = Some(PassPipeline::create(ctx, &sets, &[], |b| {
            b.label("motion")
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
        let view = ctx.view(self.velocity)?;
        let extent = ctx.extent(self.velocity)?;
        let input_set = ctx.input_set()?;

        ctx.cmd.cmd_begin_rendering(&RenderingInfo {
            label: Some("motion"),
            extent,
            color_attachments: vec![clear_color_attachment(view, [0.0; 4])],
            depth_attachment: None,
        });
        set_viewport_scissor(ctx.cmd, extent);
        pipeline.bind(ctx, Some(input_set));
        draw_fullscreen(ctx.cmd);
        ctx.cmd.cmd_end_rendering();
        Ok(())
    }
}
