//! Single-pass forward shading
//!
//! Draws every mesh straight into the swapchain image with the directional
//! light and all point lights evaluated per fragment.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::backend::*;
use crate::pipeline::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Per-draw constants: model matrix plus the debug view for the fragment stage
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ForwardPush {
    pub model: Mat4,
    pub debug_view: u32,
    pub _pad: [u32; 3],
}

pub struct ForwardPass {
    output: ResourceId,
    depth: ResourceId,
    pipeline: Option<PassPipeline>,
}

impl ForwardPass {
    pub fn new(output: ResourceId, depth: ResourceId) -> Self {
        Self {
            output,
            depth,
            pipeline: None,
        }
    }
}

impl RenderPass for ForwardPass {
    fn name(&self) -> &str {
        "forward"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.output, ResourceUsage::RenderTarget);
        ctx.write(self.depth, ResourceUsage::DepthStencilWrite);
    }

    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()> {
        let vs = ctx.shaders.get(&mut *ctx.backend, "forward.vert")?;
        let fs = ctx.shaders.get(&mut *ctx.backend, "forward.frag")?;
        let color = ctx.format_of(self.output)?;
        let sets = ctx.layouts.pipeline_sets(ctx.input_layout_or_empty());
        let push = [push_range::<ForwardPush>(ShaderStageFlags::VERTEX_FRAGMENT)];

        self.pipeline = Some(PassPipeline::create(ctx, &sets, &push, |b| {
            b.label("forward")
                .vertex_shader(vs)
                .fragment_shader(fs)
                .vertex_input(Vertex::layout())
                .color_formats(&[color])
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
        let color = ctx.view(self.output)?;
        let depth = ctx.view(self.depth)?;
        let extent = ctx.extent(self.output)?;
        let debug_view = ctx.frame.debug_view.as_raw();

        ctx.cmd.cmd_begin_rendering(&RenderingInfo {
            label: Some("forward"),
            extent,
            color_attachments: vec![clear_color_attachment(color, ctx.frame.clear_color)],
            depth_attachment: Some(clear_depth_attachment(depth)),
        });
        set_viewport_scissor(ctx.cmd, extent);
        pipeline.bind(ctx, None);
        draw_meshes(ctx.cmd, &pipeline, ctx.draws, |cmd, draw| {
            pipeline.push(
                cmd,
                ShaderStageFlags::VERTEX_FRAGMENT,
                &ForwardPush {
                    model: draw.model,
                    debug_view,
                    _pad: [0; 3],
                },
            );
        });
        ctx.cmd.cmd_end_rendering();
        Ok(())
    }
}
