//! FXAA on the LDR buffer, written straight into the swapchain image

use bytemuck::{Pod, Zeroable};

use super::FULLSCREEN_VERTEX_SHADER;
use crate::backend::*;
use crate::pipeline::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FxaaPush {
    /// xy = 1 / extent, z = 1 when the output encodes sRGB
    pub inv_extent: [f32; 4],
}

impl FxaaPush {
    pub fn new(extent: Extent2D, srgb_output: bool) -> Self {
        Self {
            inv_extent: [
                1.0 / extent.width.max(1) as f32,
                1.0 / extent.height.max(1) as f32,
                srgb_output as u32 as f32,
                0.0,
            ],
        }
    }
}

pub struct FxaaPass {
    input: ResourceId,
    output: ResourceId,
    srgb_output: bool,
    pipeline: Option<PassPipeline>,
}

impl FxaaPass {
    pub fn new(input: ResourceId, output: ResourceId) -> Self {
        Self {
            input,
            output,
            srgb_output: false,
            pipeline: None,
        }
    }
}

impl RenderPass for FxaaPass {
    fn name(&self) -> &str {
        "fxaa"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.sample(self.input, SamplerKind::Linear);
        ctx.write(self.output, ResourceUsage::RenderTarget);
    }

    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()> {
        let vs = ctx.shaders.get(&mut *ctx.backend, FULLSCREEN_VERTEX_SHADER)?;
        let fs = ctx.shaders.get(&mut *ctx.backend, "fxaa.frag")?;
        let format = ctx.format_of(self.output)?;
        self.srgb_output = format.is_srgb();
        let sets = ctx.layouts.pipeline_sets(ctx.input_layout_or_empty());
        let push = [push_range::<FxaaPush>(ShaderStageFlags::FRAGMENT)];

        self.pipeline = Some(PassPipeline::create(ctx, &sets, &push, |b| {
            b.label("fxaa")
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
        let push = FxaaPush::new(ctx.extent(self.output)?, self.srgb_output);
        record_fullscreen(ctx, &pipeline, "fxaa", self.output, &push)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_extent() {
        let push = FxaaPush::new(Extent2D::new(800, 400), true);
        assert_eq!(push.inv_extent, [1.0 / 800.0, 1.0 / 400.0, 1.0, 0.0]);
        let degenerate = FxaaPush::new(Extent2D::new(0, 0), false);
        assert_eq!(degenerate.inv_extent[0], 1.0);
    }
}
