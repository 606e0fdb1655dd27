//! Temporal anti-aliasing resolve
//!
//! Blends the jittered HDR frame with the previous resolve, fetched at
//! `uv - velocity` and clamped to the current 3x3 neighborhood. The result
//! lands in the current half of the history pair; the executor swaps the
//! halves every frame.

use bytemuck::{Pod, Zeroable};

use crate::backend::*;
use crate::pipeline::*;
use crate::render_graph::graph::HistoryPair;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TaaPush {
    /// 0 on the first frame after (re)allocation: output the current sample only
    pub history_valid: u32,
    /// Weight of the history sample
    pub feedback: f32,
    pub _pad: [u32; 2],
}

pub struct TaaPass {
    color: ResourceId,
    history: HistoryPair,
    velocity: ResourceId,
    feedback: f32,
    pipeline: Option<PassPipeline>,
}

impl TaaPass {
    pub fn new(color: ResourceId, history: HistoryPair, velocity: ResourceId, feedback: f32) -> Self {
        Self {
            color,
            history,
            velocity,
            feedback: feedback.clamp(0.0, 1.0),
            pipeline: None,
        }
    }

    /// Push constants for a frame
    pub fn push_constants(&self, history_valid: bool) -> TaaPush {
        TaaPush {
            history_valid: history_valid as u32,
            feedback: if history_valid { self.feedback } else { 0.0 },
            _pad: [0; 2],
        }
    }
}

impl RenderPass for TaaPass {
    fn name(&self) -> &str {
        "taa"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.sample(self.color, SamplerKind::Linear);
        ctx.sample(self.history.previous, SamplerKind::Linear);
        ctx.sample(self.velocity, SamplerKind::Point);
        ctx.write(self.history.current, ResourceUsage::RenderTarget);
    }

    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()> {
        let vs = ctx.shaders.get(&mut *ctx.backend, "fullscreen.vert")?;
        let fs = ctx.shaders.get(&mut *ctx.backend, "taa.frag")?;
        let format = ctx.format_of(self.history.current)?;
        let sets = ctx.layouts.pipeline_sets(ctx.input_layout_or_empty());
        let push = [push_range::<TaaPush>(ShaderStageFlags::FRAGMENT)];

        self.pipeline = Some(PassPipeline::create(ctx, &sets, &push, |b| {
            b.label("taa")
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
        let push = self.push_constants(ctx.history_valid);
        record_fullscreen(ctx, &pipeline, "taa", self.history.current, &push)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass() -> TaaPass {
        let history = HistoryPair {
            current: ResourceId(1),
            previous: ResourceId(2),
        };
        TaaPass::new(ResourceId(0), history, ResourceId(3), 0.9)
    }

    #[test]
    fn test_invalid_history_drops_feedback() {
        let push = pass().push_constants(false);
        assert_eq!(push.history_valid, 0);
        assert_eq!(push.feedback, 0.0);
    }

    #[test]
    fn test_valid_history_uses_feedback() {
        let push = pass().push_constants(true);
        assert_eq!(push.history_valid, 1);
        assert!((push.feedback - 0.9).abs() < 1e-6);
        assert_eq!(std::mem::size_of::<TaaPush>(), 16);
    }
}
