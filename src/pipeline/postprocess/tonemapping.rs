//! Tonemapping post-processing
//!
//! Maps HDR (or TAA-resolved) color to display range, applies exposure and
//! writes LDR. Debug views bypass lighting and show raw G-buffer channels,
//! so the G-buffer is bound here too.
//!
//! Input set bindings: 0 source color, 1 albedo, 2 normal, 3 depth.

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};

use super::FULLSCREEN_VERTEX_SHADER;
use crate::backend::*;
use crate::pipeline::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Tonemapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    Uncharted2,
    /// Clamp only
    None,
}

impl TonemapOperator {
    pub fn as_raw(self) -> u32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::Uncharted2 => 2,
            TonemapOperator::None => 3,
        }
    }
}

impl fmt::Display for TonemapOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TonemapOperator::Reinhard => "reinhard",
            TonemapOperator::Aces => "aces",
            TonemapOperator::Uncharted2 => "uncharted2",
            TonemapOperator::None => "none",
        };
        f.write_str(name)
    }
}

impl FromStr for TonemapOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reinhard" => Ok(TonemapOperator::Reinhard),
            "aces" => Ok(TonemapOperator::Aces),
            "uncharted2" | "uncharted" => Ok(TonemapOperator::Uncharted2),
            "none" | "linear" => Ok(TonemapOperator::None),
            other => Err(format!("unknown tonemap operator '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonemapSettings {
    pub operator: TonemapOperator,
    pub exposure: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            operator: TonemapOperator::Aces,
            exposure: 1.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TonemapPush {
    pub debug_view: u32,
    pub operator: u32,
    pub exposure: f32,
    /// 1 when the output is an sRGB format and the hardware encodes
    pub srgb_output: u32,
}

/// Tonemapping post-processing pass
pub struct TonemappingPass {
    source: ResourceId,
    gbuffer: GBufferTargets,
    output: ResourceId,
    settings: TonemapSettings,
    srgb_output: bool,
    pipeline: Option<PassPipeline>,
}

impl TonemappingPass {
    pub fn new(
        source: ResourceId,
        gbuffer: GBufferTargets,
        output: ResourceId,
        settings: TonemapSettings,
    ) -> Self {
        Self {
            source,
            gbuffer,
            output,
            settings,
            srgb_output: false,
            pipeline: None,
        }
    }

    pub fn settings(&self) -> TonemapSettings {
        self.settings
    }

    fn push_constants(&self, debug_view: DebugView) -> TonemapPush {
        TonemapPush {
            debug_view: debug_view.as_raw(),
            operator: self.settings.operator.as_raw(),
            exposure: self.settings.exposure,
            srgb_output: self.srgb_output as u32,
        }
    }
}

impl RenderPass for TonemappingPass {
    fn name(&self) -> &str {
        "tonemap"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.sample(self.source, SamplerKind::Linear);
        ctx.sample(self.gbuffer.albedo, SamplerKind::Point);
        ctx.sample(self.gbuffer.normal, SamplerKind::Point);
        ctx.sample(self.gbuffer.depth, SamplerKind::Point);
        ctx.write(self.output, ResourceUsage::RenderTarget);
    }

    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()> {
        let vs = ctx.shaders.get(&mut *ctx.backend, FULLSCREEN_VERTEX_SHADER)?;
        let fs = ctx.shaders.get(&mut *ctx.backend, "tonemap.frag")?;
        let format = ctx.format_of(self.output)?;
        self.srgb_output = format.is_srgb();
        let sets = ctx.layouts.pipeline_sets(ctx.input_layout_or_empty());
        let push = [push_range::<TonemapPush>(ShaderStageFlags::FRAGMENT)];

        self.pipeline = Some(PassPipeline::create(ctx, &sets, &push, |b| {
            b.label("tonemap")
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
        let push = self.push_constants(ctx.frame.debug_view);
        record_fullscreen(ctx, &pipeline, "tonemap", self.output, &push)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parsing() {
        assert_eq!("ACES".parse(), Ok(TonemapOperator::Aces));
        assert_eq!("linear".parse(), Ok(TonemapOperator::None));
        assert!("filmic".parse::<TonemapOperator>().is_err());
        assert_eq!(TonemapOperator::default(), TonemapOperator::Aces);
    }

    #[test]
    fn test_push_carries_debug_view() {
        let targets = GBufferTargets {
            albedo: ResourceId(1),
            normal: ResourceId(2),
            depth: ResourceId(3),
        };
        let settings = TonemapSettings {
            operator: TonemapOperator::Reinhard,
            exposure: 2.0,
        };
        let pass = TonemappingPass::new(ResourceId(0), targets, ResourceId(4), settings);
        let push = pass.push_constants(DebugView::Roughness);
        assert_eq!(push.debug_view, DebugView::Roughness.as_raw());
        assert_eq!(push.operator, 0);
        assert_eq!(push.exposure, 2.0);
        assert_eq!(push.srgb_output, 0);
    }
}
