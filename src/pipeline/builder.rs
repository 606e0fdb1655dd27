//! Fluent graphics pipeline construction for dynamic rendering.
//!
//! Defaults: triangle list, filled, back-face culling with counter-clockwise
//! front faces, single sample, depth test + write with the reversed-Z
//! `GreaterEqual` compare, one opaque color attachment, viewport and scissor
//! as dynamic state. `build` consumes the builder.

use crate::backend::{
    BackendError, BackendResult, BlendState, ColorTargetState, CompareFunction, CullMode,
    DepthBias, DepthState, DynamicState, FrontFace, GraphicsBackend, GraphicsPipelineDescriptor,
    PipelineHandle, PipelineLayoutHandle, PipelineShaderStage, PolygonMode, PrimitiveTopology,
    ShaderModuleHandle, ShaderStage, TextureFormat, VertexBufferLayout,
};

/// Collects pipeline state and creates one immutable pipeline
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    desc: GraphicsPipelineDescriptor,
}

impl PipelineBuilder {
    pub fn new(layout: PipelineLayoutHandle) -> Self {
        Self {
            desc: GraphicsPipelineDescriptor {
                label: None,
                layout,
                stages: Vec::new(),
                vertex_layouts: Vec::new(),
                topology: PrimitiveTopology::TriangleList,
                polygon_mode: PolygonMode::Fill,
                cull_mode: CullMode::Back,
                front_face: FrontFace::Ccw,
                line_width: 1.0,
                depth_bias: None,
                sample_count: 1,
                depth: DepthState {
                    test_enabled: true,
                    write_enabled: true,
                    compare: CompareFunction::GreaterEqual,
                },
                color_targets: vec![ColorTargetState::default()],
                dynamic_states: vec![DynamicState::Viewport, DynamicState::Scissor],
                color_formats: Vec::new(),
                depth_format: None,
            },
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.desc.label = Some(label.to_string());
        self
    }

    pub fn shader_stage(mut self, stage: ShaderStage, module: ShaderModuleHandle) -> Self {
        self.desc.stages.push(PipelineShaderStage {
            stage,
            module,
            entry_point: "main".into(),
        });
        self
    }

    pub fn vertex_shader(self, module: ShaderModuleHandle) -> Self {
        self.shader_stage(ShaderStage::Vertex, module)
    }

    pub fn fragment_shader(self, module: ShaderModuleHandle) -> Self {
        self.shader_stage(ShaderStage::Fragment, module)
    }

    pub fn vertex_input(mut self, layout: VertexBufferLayout) -> Self {
        self.desc.vertex_layouts.push(layout);
        self
    }

    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.desc.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: PolygonMode) -> Self {
        self.desc.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.desc.cull_mode = cull_mode;
        self
    }

    pub fn front_face(mut self, front_face: FrontFace) -> Self {
        self.desc.front_face = front_face;
        self
    }

    pub fn multisample(mut self, samples: u32) -> Self {
        self.desc.sample_count = samples;
        self
    }

    pub fn depth_test(mut self, test: bool, write: bool, compare: CompareFunction) -> Self {
        self.desc.depth = DepthState {
            test_enabled: test,
            write_enabled: write,
            compare,
        };
        self
    }

    /// Disable depth testing and writing (full-screen passes).
    pub fn no_depth(self) -> Self {
        self.depth_test(false, false, CompareFunction::Always)
    }

    pub fn depth_bias(mut self, constant_factor: f32, clamp: f32, slope_factor: f32) -> Self {
        self.desc.depth_bias = Some(DepthBias {
            constant_factor,
            clamp,
            slope_factor,
        });
        self
    }

    /// Use `count` color attachments, alpha-blended when `blend` is set.
    pub fn color_blend_attachments(mut self, count: usize, blend: bool) -> Self {
        let state = ColorTargetState {
            blend: blend.then(BlendState::alpha_blending),
            ..Default::default()
        };
        self.desc.color_targets = vec![state; count];
        self
    }

    /// Color attachment formats. Also resizes the blend state list to match,
    /// keeping the state of the first attachment.
    pub fn color_formats(mut self, formats: &[TextureFormat]) -> Self {
        self.desc.color_formats = formats.to_vec();
        if self.desc.color_targets.len() != formats.len() {
            let state = self
                .desc
                .color_targets
                .first()
                .copied()
                .unwrap_or_default();
            self.desc.color_targets = vec![state; formats.len()];
        }
        self
    }

    pub fn depth_format(mut self, format: TextureFormat) -> Self {
        self.desc.depth_format = Some(format);
        self
    }

    pub fn dynamic_state(mut self, state: DynamicState) -> Self {
        if !self.desc.dynamic_states.contains(&state) {
            self.desc.dynamic_states.push(state);
        }
        self
    }

    /// The state that `build` would submit.
    pub fn descriptor(&self) -> &GraphicsPipelineDescriptor {
        &self.desc
    }

    pub fn build(self, backend: &mut dyn GraphicsBackend) -> BackendResult<PipelineHandle> {
        let desc = self.desc;
        if desc.stages.is_empty() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: no shader stages",
                desc.label
            )));
        }
        if desc.color_targets.len() != desc.color_formats.len() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: {} blend states for {} color formats",
                desc.label,
                desc.color_targets.len(),
                desc.color_formats.len()
            )));
        }
        if desc.depth.test_enabled && desc.depth_format.is_none() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: depth test enabled without a depth format",
                desc.label
            )));
        }

        let pipeline = backend.create_graphics_pipeline(&desc)?;
        log::info!(
            "Graphics pipeline created: {} stages, {} color attachments ({})",
            desc.stages.len(),
            desc.color_formats.len(),
            desc.label.as_deref().unwrap_or("unnamed")
        );
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::Vertex;
    use std::path::Path;

    #[test]
    fn test_defaults() {
        let mut backend = DummyBackend::new();
        let layout = backend.create_pipeline_layout(&[], &[]).unwrap();
        let builder = PipelineBuilder::new(layout);
        let desc = builder.descriptor();

        assert_eq!(desc.topology, PrimitiveTopology::TriangleList);
        assert_eq!(desc.cull_mode, CullMode::Back);
        assert_eq!(desc.front_face, FrontFace::Ccw);
        assert_eq!(desc.depth.compare, CompareFunction::GreaterEqual);
        assert!(desc.depth.test_enabled && desc.depth.write_enabled);
        assert_eq!(desc.color_targets.len(), 1);
        assert!(desc.color_targets[0].blend.is_none());
        assert_eq!(
            desc.dynamic_states,
            vec![DynamicState::Viewport, DynamicState::Scissor]
        );
    }

    #[test]
    fn test_gbuffer_style_pipeline() {
        let mut backend = DummyBackend::new();
        let layout = backend.create_pipeline_layout(&[], &[]).unwrap();
        let vs = backend
            .create_shader_module(Path::new("gbuffer.vert.spv"))
            .unwrap();
        let fs = backend
            .create_shader_module(Path::new("gbuffer.frag.spv"))
            .unwrap();

        let pipeline = PipelineBuilder::new(layout)
            .label("gbuffer")
            .vertex_shader(vs)
            .fragment_shader(fs)
            .vertex_input(Vertex::layout())
            .color_formats(&[TextureFormat::Rgba8Unorm, TextureFormat::Rgba16Float])
            .depth_format(TextureFormat::Depth32Float)
            .build(&mut backend)
            .unwrap();

        let desc = backend.pipeline_desc(pipeline).unwrap();
        assert_eq!(desc.color_targets.len(), 2);
        assert_eq!(desc.stages.len(), 2);
        assert_eq!(desc.stages[0].entry_point, "main");
    }

    #[test]
    fn test_blend_and_bias() {
        let mut backend = DummyBackend::new();
        let layout = backend.create_pipeline_layout(&[], &[]).unwrap();
        let builder = PipelineBuilder::new(layout)
            .color_blend_attachments(2, true)
            .color_formats(&[TextureFormat::Rgba8Unorm, TextureFormat::Rgba8Unorm])
            .depth_bias(1.25, 0.0, 1.75)
            .dynamic_state(DynamicState::Viewport);
        let desc = builder.descriptor();

        assert!(desc.color_targets.iter().all(|t| t.blend.is_some()));
        assert!(desc.depth_bias.is_some());
        assert_eq!(desc.dynamic_states.len(), 2);
    }

    #[test]
    fn test_build_without_stages_fails() {
        let mut backend = DummyBackend::new();
        let layout = backend.create_pipeline_layout(&[], &[]).unwrap();
        let result = PipelineBuilder::new(layout)
            .no_depth()
            .color_formats(&[TextureFormat::Rgba8Unorm])
            .build(&mut backend);
        assert!(matches!(
            result,
            Err(BackendError::PipelineCreationFailed(_))
        ));
    }

    #[test]
    fn test_depth_without_format_fails() {
        let mut backend = DummyBackend::new();
        let layout = backend.create_pipeline_layout(&[], &[]).unwrap();
        let vs = backend
            .create_shader_module(Path::new("shadow.vert.spv"))
            .unwrap();
        let result = PipelineBuilder::new(layout)
            .vertex_shader(vs)
            .color_formats(&[])
            .build(&mut backend);
        assert!(result.is_err());
        assert_eq!(backend.live_resources().pipelines, 0);
    }
}
