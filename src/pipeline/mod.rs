//! Rendering pipelines
//!
//! A [`PipelineVariant`] is a table of [`PassKind`]s; [`build_graph`] turns
//! the table into a render graph, declaring the intermediate targets each
//! pass needs:
//!
//! - Forward: one pass shading straight into the swapchain image
//! - Deferred: G-buffer, fullscreen PBR lighting, tonemap
//! - DeferredAdvanced: cascaded shadows, G-buffer, lighting, motion
//!   vectors, TAA, tonemap, FXAA
//!
//! Every pipeline layout uses set 0 for per-frame globals, set 1 for the
//! pass's sampled inputs (or an empty layout) and set 2 for materials.

pub mod builder;
pub mod forward_pass;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod motion_pass;
pub mod postprocess;
pub mod shadow_pass;
pub mod taa_pass;

pub use builder::PipelineBuilder;
pub use forward_pass::ForwardPass;
pub use gbuffer_pass::{GBufferPass, GBufferTargets};
pub use lighting_pass::LightingPass;
pub use motion_pass::MotionPass;
pub use postprocess::{FxaaPass, TonemapOperator, TonemapSettings, TonemappingPass};
pub use shadow_pass::ShadowPass;
pub use taa_pass::TaaPass;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::backend::*;
use crate::render_graph::{
    PassExecuteContext, PipelineSetupContext, RenderGraph, ResourceId, TextureInfo,
};
use crate::scene::{DrawCall, MAX_CASCADES};

/// Reversed-Z clear value: the far plane is depth 0.
pub const DEPTH_CLEAR: f32 = 0.0;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// What the final image shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DebugView {
    #[default]
    Final,
    Albedo,
    Normal,
    Roughness,
    Metallic,
    Depth,
    /// Tint by shadow cascade
    Cascades,
}

impl DebugView {
    pub const ALL: [DebugView; 7] = [
        DebugView::Final,
        DebugView::Albedo,
        DebugView::Normal,
        DebugView::Roughness,
        DebugView::Metallic,
        DebugView::Depth,
        DebugView::Cascades,
    ];

    /// Unknown values map to `Final`.
    pub fn from_raw(raw: u32) -> Self {
        Self::ALL
            .get(raw as usize)
            .copied()
            .unwrap_or(DebugView::Final)
    }

    /// Value pushed to shaders
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// The view actually shown; cascades need a shadow pass.
    pub fn effective(self, has_shadows: bool) -> Self {
        match self {
            DebugView::Cascades if !has_shadows => DebugView::Final,
            view => view,
        }
    }
}

impl FromStr for DebugView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "final" => Ok(DebugView::Final),
            "albedo" => Ok(DebugView::Albedo),
            "normal" | "normals" => Ok(DebugView::Normal),
            "roughness" => Ok(DebugView::Roughness),
            "metallic" => Ok(DebugView::Metallic),
            "depth" => Ok(DebugView::Depth),
            "cascades" => Ok(DebugView::Cascades),
            other => Err(format!("unknown debug view '{}'", other)),
        }
    }
}

/// One pass of a variant's table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Forward,
    Shadow,
    GBuffer,
    Lighting,
    Motion,
    Taa,
    Tonemap,
    Fxaa,
}

/// Pass composition selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineVariant {
    Forward,
    #[default]
    Deferred,
    /// Deferred with cascaded shadows, TAA, tonemapping and FXAA
    DeferredAdvanced,
}

impl PipelineVariant {
    pub const ALL: [PipelineVariant; 3] = [
        PipelineVariant::Forward,
        PipelineVariant::Deferred,
        PipelineVariant::DeferredAdvanced,
    ];

    /// Passes in submission order
    pub fn passes(self) -> &'static [PassKind] {
        match self {
            PipelineVariant::Forward => &[PassKind::Forward],
            PipelineVariant::Deferred => &[PassKind::GBuffer, PassKind::Lighting, PassKind::Tonemap],
            PipelineVariant::DeferredAdvanced => &[
                PassKind::Shadow,
                PassKind::GBuffer,
                PassKind::Lighting,
                PassKind::Motion,
                PassKind::Taa,
                PassKind::Tonemap,
                PassKind::Fxaa,
            ],
        }
    }

    pub fn has_pass(self, kind: PassKind) -> bool {
        self.passes().contains(&kind)
    }

    pub fn has_shadows(self) -> bool {
        self.has_pass(PassKind::Shadow)
    }

    /// Whether the projection is jittered for temporal resolve
    pub fn uses_taa(self) -> bool {
        self.has_pass(PassKind::Taa)
    }
}

impl fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineVariant::Forward => "forward",
            PipelineVariant::Deferred => "deferred",
            PipelineVariant::DeferredAdvanced => "advanced",
        };
        f.write_str(name)
    }
}

impl FromStr for PipelineVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(PipelineVariant::Forward),
            "deferred" => Ok(PipelineVariant::Deferred),
            "advanced" | "deferred-advanced" | "deferred_advanced" => {
                Ok(PipelineVariant::DeferredAdvanced)
            }
            other => Err(format!(
                "unknown pipeline variant '{}' (expected forward, deferred or advanced)",
                other
            )),
        }
    }
}

/// Tunables that shape the graph
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphSettings {
    pub shadow_map_size: u32,
    pub cascade_count: u32,
    pub tonemap: TonemapSettings,
    pub taa_feedback: f32,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            shadow_map_size: 2048,
            cascade_count: MAX_CASCADES as u32,
            tonemap: TonemapSettings::default(),
            taa_feedback: 0.9,
        }
    }
}

/// A built graph and the id the swapchain image is bound to each frame
pub struct VariantGraph {
    pub graph: RenderGraph,
    pub swapchain: ResourceId,
    pub variant: PipelineVariant,
}

/// Declare the targets and passes of a variant.
pub fn build_graph(variant: PipelineVariant, settings: &GraphSettings) -> VariantGraph {
    let mut graph = RenderGraph::new();
    let swapchain = graph.register_external("swapchain");
    let cascade_count = settings.cascade_count.clamp(1, MAX_CASCADES as u32);

    let shadow = variant.has_shadows().then(|| {
        graph.create_texture(
            "shadow_map",
            TextureInfo::fixed(
                DEPTH_FORMAT,
                settings.shadow_map_size,
                settings.shadow_map_size,
                cascade_count,
            ),
        )
    });
    let gbuffer = variant.has_pass(PassKind::GBuffer).then(|| GBufferTargets {
        albedo: graph.create_texture("gbuffer_albedo", TextureInfo::screen(TextureFormat::Rgba8Unorm)),
        normal: graph.create_texture("gbuffer_normal", TextureInfo::screen(TextureFormat::Rgba16Float)),
        depth: graph.create_texture("gbuffer_depth", TextureInfo::screen(DEPTH_FORMAT)),
    });
    let hdr = variant
        .has_pass(PassKind::Lighting)
        .then(|| graph.create_texture("hdr_color", TextureInfo::screen(HDR_FORMAT)));
    let velocity = variant
        .has_pass(PassKind::Motion)
        .then(|| graph.create_texture("velocity", TextureInfo::screen(TextureFormat::Rg16Float)));
    let history = variant
        .uses_taa()
        .then(|| graph.create_history("taa_history", TextureInfo::screen(HDR_FORMAT)));
    let ldr = variant
        .has_pass(PassKind::Fxaa)
        .then(|| graph.create_texture("ldr_color", TextureInfo::screen(TextureFormat::Rgba8Unorm)));

    for kind in variant.passes() {
        match (kind, gbuffer, hdr) {
            (PassKind::Forward, _, _) => {
                let depth = graph.create_texture("forward_depth", TextureInfo::screen(DEPTH_FORMAT));
                graph.add_pass(ForwardPass::new(swapchain, depth));
            }
            (PassKind::Shadow, _, _) => {
                if let Some(shadow) = shadow {
                    graph.add_pass(ShadowPass::new(shadow, cascade_count));
                }
            }
            (PassKind::GBuffer, Some(targets), _) => {
                graph.add_pass(GBufferPass::new(targets));
            }
            (PassKind::Lighting, Some(targets), Some(hdr)) => {
                graph.add_pass(LightingPass::new(targets, shadow, hdr, cascade_count));
            }
            (PassKind::Motion, Some(targets), _) => {
                if let Some(velocity) = velocity {
                    graph.add_pass(MotionPass::new(targets.depth, velocity));
                }
            }
            (PassKind::Taa, _, Some(hdr)) => {
                if let (Some(history), Some(velocity)) = (history, velocity) {
                    graph.add_pass(TaaPass::new(hdr, history, velocity, settings.taa_feedback));
                }
            }
            (PassKind::Tonemap, Some(targets), Some(hdr)) => {
                let source = history.map(|h| h.current).unwrap_or(hdr);
                let output = ldr.unwrap_or(swapchain);
                graph.add_pass(TonemappingPass::new(source, targets, output, settings.tonemap));
            }
            (PassKind::Fxaa, _, _) => {
                if let Some(ldr) = ldr {
                    graph.add_pass(FxaaPass::new(ldr, swapchain));
                }
            }
            (kind, _, _) => {
                log::warn!("{:?} pass has no inputs in the {} variant", kind, variant);
            }
        }
    }

    VariantGraph {
        graph,
        swapchain,
        variant,
    }
}

/// Loads `<dir>/<name>.spv` on first use and keeps the module
#[derive(Debug)]
pub struct ShaderLibrary {
    dir: PathBuf,
    modules: HashMap<String, ShaderModuleHandle>,
}

impl ShaderLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            modules: HashMap::new(),
        }
    }

    pub fn get(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        name: &str,
    ) -> BackendResult<ShaderModuleHandle> {
        if let Some(module) = self.modules.get(name) {
            return Ok(*module);
        }
        let path = self.dir.join(format!("{}.spv", name));
        let module = backend.create_shader_module(&path)?;
        log::trace!("Loaded shader {}", path.display());
        self.modules.insert(name.to_string(), module);
        Ok(module)
    }

    pub fn loaded(&self) -> usize {
        self.modules.len()
    }

    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, module) in self.modules.drain() {
            backend.destroy_shader_module(module);
        }
    }
}

/// A pipeline and the layout it was built against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassPipeline {
    pub layout: PipelineLayoutHandle,
    pub pipeline: PipelineHandle,
}

impl PassPipeline {
    /// Create the layout, then hand it to `build` for the pipeline. The
    /// layout is destroyed again if the pipeline fails.
    pub fn create(
        ctx: &mut PipelineSetupContext,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
        build: impl FnOnce(PipelineBuilder) -> PipelineBuilder,
    ) -> BackendResult<Self> {
        let layout = ctx.backend.create_pipeline_layout(set_layouts, push_constants)?;
        match build(PipelineBuilder::new(layout)).build(&mut *ctx.backend) {
            Ok(pipeline) => Ok(Self { layout, pipeline }),
            Err(e) => {
                ctx.backend.destroy_pipeline_layout(layout);
                Err(e)
            }
        }
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_pipeline(self.pipeline);
        backend.destroy_pipeline_layout(self.layout);
    }

    /// Bind the pipeline, set 0 and, when given, set 1
    pub fn bind(&self, ctx: &mut PassExecuteContext, input_set: Option<DescriptorSetHandle>) {
        ctx.cmd.cmd_bind_pipeline(self.pipeline);
        ctx.cmd
            .cmd_bind_descriptor_set(self.layout, 0, ctx.frame.global_set);
        if let Some(set) = input_set {
            ctx.cmd.cmd_bind_descriptor_set(self.layout, 1, set);
        }
    }

    pub fn push<T: bytemuck::Pod>(&self, cmd: &mut dyn CommandRecorder, stages: ShaderStageFlags, data: &T) {
        cmd.cmd_push_constants(self.layout, stages, 0, bytemuck::bytes_of(data));
    }
}

/// The pipeline a pass built in `create_pipelines`
pub fn require_pipeline(pipeline: Option<PassPipeline>, pass: &str) -> BackendResult<PassPipeline> {
    pipeline.ok_or_else(|| {
        BackendError::PipelineCreationFailed(format!("{}: pipelines not created", pass))
    })
}

/// Push range covering a whole struct
pub fn push_range<T>(stages: ShaderStageFlags) -> PushConstantRange {
    PushConstantRange {
        stages,
        offset: 0,
        size: std::mem::size_of::<T>() as u32,
    }
}

/// Dynamic viewport (Y-up) and scissor covering `extent`
pub fn set_viewport_scissor(cmd: &mut dyn CommandRecorder, extent: Extent2D) {
    cmd.cmd_set_viewport(&Viewport::flipped(extent));
    cmd.cmd_set_scissor(0, 0, extent.width, extent.height);
}

/// One oversized triangle; the vertex shader derives positions from the index
pub fn draw_fullscreen(cmd: &mut dyn CommandRecorder) {
    cmd.cmd_draw(0..3, 0..1);
}

/// Record every draw: material set at set 2, mesh buffers, then `push`
/// for the per-draw constants.
pub fn draw_meshes(
    cmd: &mut dyn CommandRecorder,
    pipeline: &PassPipeline,
    draws: &[DrawCall],
    mut push: impl FnMut(&mut dyn CommandRecorder, &DrawCall),
) {
    for draw in draws {
        cmd.cmd_bind_descriptor_set(pipeline.layout, 2, draw.material_set);
        cmd.cmd_bind_vertex_buffer(draw.vertex_buffer, 0);
        cmd.cmd_bind_index_buffer(draw.index_buffer, 0);
        push(cmd, draw);
        cmd.cmd_draw_indexed(0..draw.index_count, 0, 0..1);
    }
}

/// Color attachment cleared to `color`
pub fn clear_color_attachment(view: TextureViewHandle, color: [f32; 4]) -> RenderingAttachment {
    RenderingAttachment {
        view,
        layout: TextureLayout::ColorAttachment,
        load_op: LoadOp::Clear(ClearValue::Color(color)),
        store_op: StoreOp::Store,
    }
}

/// Depth attachment cleared to the reversed-Z far value
pub fn clear_depth_attachment(view: TextureViewHandle) -> RenderingAttachment {
    RenderingAttachment {
        view,
        layout: TextureLayout::DepthStencilAttachment,
        load_op: LoadOp::Clear(ClearValue::Depth(DEPTH_CLEAR)),
        store_op: StoreOp::Store,
    }
}

/// Fullscreen pass writing one color target: bind, push, draw.
pub fn record_fullscreen<T: bytemuck::Pod>(
    ctx: &mut PassExecuteContext,
    pipeline: &PassPipeline,
    label: &'static str,
    output: ResourceId,
    push: &T,
) -> BackendResult<()> {
    let view = ctx.view(output)?;
    let extent = ctx.extent(output)?;
    let input_set = ctx.input_set()?;
    ctx.cmd.cmd_begin_rendering(&RenderingInfo {
        label: Some(label),
        extent,
        color_attachments: vec![clear_color_attachment(view, [0.0, 0.0, 0.0, 1.0])],
        depth_attachment: None,
    });
    set_viewport_scissor(ctx.cmd, extent);
    pipeline.bind(ctx, Some(input_set));
    pipeline.push(ctx.cmd, ShaderStageFlags::FRAGMENT, push);
    draw_fullscreen(ctx.cmd);
    ctx.cmd.cmd_end_rendering();
    log::trace!("{} recorded for frame {}", label, ctx.frame.frame_number);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    #[test]
    fn test_debug_view_from_raw() {
        assert_eq!(DebugView::from_raw(0), DebugView::Final);
        assert_eq!(DebugView::from_raw(2), DebugView::Normal);
        assert_eq!(DebugView::from_raw(6), DebugView::Cascades);
        assert_eq!(DebugView::from_raw(7), DebugView::Final);
        assert_eq!(DebugView::from_raw(u32::MAX), DebugView::Final);
        for view in DebugView::ALL {
            assert_eq!(DebugView::from_raw(view.as_raw()), view);
        }
    }

    #[test]
    fn test_cascade_view_needs_shadows() {
        assert_eq!(DebugView::Cascades.effective(false), DebugView::Final);
        assert_eq!(DebugView::Cascades.effective(true), DebugView::Cascades);
        assert_eq!(DebugView::Depth.effective(false), DebugView::Depth);
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("forward".parse(), Ok(PipelineVariant::Forward));
        assert_eq!("Deferred".parse(), Ok(PipelineVariant::Deferred));
        assert_eq!("advanced".parse(), Ok(PipelineVariant::DeferredAdvanced));
        assert!("raytraced".parse::<PipelineVariant>().is_err());
        for variant in PipelineVariant::ALL {
            assert_eq!(variant.to_string().parse(), Ok(variant));
        }
    }

    #[test]
    fn test_variant_tables() {
        assert!(!PipelineVariant::Forward.has_shadows());
        assert!(!PipelineVariant::Deferred.uses_taa());
        assert!(PipelineVariant::DeferredAdvanced.has_shadows());
        assert!(PipelineVariant::DeferredAdvanced.uses_taa());
        assert_eq!(PipelineVariant::DeferredAdvanced.passes().len(), 7);
    }

    #[test]
    fn test_every_variant_compiles_in_table_order() {
        for variant in PipelineVariant::ALL {
            let built = build_graph(variant, &GraphSettings::default());
            let compiled = built.graph.compile().unwrap();
            assert_eq!(compiled.pass_order.len(), variant.passes().len());
            let order: Vec<usize> = compiled.pass_order.iter().map(|p| p.index()).collect();
            let expected: Vec<usize> = (0..variant.passes().len()).collect();
            assert_eq!(order, expected, "{} variant", variant);
        }
    }

    #[test]
    fn test_advanced_graph_targets() {
        let built = build_graph(PipelineVariant::DeferredAdvanced, &GraphSettings::default());
        let names: Vec<&str> = built.graph.resources().iter().map(|r| r.name()).collect();
        for expected in [
            "shadow_map",
            "gbuffer_albedo",
            "gbuffer_normal",
            "gbuffer_depth",
            "hdr_color",
            "velocity",
            "taa_history_current",
            "taa_history_previous",
            "ldr_color",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        assert_eq!(built.graph.history_pairs().len(), 1);
    }

    #[test]
    fn test_shader_library_caches_modules() {
        let mut backend = DummyBackend::new();
        let mut shaders = ShaderLibrary::new("shaders");
        let a = shaders.get(&mut backend, "fullscreen.vert").unwrap();
        let b = shaders.get(&mut backend, "fullscreen.vert").unwrap();
        assert_eq!(a, b);
        assert_eq!(shaders.loaded(), 1);
        assert_eq!(
            backend.shader_path(a),
            Some(std::path::Path::new("shaders/fullscreen.vert.spv"))
        );
        shaders.destroy(&mut backend);
        assert_eq!(backend.live_resources().shader_modules, 0);
    }

    #[test]
    fn test_missing_shader_names_the_path() {
        let mut backend = DummyBackend::new().with_missing_shader("lighting.frag.spv");
        let mut shaders = ShaderLibrary::new("shaders");
        match shaders.get(&mut backend, "lighting.frag") {
            Err(BackendError::ShaderCreationFailed { path, .. }) => {
                assert!(path.ends_with("lighting.frag.spv"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
