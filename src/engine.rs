//! Main engine orchestrator
//!
//! [`Engine::draw_frame`] runs one frame:
//!
//! 1. wait for the current slot's fence
//! 2. acquire a swapchain image; a stale chain is recreated and the frame
//!    is dropped
//! 3. reset the fence, upload uniforms and point lights into the slot
//! 4. record every pass of the compiled graph
//! 5. submit, present, and recreate when presentation reports a stale chain
//!    or a resize is pending
//! 6. advance to the next slot
//!
//! There is one frame slot per swapchain image. Slots and their sync
//! objects are rebuilt whenever the swapchain is recreated.

use crate::backend::vulkan::VulkanBackend;
use crate::backend::*;
use crate::descriptor::{DescriptorManager, SharedSetLayouts, DEFAULT_MAX_SETS};
use crate::frame::{FrameInputs, FrameParams, FramePool, GlobalUniforms, PreviousFrame};
use crate::pipeline::{build_graph, DebugView, PipelineVariant, ShaderLibrary, VariantGraph};
use crate::render_graph::{CompiledGraph, RenderGraphExecutor};
use crate::resources::{AssetStore, Material, MaterialId, MeshData, MeshId, TextureData, TextureId};
use crate::scene::{
    compute_cascades, pack_point_lights, CascadeSet, DrawCall, LightOverflowWarning, Scene,
    DEFAULT_MAX_POINT_LIGHTS,
};
use crate::swapchain::SwapchainManager;
use crate::sync::FrameSync;
use crate::timer::Timer;
use crate::EngineConfig;

/// How far from the camera shadow cascades reach
pub const SHADOW_DISTANCE: f32 = 100.0;

/// Outcome of one [`Engine::draw_frame`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was recorded, submitted and presented
    Presented { image_index: u32, slot: usize },
    /// The chain was stale at acquire time; it was rebuilt and nothing drawn
    Recreated,
    /// Nothing to draw into (minimized window)
    Skipped,
}

/// The main rendering engine
pub struct Engine<B: GraphicsBackend> {
    backend: B,
    config: EngineConfig,

    swapchain: SwapchainManager,
    sync: FrameSync,
    descriptors: DescriptorManager,
    layouts: SharedSetLayouts,
    frames: FramePool,
    shaders: ShaderLibrary,

    graph: VariantGraph,
    compiled: CompiledGraph,
    executor: RenderGraphExecutor,

    assets: AssetStore,
    scene: Scene,
    debug_view: DebugView,

    previous: Option<PreviousFrame>,
    last_uniforms: Option<GlobalUniforms>,
    light_warning: LightOverflowWarning,
    timer: Timer,
    frame_number: u64,

    framebuffer_size: (u32, u32),
    resize_pending: bool,
    recreate_count: u32,
    destroyed: bool,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Build every renderer object on top of an initialized backend.
    ///
    /// Aborts on the first failing step. Objects created before the
    /// failure are reclaimed when the backend is dropped.
    pub fn from_backend(mut backend: B, config: EngineConfig) -> BackendResult<Self> {
        log::info!(
            "Initializing {} renderer on {} ({})",
            config.variant,
            backend.name(),
            backend.capabilities().device_name
        );
        let (width, height) = (config.width, config.height);

        let swapchain = SwapchainManager::new(&mut backend, width, height, config.vsync)?;
        let image_count = swapchain.image_count();
        let sync = FrameSync::new(&mut backend, image_count)?;

        let mut descriptors = DescriptorManager::new(&mut backend, DEFAULT_MAX_SETS)?;
        let layouts = SharedSetLayouts::create(&mut descriptors, &mut backend)?;
        let mut frames = FramePool::new(config.max_point_lights.min(DEFAULT_MAX_POINT_LIGHTS));
        frames.ensure(&mut backend, &mut descriptors, &layouts, image_count as usize)?;

        let mut graph = build_graph(config.variant, &config.graph_settings());
        let compiled = graph.graph.compile()?;
        let mut executor = RenderGraphExecutor::new();
        executor.prepare(&graph.graph, &mut backend, &mut descriptors)?;
        executor.allocate_resources(&graph.graph, &mut backend, swapchain.extent())?;
        executor.write_input_sets(&graph.graph, &mut backend)?;

        let mut shaders = ShaderLibrary::new(&config.shader_dir);
        graph.graph.create_pipelines(
            &mut backend,
            &mut shaders,
            &layouts,
            swapchain.format(),
            |pass| executor.input_layout(pass),
        )?;

        let assets = AssetStore::new(&mut backend)?;

        let mut scene = Scene::new();
        let extent = swapchain.extent();
        scene
            .camera
            .set_aspect(extent.width as f32, extent.height as f32);

        log::info!(
            "Renderer ready: {} passes, {} frame slots, {} shaders",
            compiled.pass_order.len(),
            image_count,
            shaders.loaded()
        );

        Ok(Self {
            backend,
            debug_view: config.debug_view,
            config,
            swapchain,
            sync,
            descriptors,
            layouts,
            frames,
            shaders,
            graph,
            compiled,
            executor,
            assets,
            scene,
            previous: None,
            last_uniforms: None,
            light_warning: LightOverflowWarning::default(),
            timer: Timer::new(),
            frame_number: 0,
            framebuffer_size: (width, height),
            resize_pending: false,
            recreate_count: 0,
            destroyed: false,
        })
    }

    /// Render and present one frame.
    pub fn draw_frame(&mut self) -> BackendResult<FrameStatus> {
        if self.destroyed {
            return Err(BackendError::InvalidHandle("engine has been destroyed".into()));
        }
        let (width, height) = self.framebuffer_size;
        if width == 0 || height == 0 {
            return Ok(FrameStatus::Skipped);
        }
        self.timer.tick();

        self.sync.wait_for_fence(&mut self.backend)?;
        let objects = self.sync.current()?;
        let Some(image_index) = self
            .swapchain
            .acquire_next_image(&mut self.backend, objects.image_available)?
        else {
            log::debug!("Swapchain stale at acquire, frame {} dropped", self.frame_number);
            return Ok(if self.recreate_swapchain()? {
                FrameStatus::Recreated
            } else {
                FrameStatus::Skipped
            });
        };
        self.sync.reset_fence(&mut self.backend)?;

        let slot_index = self.sync.current_index();
        let slot = *self.frames.slot(slot_index)?;
        let packed = pack_point_lights(&self.scene.point_lights, self.frames.light_capacity());
        self.light_warning
            .observe(&packed, self.scene.point_lights.len());
        let uniforms = self.build_uniforms(packed.lights.len() as u32);
        slot.write(&mut self.backend, &uniforms, &packed.lights)?;

        let draws = self.assets.resolve_draws(&self.scene.items);
        let params = FrameParams {
            extent: self.swapchain.extent(),
            global_set: slot.global_set,
            frame_number: self.frame_number,
            debug_view: self.debug_view.effective(self.config.variant.has_shadows()),
            clear_color: self.config.clear_color,
        };
        self.record(slot.command_buffer, image_index, &params, &draws)?;

        self.backend.submit(&SubmitInfo {
            command_buffer: slot.command_buffer,
            wait_semaphore: Some(objects.image_available),
            signal_semaphore: Some(objects.render_finished),
            fence: Some(objects.in_flight),
        })?;
        let result = self
            .swapchain
            .present(&mut self.backend, image_index, objects.render_finished)?;

        self.previous = Some(uniforms.as_previous());
        self.last_uniforms = Some(uniforms);
        self.frame_number += 1;

        if result.is_stale() || self.resize_pending {
            log::debug!("Recreating swapchain after present ({:?})", result);
            self.recreate_swapchain()?;
        } else {
            self.sync.advance();
        }

        Ok(FrameStatus::Presented {
            image_index,
            slot: slot_index,
        })
    }

    fn build_uniforms(&self, point_light_count: u32) -> GlobalUniforms {
        let variant = self.config.variant;
        let cascades = if variant.has_shadows() {
            compute_cascades(
                &self.scene.camera,
                &self.scene.directional_light,
                self.config.cascade_count as usize,
                self.config.cascade_split_lambda,
                SHADOW_DISTANCE,
                self.config.shadow_map_size,
            )
        } else {
            CascadeSet::default()
        };
        GlobalUniforms::build(&FrameInputs {
            scene: &self.scene,
            extent: self.swapchain.extent(),
            frame_index: self.frame_number,
            time: self.timer.elapsed_seconds(),
            jitter: variant.uses_taa(),
            cascades: &cascades,
            point_light_count,
            previous: self.previous,
        })
    }

    fn record(
        &mut self,
        command_buffer: CommandBufferHandle,
        image_index: u32,
        params: &FrameParams,
        draws: &[DrawCall],
    ) -> BackendResult<()> {
        let (Some(image), Some(view)) = (
            self.swapchain.image(image_index),
            self.swapchain.view(image_index),
        ) else {
            return Err(BackendError::AcquireImageFailed(format!(
                "image index {} out of range ({} images)",
                image_index,
                self.swapchain.image_count()
            )));
        };
        self.executor.set_external(
            self.graph.swapchain,
            image,
            view,
            self.swapchain.format(),
            self.swapchain.extent(),
        );

        self.backend.begin_command_buffer(command_buffer)?;
        let recorded = self.executor.execute(
            &self.graph.graph,
            &self.compiled,
            &mut self.backend,
            params,
            draws,
        );
        let ended = self.backend.end_command_buffer();
        recorded.and(ended)
    }

    /// Rebuild the chain and everything sized by it. Returns false when the
    /// framebuffer has zero area and nothing was touched.
    fn recreate_swapchain(&mut self) -> BackendResult<bool> {
        let (width, height) = self.framebuffer_size;
        let old_format = self.swapchain.format();
        if !self.swapchain.recreate(&mut self.backend, width, height)? {
            return Ok(false);
        }
        self.resize_pending = false;
        self.recreate_count += 1;

        let image_count = self.swapchain.image_count();
        self.sync.destroy(&mut self.backend);
        self.sync = FrameSync::new(&mut self.backend, image_count)?;
        self.frames.ensure(
            &mut self.backend,
            &mut self.descriptors,
            &self.layouts,
            image_count as usize,
        )?;

        let extent = self.swapchain.extent();
        self.executor
            .resize(&self.graph.graph, &mut self.backend, extent)?;

        if self.swapchain.format() != old_format {
            log::info!(
                "Swapchain format changed from {:?} to {:?}, rebuilding pipelines",
                old_format,
                self.swapchain.format()
            );
            self.graph.graph.destroy_pipelines(&mut self.backend);
            let executor = &self.executor;
            self.graph.graph.create_pipelines(
                &mut self.backend,
                &mut self.shaders,
                &self.layouts,
                self.swapchain.format(),
                |pass| executor.input_layout(pass),
            )?;
        }

        self.scene
            .camera
            .set_aspect(extent.width as f32, extent.height as f32);
        log::debug!(
            "Resources rebuilt for {}x{} ({} slots)",
            extent.width,
            extent.height,
            image_count
        );
        Ok(true)
    }

    /// Record a new framebuffer size. The chain is rebuilt after the next
    /// present; a zero-area size pauses drawing until a real size arrives.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == self.framebuffer_size && !self.resize_pending {
            return;
        }
        log::debug!("Resize requested: {}x{}", width, height);
        self.framebuffer_size = (width, height);
        self.resize_pending = true;
    }

    /// Rebuild the swapchain now, at the current framebuffer size.
    pub fn recreate(&mut self) -> BackendResult<bool> {
        self.recreate_swapchain()
    }

    pub fn upload_mesh(&mut self, mesh: &MeshData) -> BackendResult<MeshId> {
        self.assets.add_mesh(&mut self.backend, mesh)
    }

    pub fn upload_texture(&mut self, texture: &TextureData) -> BackendResult<TextureId> {
        self.assets.add_texture(&mut self.backend, texture)
    }

    pub fn create_material(&mut self, material: &Material) -> BackendResult<MaterialId> {
        self.assets.create_material(
            &mut self.backend,
            &mut self.descriptors,
            self.layouts.material,
            material,
        )
    }

    /// Replace the scene. The camera takes the current aspect ratio.
    pub fn set_scene(&mut self, mut scene: Scene) {
        let extent = self.swapchain.extent();
        scene
            .camera
            .set_aspect(extent.width as f32, extent.height as f32);
        self.scene = scene;
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn set_debug_view(&mut self, view: DebugView) {
        if view != self.debug_view {
            log::info!("Debug view: {:?}", view);
        }
        self.debug_view = view;
    }

    pub fn debug_view(&self) -> DebugView {
        self.debug_view
    }

    pub fn variant(&self) -> PipelineVariant {
        self.config.variant
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn frame_sync(&self) -> &FrameSync {
        &self.sync
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub fn graph(&self) -> &VariantGraph {
        &self.graph
    }

    pub fn compiled_graph(&self) -> &CompiledGraph {
        &self.compiled
    }

    pub fn executor(&self) -> &RenderGraphExecutor {
        &self.executor
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Frames presented so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Uniform block of the last presented frame
    pub fn last_uniforms(&self) -> Option<&GlobalUniforms> {
        self.last_uniforms.as_ref()
    }

    /// Swapchain recreations since startup
    pub fn recreate_count(&self) -> u32 {
        self.recreate_count
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer_size
    }

    pub fn wait_idle(&mut self) -> BackendResult<()> {
        self.backend.wait_idle()
    }

    /// Wait for the GPU and release every renderer object. Safe to call
    /// more than once; also runs on drop.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(e) = self.backend.wait_idle() {
            log::error!("wait_idle failed during shutdown: {}", e);
        }

        self.graph.graph.destroy_pipelines(&mut self.backend);
        self.shaders.destroy(&mut self.backend);
        self.executor.destroy(&mut self.backend);
        self.assets.destroy(&mut self.backend);
        self.frames.destroy(&mut self.backend);
        self.sync.destroy(&mut self.backend);
        self.descriptors.destroy(&mut self.backend);
        self.swapchain.destroy(&mut self.backend);
        log::info!("Renderer shut down after {} frames", self.frame_number);
    }
}

impl Engine<VulkanBackend> {
    /// Bring up the Vulkan device for `window` and build the engine on it.
    pub fn new<W>(window: &W, config: EngineConfig) -> BackendResult<Self>
    where
        W: raw_window_handle::HasDisplayHandle + raw_window_handle::HasWindowHandle,
    {
        let backend = VulkanBackend::new(window, config.enable_validation)?;
        Self::from_backend(backend, config)
    }
}

impl<B: GraphicsBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, DummyEvent};
    use crate::resources::MeshData;
    use crate::scene::{DrawItem, PointLight};
    use glam::Vec3;

    fn engine(variant: PipelineVariant) -> Engine<DummyBackend> {
        let config = EngineConfig::default()
            .with_variant(variant)
            .with_size(800, 600);
        Engine::from_backend(DummyBackend::new(), config).unwrap()
    }

    #[test]
    fn test_startup_builds_one_slot_per_image() {
        let engine = engine(PipelineVariant::Deferred);
        assert_eq!(engine.swapchain().image_count(), 3);
        assert_eq!(engine.frame_sync().frame_count(), 3);
        assert_eq!(engine.frames().len(), 3);
        assert!(engine.backend().hazards().is_empty());
    }

    #[test]
    fn test_missing_shader_aborts_startup() {
        let backend = DummyBackend::new().with_missing_shader("gbuffer.frag.spv");
        let config = EngineConfig::default().with_variant(PipelineVariant::Deferred);
        match Engine::from_backend(backend, config) {
            Err(BackendError::ShaderCreationFailed { path, .. }) => {
                assert!(path.ends_with("gbuffer.frag.spv"))
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("startup should fail"),
        }
    }

    #[test]
    fn test_fence_waited_before_uniform_write() {
        let mut engine = engine(PipelineVariant::Forward);
        engine.backend_mut().clear_events();
        engine.draw_frame().unwrap();
        let events = engine.backend().events();
        let wait = events
            .iter()
            .position(|e| matches!(e, DummyEvent::FenceWait(_)))
            .unwrap();
        let reset = events
            .iter()
            .position(|e| matches!(e, DummyEvent::FenceReset(_)))
            .unwrap();
        let write = events
            .iter()
            .position(|e| matches!(e, DummyEvent::BufferWrite(_)))
            .unwrap();
        let submit = events
            .iter()
            .position(|e| matches!(e, DummyEvent::Submit { fence: Some(_), .. }))
            .unwrap();
        assert!(wait < reset && reset < write && write < submit);
    }

    #[test]
    fn test_stale_acquire_recreates_and_keeps_fence_signaled() {
        let mut engine = engine(PipelineVariant::Deferred);
        engine.backend_mut().inject_stale_acquires(1);
        assert_eq!(engine.draw_frame().unwrap(), FrameStatus::Recreated);
        assert_eq!(engine.recreate_count(), 1);
        assert_eq!(engine.frame_number(), 0);
        assert!(matches!(
            engine.draw_frame().unwrap(),
            FrameStatus::Presented { .. }
        ));
        assert!(engine.backend().hazards().is_empty());
    }

    #[test]
    fn test_minimized_window_skips_frames() {
        let mut engine = engine(PipelineVariant::Deferred);
        engine.resize(0, 600);
        assert_eq!(engine.draw_frame().unwrap(), FrameStatus::Skipped);
        assert_eq!(engine.recreate_count(), 0);

        engine.resize(1024, 768);
        engine.draw_frame().unwrap();
        assert_eq!(engine.recreate_count(), 1);
        assert_eq!(engine.swapchain().extent(), Extent2D::new(1024, 768));
        assert!(engine.backend().hazards().is_empty());
    }

    #[test]
    fn test_light_overflow_is_clamped() {
        let mut engine = engine(PipelineVariant::Deferred);
        for i in 0..300 {
            engine.scene_mut().add_point_light(PointLight::new(
                Vec3::new(i as f32, 1.0, 0.0),
                Vec3::ONE,
                1.0,
                5.0,
            ));
        }
        engine.draw_frame().unwrap();
        assert_eq!(engine.last_uniforms().unwrap().point_light_count, 256);
    }

    #[test]
    fn test_draws_reach_the_command_stream() {
        let mut engine = engine(PipelineVariant::Forward);
        let cube = engine.upload_mesh(&MeshData::cube()).unwrap();
        let material = engine.create_material(&Material::gold()).unwrap();
        engine.scene_mut().add_item(DrawItem::new(cube, material));
        engine.scene_mut().add_item(DrawItem {
            material: None,
            ..DrawItem::new(cube, material)
        });
        engine.draw_frame().unwrap();
        let commands = engine.backend().last_frame_commands().unwrap();
        let indexed = commands
            .iter()
            .filter(|c| matches!(c, crate::backend::dummy::RecordedCommand::DrawIndexed { .. }))
            .count();
        assert_eq!(indexed, 1);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut engine = engine(PipelineVariant::DeferredAdvanced);
        let cube = engine.upload_mesh(&MeshData::cube()).unwrap();
        let material = engine.create_material(&Material::default()).unwrap();
        engine.scene_mut().add_item(DrawItem::new(cube, material));
        for _ in 0..5 {
            engine.draw_frame().unwrap();
        }
        engine.destroy();
        engine.destroy();
        assert_eq!(engine.backend().live_resources(), Default::default());
        assert!(engine.backend().hazards().is_empty());
        assert!(engine.draw_frame().is_err());
    }
}
