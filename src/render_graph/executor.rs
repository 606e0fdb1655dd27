//! Render graph executor
//!
//! Owns the physical images behind graph resources and records the passes of
//! a compiled graph. The executor remembers the last layout of every image it
//! has touched, across frames, and records a transition before each pass for
//! every declared access whose layout differs. Attachment writes always get
//! a barrier, even when the layout is unchanged, so a frame's writes are
//! ordered after the previous frame's. External images (the swapchain image)
//! start every frame as `Undefined` and end it in `PresentSrc`.
//!
//! History pairs are two physical images whose roles flip every frame.
//! Passes that sample a history resource get one input set per parity.

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::descriptor::DescriptorManager;
use crate::frame::FrameParams;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::scene::DrawCall;

#[derive(Debug, Default)]
struct PassInputs {
    layout: Option<DescriptorSetLayoutHandle>,
    /// One set, or two for passes sampling history (indexed by parity)
    sets: Vec<DescriptorSetHandle>,
}

impl PassInputs {
    fn set_for(&self, parity: usize) -> Option<DescriptorSetHandle> {
        let index = if self.sets.len() > 1 { parity } else { 0 };
        self.sets.get(index).copied()
    }
}

/// Which allocations [`RenderGraphExecutor::release_resources`] drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseScope {
    /// Screen-relative targets and history; fixed-size targets stay
    Resolution,
    All,
}

/// Executor for running the compiled render graph
#[derive(Debug, Default)]
pub struct RenderGraphExecutor {
    samplers: HashMap<SamplerKind, SamplerHandle>,

    /// Allocated textures mapped by resource ID
    textures: HashMap<ResourceId, PhysicalTexture>,
    /// Physical pairs keyed by the pair's `current` id
    history: HashMap<ResourceId, [PhysicalTexture; 2]>,
    parity: usize,
    history_valid: bool,

    /// External textures (like swapchain), rebound every frame
    externals: HashMap<ResourceId, PhysicalTexture>,

    /// Last known layout of every image the executor has transitioned
    layouts: HashMap<TextureHandle, TextureLayout>,
    pass_inputs: Vec<PassInputs>,
    extent: Extent2D,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create samplers, input set layouts and input sets. Nothing here
    /// depends on the window size.
    pub fn prepare(
        &mut self,
        graph: &RenderGraph,
        backend: &mut dyn GraphicsBackend,
        descriptors: &mut DescriptorManager,
    ) -> BackendResult<()> {
        if self.samplers.is_empty() {
            for (kind, desc) in [
                (SamplerKind::Point, SamplerDescriptor::point_clamp()),
                (SamplerKind::Linear, SamplerDescriptor::linear_clamp()),
                (SamplerKind::ShadowCompare, SamplerDescriptor::shadow_compare()),
            ] {
                let sampler = backend.create_sampler(&desc)?;
                self.samplers.insert(kind, sampler);
            }
        }

        self.pass_inputs.clear();
        for node in graph.pass_nodes() {
            let bindings: Vec<DescriptorBinding> = node
                .sampled_inputs()
                .enumerate()
                .map(|(binding, _)| {
                    DescriptorBinding::new(
                        binding as u32,
                        DescriptorType::CombinedImageSampler,
                        ShaderStageFlags::FRAGMENT,
                    )
                })
                .collect();
            if bindings.is_empty() {
                self.pass_inputs.push(PassInputs::default());
                continue;
            }

            let layout = descriptors.get_or_create_layout(backend, &bindings)?;
            let samples_history = node.sampled_inputs().any(|access| {
                matches!(
                    graph.resource(access.resource),
                    Some(VirtualResource::History { .. })
                )
            });
            let set_count = if samples_history { 2 } else { 1 };
            let mut sets = Vec::with_capacity(set_count);
            for _ in 0..set_count {
                sets.push(descriptors.allocate(backend, layout)?);
            }
            log::debug!(
                "Pass '{}': {} sampled inputs, {} input sets",
                node.name,
                bindings.len(),
                set_count
            );
            self.pass_inputs.push(PassInputs {
                layout: Some(layout),
                sets,
            });
        }
        Ok(())
    }

    /// Allocate resources needed for the render graph. Already allocated
    /// resources are kept.
    pub fn allocate_resources(
        &mut self,
        graph: &RenderGraph,
        backend: &mut dyn GraphicsBackend,
        extent: Extent2D,
    ) -> BackendResult<()> {
        self.extent = extent;
        for resource in graph.resources() {
            match resource {
                VirtualResource::Texture(tex) => {
                    if !self.textures.contains_key(&tex.id) {
                        let physical = create_physical(backend, &tex.name, &tex.info, extent)?;
                        self.textures.insert(tex.id, physical);
                    }
                }
                VirtualResource::History {
                    texture,
                    slot: HistorySlot::Current,
                } => {
                    if !self.history.contains_key(&texture.id) {
                        let a = create_physical(
                            backend,
                            &format!("{}_a", texture.name),
                            &texture.info,
                            extent,
                        )?;
                        let b = create_physical(
                            backend,
                            &format!("{}_b", texture.name),
                            &texture.info,
                            extent,
                        )?;
                        self.history.insert(texture.id, [a, b]);
                        self.parity = 0;
                        self.history_valid = false;
                    }
                }
                VirtualResource::History { .. } | VirtualResource::External { .. } => {
                    // Previous halves share the pair; externals are set per frame
                }
            }
        }
        log::debug!(
            "Render graph resources allocated for {}x{}: {} textures, {} history pairs",
            extent.width,
            extent.height,
            self.textures.len(),
            self.history.len()
        );
        Ok(())
    }

    /// Point every input set at the current physical images.
    pub fn write_input_sets(
        &self,
        graph: &RenderGraph,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        for (node, inputs) in graph.pass_nodes().iter().zip(&self.pass_inputs) {
            for (parity, set) in inputs.sets.iter().enumerate() {
                for (binding, access) in node.sampled_inputs().enumerate() {
                    let texture = self
                        .resolve(graph, access.resource, parity)
                        .ok_or_else(|| {
                            BackendError::InvalidHandle(format!(
                                "pass '{}' samples unallocated resource {:?}",
                                node.name, access.resource
                            ))
                        })?;
                    let sampler = access
                        .sampler
                        .and_then(|kind| self.samplers.get(&kind).copied())
                        .ok_or_else(|| {
                            BackendError::SamplerCreationFailed("samplers not prepared".into())
                        })?;
                    backend.write_descriptor(
                        *set,
                        binding as u32,
                        &DescriptorResource::CombinedImageSampler {
                            view: texture.view,
                            sampler,
                            layout: access.usage.layout(),
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Rebuild screen-relative targets for a new size and rewrite the input
    /// sets. Fixed-size targets, layouts and sets themselves are kept.
    pub fn resize(
        &mut self,
        graph: &RenderGraph,
        backend: &mut dyn GraphicsBackend,
        extent: Extent2D,
    ) -> BackendResult<()> {
        self.release_resources(backend, ReleaseScope::Resolution);
        self.allocate_resources(graph, backend, extent)?;
        self.write_input_sets(graph, backend)
    }

    /// Bind an external texture for this frame. Its contents are treated
    /// as undefined.
    pub fn set_external(
        &mut self,
        resource: ResourceId,
        texture: TextureHandle,
        view: TextureViewHandle,
        format: TextureFormat,
        extent: Extent2D,
    ) {
        self.layouts.insert(texture, TextureLayout::Undefined);
        self.externals.insert(
            resource,
            PhysicalTexture {
                texture,
                view,
                layer_views: Vec::new(),
                extent,
                format,
                array_layers: 1,
                is_relative: false,
            },
        );
    }

    /// Execute the render graph
    pub fn execute(
        &mut self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        cmd: &mut dyn CommandRecorder,
        frame: &FrameParams,
        draws: &[DrawCall],
    ) -> BackendResult<()> {
        let parity = self.parity;
        let resolved = resolve_all(
            graph,
            &self.textures,
            &self.history,
            &self.externals,
            parity,
        );

        for &pass_id in &compiled.pass_order {
            let (Some(node), Some(pass)) = (graph.get_pass_node(pass_id), graph.get_pass(pass_id))
            else {
                return Err(BackendError::InvalidHandle(format!("pass {:?}", pass_id)));
            };

            for access in node.inputs.iter().chain(node.outputs.iter()) {
                let texture = resolved.get(&access.resource).ok_or_else(|| {
                    BackendError::InvalidHandle(format!(
                        "pass '{}' uses unbound resource {:?}",
                        node.name, access.resource
                    ))
                })?;
                transition(&mut self.layouts, cmd, texture, access.usage.layout());
            }

            let mut ctx = PassExecuteContext {
                cmd: &mut *cmd,
                frame,
                draws,
                input_set: self
                    .pass_inputs
                    .get(pass_id.index())
                    .and_then(|inputs| inputs.set_for(parity)),
                history_valid: self.history_valid,
                textures: &resolved,
            };
            pass.execute(&mut ctx)?;
        }

        for resource in graph.resources() {
            if let VirtualResource::External { id, .. } = resource {
                if let Some(texture) = resolved.get(id) {
                    let written = self.layouts.get(&texture.texture).copied()
                        != Some(TextureLayout::Undefined);
                    if written {
                        transition(&mut self.layouts, cmd, texture, TextureLayout::PresentSrc);
                    }
                }
            }
        }
        drop(resolved);

        if !self.history.is_empty() {
            self.parity ^= 1;
            self.history_valid = true;
        }
        Ok(())
    }

    fn resolve(
        &self,
        graph: &RenderGraph,
        resource: ResourceId,
        parity: usize,
    ) -> Option<&PhysicalTexture> {
        resolve_one(
            graph,
            &self.textures,
            &self.history,
            &self.externals,
            resource,
            parity,
        )
    }

    /// Physical image behind a resource for the upcoming frame
    pub fn physical_texture(&self, graph: &RenderGraph, resource: ResourceId) -> Option<TextureHandle> {
        self.resolve(graph, resource, self.parity).map(|t| t.texture)
    }

    /// Last recorded layout of an image
    pub fn layout_of(&self, texture: TextureHandle) -> TextureLayout {
        self.layouts
            .get(&texture)
            .copied()
            .unwrap_or(TextureLayout::Undefined)
    }

    pub fn input_layout(&self, pass: PassId) -> Option<DescriptorSetLayoutHandle> {
        self.pass_inputs.get(pass.index()).and_then(|i| i.layout)
    }

    pub fn input_sets(&self, pass: PassId) -> &[DescriptorSetHandle] {
        self.pass_inputs
            .get(pass.index())
            .map(|i| i.sets.as_slice())
            .unwrap_or(&[])
    }

    /// Whether history images hold last frame's output
    pub fn history_valid(&self) -> bool {
        self.history_valid
    }

    pub fn parity(&self) -> usize {
        self.parity
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Clean up allocated resources
    pub fn release_resources(&mut self, backend: &mut dyn GraphicsBackend, scope: ReleaseScope) {
        let released: Vec<ResourceId> = self
            .textures
            .iter()
            .filter(|(_, t)| scope == ReleaseScope::All || t.is_relative)
            .map(|(id, _)| *id)
            .collect();
        for id in released {
            if let Some(texture) = self.textures.remove(&id) {
                self.destroy_physical(backend, texture);
            }
        }
        let pairs: Vec<[PhysicalTexture; 2]> = self.history.drain().map(|(_, p)| p).collect();
        for [a, b] in pairs {
            self.destroy_physical(backend, a);
            self.destroy_physical(backend, b);
        }
        self.history_valid = false;
        self.parity = 0;
        if scope == ReleaseScope::All {
            self.externals.clear();
        }
    }

    fn destroy_physical(&mut self, backend: &mut dyn GraphicsBackend, texture: PhysicalTexture) {
        for view in texture.layer_views {
            backend.destroy_texture_view(view);
        }
        backend.destroy_texture_view(texture.view);
        backend.destroy_texture(texture.texture);
        self.layouts.remove(&texture.texture);
    }

    /// Destroy every image and sampler. Input sets go with the descriptor pool.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_resources(backend, ReleaseScope::All);
        for (_, sampler) in self.samplers.drain() {
            backend.destroy_sampler(sampler);
        }
        self.pass_inputs.clear();
        self.layouts.clear();
    }
}

fn create_physical(
    backend: &mut dyn GraphicsBackend,
    name: &str,
    info: &TextureInfo,
    screen: Extent2D,
) -> BackendResult<PhysicalTexture> {
    let extent = info.size.resolve(screen);
    let layered = info.array_layers > 1;
    let desc = TextureDescriptor {
        label: Some(name.to_string()),
        width: extent.width,
        height: extent.height,
        array_layers: info.array_layers,
        mip_levels: 1,
        format: info.format,
        usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        view_dimension: if layered {
            TextureViewDimension::D2Array
        } else {
            TextureViewDimension::D2
        },
    };
    let texture = backend.create_texture(&desc)?;
    let view = backend.create_texture_view(texture, &TextureViewDescriptor::full(&desc))?;
    let mut layer_views = Vec::new();
    if layered {
        for layer in 0..info.array_layers {
            layer_views.push(backend.create_texture_view(texture, &TextureViewDescriptor::layer(layer))?);
        }
    }
    log::trace!(
        "Allocated '{}' {}x{}x{} {:?}",
        name,
        extent.width,
        extent.height,
        info.array_layers,
        info.format
    );
    Ok(PhysicalTexture {
        texture,
        view,
        layer_views,
        extent,
        format: info.format,
        array_layers: info.array_layers,
        is_relative: info.size.is_relative(),
    })
}

fn resolve_one<'a>(
    graph: &RenderGraph,
    textures: &'a HashMap<ResourceId, PhysicalTexture>,
    history: &'a HashMap<ResourceId, [PhysicalTexture; 2]>,
    externals: &'a HashMap<ResourceId, PhysicalTexture>,
    resource: ResourceId,
    parity: usize,
) -> Option<&'a PhysicalTexture> {
    match graph.resource(resource)? {
        VirtualResource::Texture(_) => textures.get(&resource),
        VirtualResource::External { .. } => externals.get(&resource),
        VirtualResource::History { slot, .. } => {
            let pair = graph
                .history_pairs()
                .iter()
                .find(|p| p.current == resource || p.previous == resource)?;
            let physical = history.get(&pair.current)?;
            let index = match slot {
                HistorySlot::Current => parity,
                HistorySlot::Previous => parity ^ 1,
            };
            physical.get(index)
        }
    }
}

fn resolve_all<'a>(
    graph: &RenderGraph,
    textures: &'a HashMap<ResourceId, PhysicalTexture>,
    history: &'a HashMap<ResourceId, [PhysicalTexture; 2]>,
    externals: &'a HashMap<ResourceId, PhysicalTexture>,
    parity: usize,
) -> HashMap<ResourceId, &'a PhysicalTexture> {
    graph
        .resources()
        .iter()
        .filter_map(|r| {
            resolve_one(graph, textures, history, externals, r.id(), parity).map(|t| (r.id(), t))
        })
        .collect()
}

fn transition(
    layouts: &mut HashMap<TextureHandle, TextureLayout>,
    cmd: &mut dyn CommandRecorder,
    texture: &PhysicalTexture,
    new_layout: TextureLayout,
) {
    let old_layout = layouts
        .get(&texture.texture)
        .copied()
        .unwrap_or(TextureLayout::Undefined);
    if old_layout == new_layout && !new_layout.is_attachment() {
        return;
    }
    cmd.cmd_image_barrier(&ImageBarrier::whole(
        texture.texture,
        texture.format.aspect(),
        old_layout,
        new_layout,
        1,
        texture.array_layers,
    ));
    layouts.insert(texture.texture, new_layout);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::descriptor::DescriptorManager;
    use crate::pipeline::DebugView;

    /// Records one draw per pass so ordering is visible in the command log.
    struct NullPass {
        name: &'static str,
        samples: Vec<ResourceId>,
        writes: Vec<(ResourceId, ResourceUsage)>,
    }

    impl RenderPass for NullPass {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            for r in &self.samples {
                ctx.sample(*r, SamplerKind::Linear);
            }
            for (r, usage) in &self.writes {
                ctx.write(*r, *usage);
            }
        }

        fn create_pipelines(&mut self, _ctx: &mut PipelineSetupContext) -> BackendResult<()> {
            Ok(())
        }

        fn destroy_pipelines(&mut self, _backend: &mut dyn GraphicsBackend) {}

        fn execute(&self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
            for (r, _) in &self.writes {
                ctx.view(*r)?;
            }
            ctx.cmd.cmd_draw(0..3, 0..1);
            Ok(())
        }
    }

    struct Fixture {
        backend: DummyBackend,
        descriptors: DescriptorManager,
        graph: RenderGraph,
        compiled: CompiledGraph,
        executor: RenderGraphExecutor,
        swapchain: ResourceId,
        history: HistoryPair,
        shadow: ResourceId,
        frame: FrameParams,
    }

    fn fixture() -> Fixture {
        let mut backend = DummyBackend::new();
        let mut descriptors = DescriptorManager::new(&mut backend, 64).unwrap();
        let mut graph = RenderGraph::new();
        let swapchain = graph.register_external("swapchain");
        let shadow = graph.create_texture(
            "shadow",
            TextureInfo::fixed(TextureFormat::Depth32Float, 512, 512, 3),
        );
        let hdr = graph.create_texture("hdr", TextureInfo::screen(TextureFormat::Rgba16Float));
        let history = graph.create_history("history", TextureInfo::screen(TextureFormat::Rgba16Float));

        graph.add_pass(NullPass {
            name: "shadow",
            samples: vec![],
            writes: vec![(shadow, ResourceUsage::DepthStencilWrite)],
        });
        graph.add_pass(NullPass {
            name: "light",
            samples: vec![shadow],
            writes: vec![(hdr, ResourceUsage::RenderTarget)],
        });
        graph.add_pass(NullPass {
            name: "resolve",
            samples: vec![hdr, history.previous],
            writes: vec![(history.current, ResourceUsage::RenderTarget)],
        });
        graph.add_pass(NullPass {
            name: "present",
            samples: vec![history.current],
            writes: vec![(swapchain, ResourceUsage::RenderTarget)],
        });
        let compiled = graph.compile().unwrap();

        let mut executor = RenderGraphExecutor::new();
        executor.prepare(&graph, &mut backend, &mut descriptors).unwrap();
        executor
            .allocate_resources(&graph, &mut backend, Extent2D::new(320, 240))
            .unwrap();
        executor.write_input_sets(&graph, &mut backend).unwrap();

        let global_layout = descriptors
            .get_or_create_layout(&mut backend, &[])
            .unwrap();
        let global_set = descriptors.allocate(&mut backend, global_layout).unwrap();
        let frame = FrameParams {
            extent: Extent2D::new(320, 240),
            global_set,
            frame_number: 0,
            debug_view: DebugView::Final,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        };

        Fixture {
            backend,
            descriptors,
            graph,
            compiled,
            executor,
            swapchain,
            history,
            shadow,
            frame,
        }
    }

    fn run_frame(f: &mut Fixture) -> Vec<RecordedCommand> {
        let chain = f
            .backend
            .create_swapchain(
                &SwapchainConfig {
                    format: SurfaceFormat {
                        format: TextureFormat::Bgra8UnormSrgb,
                        color_space: ColorSpace::SrgbNonlinear,
                    },
                    present_mode: PresentMode::Fifo,
                    extent: Extent2D::new(320, 240),
                    image_count: 1,
                },
                None,
            )
            .unwrap();
        let view = f
            .backend
            .create_texture_view(chain.images[0], &TextureViewDescriptor::layer(0))
            .unwrap();
        f.executor.set_external(
            f.swapchain,
            chain.images[0],
            view,
            TextureFormat::Bgra8UnormSrgb,
            Extent2D::new(320, 240),
        );

        let cmd = f.backend.allocate_command_buffers(1).unwrap()[0];
        f.backend.begin_command_buffer(cmd).unwrap();
        f.executor
            .execute(&f.graph, &f.compiled, &mut f.backend, &f.frame, &[])
            .unwrap();
        f.backend.end_command_buffer().unwrap();
        f.backend
            .submit(&SubmitInfo {
                command_buffer: cmd,
                wait_semaphore: None,
                signal_semaphore: None,
                fence: None,
            })
            .unwrap();
        f.backend.last_frame_commands().unwrap().to_vec()
    }

    fn barriers(commands: &[RecordedCommand]) -> Vec<ImageBarrier> {
        commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Barrier(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_frame_transitions_from_undefined() {
        let mut f = fixture();
        let commands = run_frame(&mut f);
        let shadow = f.executor.physical_texture(&f.graph, f.shadow).unwrap();

        let shadow_barriers: Vec<_> = barriers(&commands)
            .into_iter()
            .filter(|b| b.texture == shadow)
            .collect();
        assert_eq!(shadow_barriers[0].old_layout, TextureLayout::Undefined);
        assert_eq!(
            shadow_barriers[0].new_layout,
            TextureLayout::DepthStencilAttachment
        );
        assert_eq!(shadow_barriers[0].array_layer_count, 3);
        assert_eq!(
            shadow_barriers[1].new_layout,
            TextureLayout::DepthStencilReadOnly
        );
    }

    #[test]
    fn test_layouts_persist_across_frames() {
        let mut f = fixture();
        run_frame(&mut f);
        let commands = run_frame(&mut f);
        let shadow = f.executor.physical_texture(&f.graph, f.shadow).unwrap();

        let first = barriers(&commands)
            .into_iter()
            .find(|b| b.texture == shadow)
            .unwrap();
        assert_eq!(first.old_layout, TextureLayout::DepthStencilReadOnly);
        assert_eq!(first.new_layout, TextureLayout::DepthStencilAttachment);
    }

    #[test]
    fn test_swapchain_ends_in_present_layout() {
        let mut f = fixture();
        let commands = run_frame(&mut f);
        let last = barriers(&commands).pop().unwrap();
        assert_eq!(last.old_layout, TextureLayout::ColorAttachment);
        assert_eq!(last.new_layout, TextureLayout::PresentSrc);
        assert!(matches!(commands.last(), Some(RecordedCommand::Barrier(_))));
    }

    #[test]
    fn test_history_flips_every_frame() {
        let mut f = fixture();
        assert!(!f.executor.history_valid());
        let current_0 = f.executor.physical_texture(&f.graph, f.history.current).unwrap();
        let previous_0 = f.executor.physical_texture(&f.graph, f.history.previous).unwrap();
        assert_ne!(current_0, previous_0);

        run_frame(&mut f);
        assert!(f.executor.history_valid());
        assert_eq!(
            f.executor.physical_texture(&f.graph, f.history.current),
            Some(previous_0)
        );
        assert_eq!(
            f.executor.physical_texture(&f.graph, f.history.previous),
            Some(current_0)
        );

        let resolve = f.graph.find_pass("resolve").unwrap();
        assert_eq!(f.executor.input_sets(resolve).len(), 2);
        let light = f.graph.find_pass("light").unwrap();
        assert_eq!(f.executor.input_sets(light).len(), 1);
    }

    #[test]
    fn test_resize_keeps_fixed_targets_and_resets_history() {
        let mut f = fixture();
        run_frame(&mut f);
        let shadow = f.executor.physical_texture(&f.graph, f.shadow).unwrap();
        let current = f.executor.physical_texture(&f.graph, f.history.current).unwrap();
        let before = f.backend.live_resources();

        f.executor
            .resize(&f.graph, &mut f.backend, Extent2D::new(640, 480))
            .unwrap();

        assert_eq!(f.executor.physical_texture(&f.graph, f.shadow), Some(shadow));
        assert_ne!(
            f.executor.physical_texture(&f.graph, f.history.current),
            Some(current)
        );
        assert!(!f.executor.history_valid());
        assert_eq!(f.backend.live_resources(), before);
        assert!(f.backend.hazards().is_empty());
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut f = fixture();
        run_frame(&mut f);
        f.executor.destroy(&mut f.backend);
        f.descriptors.destroy(&mut f.backend);
        let live = f.backend.live_resources();
        assert_eq!(live.textures, 0);
        assert_eq!(live.samplers, 0);
        assert!(f.backend.hazards().is_empty());
    }
}
