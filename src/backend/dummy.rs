//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It records every
//! command, simulates fences and the presentation engine, keeps buffer
//! contents in memory and counts live handles, so the frame driver can be
//! exercised without GPU hardware.
//!
//! Misuse that would be undefined behaviour on a real device (writing a
//! buffer the GPU may still read, resetting a pending fence, destroying a
//! handle twice, presenting an image that was never acquired) is collected
//! in [`DummyBackend::hazards`] instead of crashing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::backend::traits::*;
use crate::backend::types::*;

/// A command recorded into a command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Barrier(ImageBarrier),
    BeginRendering(RenderingInfo),
    EndRendering,
    SetViewport(Viewport),
    SetScissor {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    BindPipeline(PipelineHandle),
    BindDescriptorSet {
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    },
    PushConstants {
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer(BufferHandle),
    BindIndexBuffer(BufferHandle),
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    CopyBufferToTexture {
        buffer: BufferHandle,
        texture: TextureHandle,
        region: TextureCopyRegion,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    },
}

/// Host-side event, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyEvent {
    FenceWait(FenceHandle),
    FenceReset(FenceHandle),
    BufferWrite(BufferHandle),
    Acquire {
        swapchain: SwapchainHandle,
        image_index: u32,
    },
    AcquireStale(SwapchainHandle),
    Submit {
        command_buffer: CommandBufferHandle,
        fence: Option<FenceHandle>,
    },
    Present {
        swapchain: SwapchainHandle,
        image_index: u32,
        result: PresentResult,
    },
    WaitIdle,
    SwapchainCreated {
        swapchain: SwapchainHandle,
        extent: Extent2D,
        image_count: u32,
    },
    SwapchainDestroyed(SwapchainHandle),
}

/// One queue submission and the commands it carried.
#[derive(Debug, Clone)]
pub struct Submission {
    pub info: Option<SubmitInfo>,
    pub commands: Vec<RecordedCommand>,
}

impl Submission {
    /// Whether this was a blocking one-shot submission.
    pub fn is_immediate(&self) -> bool {
        self.info.is_none()
    }
}

/// Number of live objects of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    pub buffers: usize,
    pub textures: usize,
    pub texture_views: usize,
    pub samplers: usize,
    pub shader_modules: usize,
    pub pipelines: usize,
    pub pipeline_layouts: usize,
    pub descriptor_set_layouts: usize,
    pub descriptor_pools: usize,
    pub descriptor_sets: usize,
    pub semaphores: usize,
    pub fences: usize,
    pub command_buffers: usize,
    pub swapchains: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

#[derive(Debug)]
struct DummyBuffer {
    location: MemoryLocation,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DummyTexture {
    desc: TextureDescriptor,
    swapchain_image: bool,
}

#[derive(Debug)]
struct DummySet {
    pool: DescriptorPoolHandle,
    writes: BTreeMap<u32, DescriptorResource>,
}

#[derive(Debug)]
struct DummySwapchain {
    config: SwapchainConfig,
    images: Vec<TextureHandle>,
    next_image: u32,
    acquired: HashSet<u32>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    capabilities: DeviceCapabilities,
    surface: SurfaceSupport,
    next_id: u64,

    buffers: HashMap<BufferHandle, DummyBuffer>,
    textures: HashMap<TextureHandle, DummyTexture>,
    views: HashMap<TextureViewHandle, TextureHandle>,
    samplers: HashSet<SamplerHandle>,
    shader_modules: HashMap<ShaderModuleHandle, PathBuf>,
    missing_shaders: HashSet<String>,
    pools: HashSet<DescriptorPoolHandle>,
    set_layouts: HashMap<DescriptorSetLayoutHandle, Vec<DescriptorBinding>>,
    sets: HashMap<DescriptorSetHandle, DummySet>,
    pipeline_layouts: HashSet<PipelineLayoutHandle>,
    pipelines: HashMap<PipelineHandle, GraphicsPipelineDescriptor>,
    semaphores: HashSet<SemaphoreHandle>,
    fences: HashMap<FenceHandle, FenceState>,
    command_buffers: HashMap<CommandBufferHandle, Vec<RecordedCommand>>,
    swapchains: HashMap<SwapchainHandle, DummySwapchain>,

    recording: Option<CommandBufferHandle>,
    in_flight: HashMap<BufferHandle, FenceHandle>,
    stale_acquires: u32,
    suboptimal_presents: u32,

    texture_labels: HashMap<TextureHandle, String>,
    view_textures: HashMap<TextureViewHandle, TextureHandle>,
    events: Vec<DummyEvent>,
    submissions: Vec<Submission>,
    hazards: Vec<String>,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a new dummy backend with a desktop-like surface: sRGB BGRA
    /// format, FIFO + mailbox, minimum two images, free extent.
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                device_name: "Dummy Device".into(),
                graphics_family: 0,
                present_family: 0,
                compute_family: Some(0),
                ray_tracing: false,
                dynamic_rendering: true,
                synchronization2: true,
                max_sampler_anisotropy: 16.0,
                max_image_dimension_2d: 16384,
            },
            surface: SurfaceSupport {
                capabilities: SurfaceCapabilities {
                    min_image_count: 2,
                    max_image_count: 8,
                    current_extent: None,
                    min_image_extent: Extent2D::new(1, 1),
                    max_image_extent: Extent2D::new(16384, 16384),
                },
                formats: vec![
                    SurfaceFormat {
                        format: TextureFormat::Bgra8UnormSrgb,
                        color_space: ColorSpace::SrgbNonlinear,
                    },
                    SurfaceFormat {
                        format: TextureFormat::Bgra8Unorm,
                        color_space: ColorSpace::SrgbNonlinear,
                    },
                ],
                present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
            },
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashSet::new(),
            shader_modules: HashMap::new(),
            missing_shaders: HashSet::new(),
            pools: HashSet::new(),
            set_layouts: HashMap::new(),
            sets: HashMap::new(),
            pipeline_layouts: HashSet::new(),
            pipelines: HashMap::new(),
            semaphores: HashSet::new(),
            fences: HashMap::new(),
            command_buffers: HashMap::new(),
            swapchains: HashMap::new(),
            recording: None,
            in_flight: HashMap::new(),
            stale_acquires: 0,
            suboptimal_presents: 0,
            texture_labels: HashMap::new(),
            view_textures: HashMap::new(),
            events: Vec::new(),
            submissions: Vec::new(),
            hazards: Vec::new(),
        }
    }

    /// Replace the reported surface support.
    pub fn with_surface_support(mut self, surface: SurfaceSupport) -> Self {
        self.surface = surface;
        self
    }

    /// Make `create_shader_module` fail for any path ending in `file_name`.
    pub fn with_missing_shader(mut self, file_name: &str) -> Self {
        self.missing_shaders.insert(file_name.to_string());
        self
    }

    /// Pin the surface extent, as a platform does after a window resize.
    /// Chains with a different extent become stale.
    pub fn set_surface_extent(&mut self, extent: Option<Extent2D>) {
        self.surface.capabilities.current_extent = extent;
    }

    /// Make the next `count` acquires report a stale chain.
    pub fn inject_stale_acquires(&mut self, count: u32) {
        self.stale_acquires += count;
    }

    /// Make the next `count` presents report a suboptimal chain.
    pub fn inject_suboptimal_presents(&mut self, count: u32) {
        self.suboptimal_presents += count;
    }

    pub fn events(&self) -> &[DummyEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
        self.submissions.clear();
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Commands of the most recent non-immediate submission.
    pub fn last_frame_commands(&self) -> Option<&[RecordedCommand]> {
        self.submissions
            .iter()
            .rev()
            .find(|s| !s.is_immediate())
            .map(|s| s.commands.as_slice())
    }

    pub fn hazards(&self) -> &[String] {
        &self.hazards
    }

    pub fn live_resources(&self) -> ResourceCounts {
        ResourceCounts {
            buffers: self.buffers.len(),
            textures: self
                .textures
                .values()
                .filter(|t| !t.swapchain_image)
                .count(),
            texture_views: self.views.len(),
            samplers: self.samplers.len(),
            shader_modules: self.shader_modules.len(),
            pipelines: self.pipelines.len(),
            pipeline_layouts: self.pipeline_layouts.len(),
            descriptor_set_layouts: self.set_layouts.len(),
            descriptor_pools: self.pools.len(),
            descriptor_sets: self.sets.len(),
            semaphores: self.semaphores.len(),
            fences: self.fences.len(),
            command_buffers: self.command_buffers.len(),
            swapchains: self.swapchains.len(),
        }
    }

    /// Label a texture was created with; kept after destruction.
    pub fn texture_label(&self, texture: TextureHandle) -> Option<&str> {
        self.texture_labels.get(&texture).map(String::as_str)
    }

    /// Descriptor of a live texture.
    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture).map(|t| &t.desc)
    }

    /// Texture a view was created from; kept after destruction.
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.view_textures.get(&view).copied()
    }

    /// Bindings written into a live descriptor set.
    pub fn descriptor_writes(&self, set: DescriptorSetHandle) -> Vec<(u32, DescriptorResource)> {
        self.sets
            .get(&set)
            .map(|s| s.writes.iter().map(|(b, r)| (*b, *r)).collect())
            .unwrap_or_default()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    pub fn pipeline_desc(&self, pipeline: PipelineHandle) -> Option<&GraphicsPipelineDescriptor> {
        self.pipelines.get(&pipeline)
    }

    pub fn shader_path(&self, module: ShaderModuleHandle) -> Option<&Path> {
        self.shader_modules.get(&module).map(PathBuf::as_path)
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn hazard(&mut self, message: String) {
        log::warn!("DummyBackend hazard: {}", message);
        self.hazards.push(message);
    }

    fn record(&mut self, command: RecordedCommand) {
        match self.recording {
            Some(cmd) => {
                if let Some(list) = self.command_buffers.get_mut(&cmd) {
                    list.push(command);
                }
            }
            None => self.hazard(format!("{:?} recorded outside a command buffer", command)),
        }
    }

    fn chain_is_stale(&self, swapchain: &DummySwapchain) -> bool {
        matches!(
            self.surface.capabilities.current_extent,
            Some(extent) if extent != swapchain.config.extent
        )
    }

    /// Buffers the GPU may read while executing these commands.
    fn referenced_buffers(&self, commands: &[RecordedCommand]) -> HashSet<BufferHandle> {
        let mut buffers = HashSet::new();
        for command in commands {
            match command {
                RecordedCommand::BindVertexBuffer(b) | RecordedCommand::BindIndexBuffer(b) => {
                    buffers.insert(*b);
                }
                RecordedCommand::BindDescriptorSet { set, .. } => {
                    if let Some(set) = self.sets.get(set) {
                        for resource in set.writes.values() {
                            if let DescriptorResource::Buffer { buffer, .. } = resource {
                                buffers.insert(*buffer);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        buffers
    }
}

impl CommandRecorder for DummyBackend {
    fn cmd_image_barrier(&mut self, barrier: &ImageBarrier) {
        if !self.textures.contains_key(&barrier.texture) {
            self.hazard(format!("barrier on unknown texture {:?}", barrier.texture));
        }
        self.record(RecordedCommand::Barrier(*barrier));
    }

    fn cmd_begin_rendering(&mut self, info: &RenderingInfo) {
        self.record(RecordedCommand::BeginRendering(info.clone()));
    }

    fn cmd_end_rendering(&mut self) {
        self.record(RecordedCommand::EndRendering);
    }

    fn cmd_set_viewport(&mut self, viewport: &Viewport) {
        self.record(RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.record(RecordedCommand::SetScissor {
            x,
            y,
            width,
            height,
        });
    }

    fn cmd_bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.record(RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        if !self.sets.contains_key(&set) {
            self.hazard(format!("bind of unknown descriptor set {:?}", set));
        }
        self.record(RecordedCommand::BindDescriptorSet {
            layout,
            set_index,
            set,
        });
    }

    fn cmd_push_constants(
        &mut self,
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        if offset as usize + data.len() > 128 {
            self.hazard(format!(
                "push constants exceed 128 bytes ({} + {})",
                offset,
                data.len()
            ));
        }
        self.record(RecordedCommand::PushConstants {
            layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffer(&mut self, buffer: BufferHandle, _offset: u64) {
        self.record(RecordedCommand::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle, _offset: u64) {
        self.record(RecordedCommand::BindIndexBuffer(buffer));
    }

    fn cmd_draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(RecordedCommand::Draw {
            vertices,
            instances,
        });
    }

    fn cmd_draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        buffer: BufferHandle,
        texture: TextureHandle,
        region: &TextureCopyRegion,
    ) {
        let problem = match self.textures.get(&texture) {
            Some(t) if region.mip_level >= t.desc.mip_levels => Some(format!(
                "copy into mip {} of {:?} which has {} levels",
                region.mip_level, texture, t.desc.mip_levels
            )),
            Some(t) if t.desc.mip_extent(region.mip_level) != (region.width, region.height) => {
                Some(format!(
                    "copy of {}x{} into mip {} of {:?} has the wrong extent",
                    region.width, region.height, region.mip_level, texture
                ))
            }
            Some(_) => None,
            None => Some(format!("copy into unknown texture {:?}", texture)),
        };
        if let Some(message) = problem {
            self.hazard(message);
        }
        self.record(RecordedCommand::CopyBufferToTexture {
            buffer,
            texture,
            region: *region,
        });
    }

    fn cmd_copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) {
        let data = self
            .buffers
            .get(&src)
            .map(|b| b.data[..size as usize].to_vec());
        if let (Some(data), Some(dst_buffer)) = (data, self.buffers.get_mut(&dst)) {
            dst_buffer.data[..size as usize].copy_from_slice(&data);
        }
        self.record(RecordedCommand::CopyBuffer { src, dst, size });
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        for state in self.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        self.in_flight.clear();
        self.events.push(DummyEvent::WaitIdle);
        Ok(())
    }

    fn surface_support(&self) -> BackendResult<SurfaceSupport> {
        Ok(self.surface.clone())
    }

    fn create_swapchain(
        &mut self,
        config: &SwapchainConfig,
        old: Option<SwapchainHandle>,
    ) -> BackendResult<SwapchainImages> {
        if config.extent.is_zero_area() {
            return Err(BackendError::SwapchainCreationFailed(
                "zero-area extent".into(),
            ));
        }
        if let Some(old) = old {
            if !self.swapchains.contains_key(&old) {
                self.hazard(format!("retiring unknown swapchain {:?}", old));
            }
        }

        let handle = SwapchainHandle(self.next());
        let mut images = Vec::with_capacity(config.image_count as usize);
        for i in 0..config.image_count {
            let texture = TextureHandle(self.next());
            let desc = TextureDescriptor {
                label: Some(format!("swapchain_image_{}", i)),
                width: config.extent.width,
                height: config.extent.height,
                format: config.format.format,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST,
                ..Default::default()
            };
            self.texture_labels
                .insert(texture, format!("swapchain_image_{}", i));
            self.textures.insert(
                texture,
                DummyTexture {
                    desc,
                    swapchain_image: true,
                },
            );
            images.push(texture);
        }

        self.swapchains.insert(
            handle,
            DummySwapchain {
                config: *config,
                images: images.clone(),
                next_image: 0,
                acquired: HashSet::new(),
            },
        );
        self.events.push(DummyEvent::SwapchainCreated {
            swapchain: handle,
            extent: config.extent,
            image_count: config.image_count,
        });
        Ok(SwapchainImages {
            swapchain: handle,
            images,
        })
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        match self.swapchains.remove(&swapchain) {
            Some(chain) => {
                for image in chain.images {
                    self.textures.remove(&image);
                }
                self.events.push(DummyEvent::SwapchainDestroyed(swapchain));
            }
            None => self.hazard(format!("double destroy of swapchain {:?}", swapchain)),
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> BackendResult<Option<u32>> {
        if !self.semaphores.contains(&signal) {
            self.hazard(format!("acquire signals unknown semaphore {:?}", signal));
        }
        let stale = match self.swapchains.get(&swapchain) {
            Some(chain) => self.chain_is_stale(chain),
            None => {
                return Err(BackendError::InvalidHandle(format!(
                    "swapchain {:?}",
                    swapchain
                )))
            }
        };
        if stale || self.stale_acquires > 0 {
            self.stale_acquires = self.stale_acquires.saturating_sub(1);
            self.events.push(DummyEvent::AcquireStale(swapchain));
            return Ok(None);
        }

        let Some(chain) = self.swapchains.get_mut(&swapchain) else {
            return Err(BackendError::InvalidHandle(format!(
                "swapchain {:?}",
                swapchain
            )));
        };
        let image_index = chain.next_image % chain.images.len() as u32;
        chain.next_image = chain.next_image.wrapping_add(1);
        let newly_acquired = chain.acquired.insert(image_index);
        if !newly_acquired {
            self.hazard(format!("image {} acquired twice without present", image_index));
        }
        self.events.push(DummyEvent::Acquire {
            swapchain,
            image_index,
        });
        Ok(Some(image_index))
    }

    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<PresentResult> {
        if !self.semaphores.contains(&wait) {
            self.hazard(format!("present waits on unknown semaphore {:?}", wait));
        }
        let (was_acquired, stale) = match self.swapchains.get_mut(&swapchain) {
            Some(chain) => (chain.acquired.remove(&image_index), false),
            None => {
                return Err(BackendError::InvalidHandle(format!(
                    "swapchain {:?}",
                    swapchain
                )))
            }
        };
        if !was_acquired {
            self.hazard(format!("image {} presented without acquire", image_index));
        }
        let stale = stale
            || self
                .swapchains
                .get(&swapchain)
                .is_some_and(|chain| self.chain_is_stale(chain));

        let result = if stale {
            PresentResult::OutOfDate
        } else if self.suboptimal_presents > 0 {
            self.suboptimal_presents -= 1;
            PresentResult::Suboptimal
        } else {
            PresentResult::Success
        };
        self.events.push(DummyEvent::Present {
            swapchain,
            image_index,
            result,
        });
        Ok(result)
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let handle = SemaphoreHandle(self.next());
        self.semaphores.insert(handle);
        Ok(handle)
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if !self.semaphores.remove(&semaphore) {
            self.hazard(format!("double destroy of semaphore {:?}", semaphore));
        }
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let handle = FenceHandle(self.next());
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.fences.insert(handle, state);
        Ok(handle)
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        match self.fences.remove(&fence) {
            Some(FenceState::Pending) => {
                self.hazard(format!("destroy of in-flight fence {:?}", fence))
            }
            Some(_) => {}
            None => self.hazard(format!("double destroy of fence {:?}", fence)),
        }
    }

    fn wait_for_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        self.events.push(DummyEvent::FenceWait(fence));
        match self.fences.get(&fence).copied() {
            Some(FenceState::Pending) => {
                self.fences.insert(fence, FenceState::Signaled);
                self.in_flight.retain(|_, f| *f != fence);
                Ok(())
            }
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Unsignaled) => {
                self.hazard(format!("wait on fence {:?} that will never signal", fence));
                Err(BackendError::SyncFailed(format!(
                    "fence {:?} has no pending work",
                    fence
                )))
            }
            None => Err(BackendError::InvalidHandle(format!("fence {:?}", fence))),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        self.events.push(DummyEvent::FenceReset(fence));
        match self.fences.get(&fence).copied() {
            Some(FenceState::Pending) => {
                self.hazard(format!("reset of in-flight fence {:?}", fence));
                Ok(())
            }
            Some(_) => {
                self.fences.insert(fence, FenceState::Unsignaled);
                Ok(())
            }
            None => Err(BackendError::InvalidHandle(format!("fence {:?}", fence))),
        }
    }

    fn allocate_command_buffers(&mut self, count: u32) -> BackendResult<Vec<CommandBufferHandle>> {
        Ok((0..count)
            .map(|_| {
                let handle = CommandBufferHandle(self.next());
                self.command_buffers.insert(handle, Vec::new());
                handle
            })
            .collect())
    }

    fn free_command_buffers(&mut self, command_buffers: &[CommandBufferHandle]) {
        for cmd in command_buffers {
            if self.command_buffers.remove(cmd).is_none() {
                self.hazard(format!("double free of command buffer {:?}", cmd));
            }
        }
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        if self.recording.is_some() {
            return Err(BackendError::CommandFailed(
                "another command buffer is already recording".into(),
            ));
        }
        let Some(list) = self.command_buffers.get_mut(&command_buffer) else {
            return Err(BackendError::InvalidHandle(format!(
                "command buffer {:?}",
                command_buffer
            )));
        };
        list.clear();
        self.recording = Some(command_buffer);
        Ok(())
    }

    fn end_command_buffer(&mut self) -> BackendResult<()> {
        match self.recording.take() {
            Some(_) => Ok(()),
            None => Err(BackendError::CommandFailed(
                "no command buffer is recording".into(),
            )),
        }
    }

    fn submit(&mut self, info: &SubmitInfo) -> BackendResult<()> {
        let commands = self
            .command_buffers
            .get(&info.command_buffer)
            .cloned()
            .ok_or_else(|| {
                BackendError::InvalidHandle(format!("command buffer {:?}", info.command_buffer))
            })?;

        if let Some(fence) = info.fence {
            match self.fences.get(&fence).copied() {
                Some(FenceState::Unsignaled) => {
                    self.fences.insert(fence, FenceState::Pending);
                }
                Some(state) => {
                    self.hazard(format!("submit with fence {:?} in state {:?}", fence, state));
                    self.fences.insert(fence, FenceState::Pending);
                }
                None => return Err(BackendError::InvalidHandle(format!("fence {:?}", fence))),
            }
            for buffer in self.referenced_buffers(&commands) {
                self.in_flight.insert(buffer, fence);
            }
        }

        self.events.push(DummyEvent::Submit {
            command_buffer: info.command_buffer,
            fence: info.fence,
        });
        self.submissions.push(Submission {
            info: Some(*info),
            commands,
        });
        Ok(())
    }

    fn submit_immediate(
        &mut self,
        record: &mut dyn FnMut(&mut dyn CommandRecorder),
    ) -> BackendResult<()> {
        let previous = self.recording.take();
        let cmd = CommandBufferHandle(self.next());
        self.command_buffers.insert(cmd, Vec::new());
        self.recording = Some(cmd);
        record(self);
        self.recording = previous;
        let commands = self.command_buffers.remove(&cmd).unwrap_or_default();
        self.submissions.push(Submission {
            info: None,
            commands,
        });
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let handle = BufferHandle(self.next());
        self.buffers.insert(
            handle,
            DummyBuffer {
                location: desc.location,
                data: vec![0; desc.size as usize],
            },
        );
        Ok(handle)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(desc)?;
        if let Some(buffer) = self.buffers.get_mut(&handle) {
            let len = data.len().min(buffer.data.len());
            buffer.data[..len].copy_from_slice(&data[..len]);
        }
        Ok(handle)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        self.events.push(DummyEvent::BufferWrite(buffer));
        if let Some(fence) = self.in_flight.get(&buffer).copied() {
            self.hazard(format!(
                "CPU write to {:?} while fence {:?} is pending",
                buffer, fence
            ));
        }
        let Some(target) = self.buffers.get_mut(&buffer) else {
            return Err(BackendError::InvalidHandle(format!("buffer {:?}", buffer)));
        };
        if target.location != MemoryLocation::CpuToGpu {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} is not host visible",
                buffer
            )));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(BackendError::BufferCreationFailed(format!(
                "write of {} bytes at {} overflows {:?} ({} bytes)",
                data.len(),
                offset,
                buffer,
                target.data.len()
            )));
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_none() {
            self.hazard(format!("double destroy of buffer {:?}", buffer));
        }
        self.in_flight.remove(&buffer);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.array_layers == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: zero-sized texture",
                desc.label
            )));
        }
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.array_layers
        );
        let handle = TextureHandle(self.next());
        if let Some(label) = &desc.label {
            self.texture_labels.insert(handle, label.clone());
        }
        self.textures.insert(
            handle,
            DummyTexture {
                desc: desc.clone(),
                swapchain_image: false,
            },
        );
        Ok(handle)
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let Some(owner) = self.textures.get(&texture) else {
            return Err(BackendError::InvalidHandle(format!("texture {:?}", texture)));
        };
        if desc.base_array_layer + desc.array_layer_count > owner.desc.array_layers {
            return Err(BackendError::TextureCreationFailed(format!(
                "view layers {}..{} out of range for {:?}",
                desc.base_array_layer,
                desc.base_array_layer + desc.array_layer_count,
                owner.desc.label
            )));
        }
        let handle = TextureViewHandle(self.next());
        self.views.insert(handle, texture);
        self.view_textures.insert(handle, texture);
        Ok(handle)
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        if self.views.remove(&view).is_none() {
            self.hazard(format!("double destroy of texture view {:?}", view));
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        match self.textures.get(&texture) {
            Some(t) if t.swapchain_image => {
                self.hazard(format!("destroy of swapchain-owned image {:?}", texture))
            }
            Some(_) => {
                if self.views.values().any(|t| *t == texture) {
                    self.hazard(format!("texture {:?} destroyed with live views", texture));
                }
                self.textures.remove(&texture);
            }
            None => self.hazard(format!("double destroy of texture {:?}", texture)),
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", desc.label);
        let handle = SamplerHandle(self.next());
        self.samplers.insert(handle);
        Ok(handle)
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if !self.samplers.remove(&sampler) {
            self.hazard(format!("double destroy of sampler {:?}", sampler));
        }
    }

    fn create_shader_module(&mut self, path: &Path) -> BackendResult<ShaderModuleHandle> {
        let display = path.display().to_string();
        if self
            .missing_shaders
            .iter()
            .any(|missing| display.ends_with(missing.as_str()))
        {
            return Err(BackendError::ShaderCreationFailed {
                path: display,
                reason: "file not found".into(),
            });
        }
        let handle = ShaderModuleHandle(self.next());
        self.shader_modules.insert(handle, path.to_path_buf());
        Ok(handle)
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        if self.shader_modules.remove(&module).is_none() {
            self.hazard(format!("double destroy of shader module {:?}", module));
        }
    }

    fn create_descriptor_pool(
        &mut self,
        _desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle> {
        let handle = DescriptorPoolHandle(self.next());
        self.pools.insert(handle);
        Ok(handle)
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        if !self.pools.remove(&pool) {
            self.hazard(format!("double destroy of descriptor pool {:?}", pool));
        }
        self.sets.retain(|_, set| set.pool != pool);
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let handle = DescriptorSetLayoutHandle(self.next());
        self.set_layouts.insert(handle, bindings.to_vec());
        Ok(handle)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        if self.set_layouts.remove(&layout).is_none() {
            self.hazard(format!("double destroy of set layout {:?}", layout));
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        if !self.pools.contains(&pool) {
            return Err(BackendError::InvalidHandle(format!("pool {:?}", pool)));
        }
        if !self.set_layouts.contains_key(&layout) {
            return Err(BackendError::InvalidHandle(format!("set layout {:?}", layout)));
        }
        let handle = DescriptorSetHandle(self.next());
        self.sets.insert(
            handle,
            DummySet {
                pool,
                writes: BTreeMap::new(),
            },
        );
        Ok(handle)
    }

    fn write_descriptor(
        &mut self,
        set: DescriptorSetHandle,
        binding: u32,
        resource: &DescriptorResource,
    ) -> BackendResult<()> {
        let Some(target) = self.sets.get_mut(&set) else {
            return Err(BackendError::InvalidHandle(format!("descriptor set {:?}", set)));
        };
        target.writes.insert(binding, *resource);
        Ok(())
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        if let Some(missing) = set_layouts
            .iter()
            .find(|layout| !self.set_layouts.contains_key(layout))
        {
            return Err(BackendError::InvalidHandle(format!(
                "set layout {:?}",
                missing
            )));
        }
        if push_constants.iter().any(|r| r.offset + r.size > 128) {
            return Err(BackendError::PipelineCreationFailed(
                "push constant ranges exceed 128 bytes".into(),
            ));
        }
        let handle = PipelineLayoutHandle(self.next());
        self.pipeline_layouts.insert(handle);
        Ok(handle)
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        if !self.pipeline_layouts.remove(&layout) {
            self.hazard(format!("double destroy of pipeline layout {:?}", layout));
        }
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        if !self.pipeline_layouts.contains(&desc.layout) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: unknown pipeline layout",
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
        let handle = PipelineHandle(self.next());
        self.pipelines.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.pipelines.remove(&pipeline).is_none() {
            self.hazard(format!("double destroy of pipeline {:?}", pipeline));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_lifecycle() {
        let mut backend = DummyBackend::new();
        let fence = backend.create_fence(true).unwrap();
        let cmd = backend.allocate_command_buffers(1).unwrap()[0];

        backend.wait_for_fence(fence).unwrap();
        backend.reset_fence(fence).unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        backend.end_command_buffer().unwrap();
        backend
            .submit(&SubmitInfo {
                command_buffer: cmd,
                wait_semaphore: None,
                signal_semaphore: None,
                fence: Some(fence),
            })
            .unwrap();
        backend.wait_for_fence(fence).unwrap();

        assert!(backend.hazards().is_empty());
    }

    #[test]
    fn test_wait_on_reset_fence_is_reported() {
        let mut backend = DummyBackend::new();
        let fence = backend.create_fence(true).unwrap();
        backend.reset_fence(fence).unwrap();
        assert!(backend.wait_for_fence(fence).is_err());
        assert_eq!(backend.hazards().len(), 1);
    }

    #[test]
    fn test_write_to_in_flight_buffer_is_reported() {
        let mut backend = DummyBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 64,
                usage: BufferUsage::VERTEX,
                location: MemoryLocation::CpuToGpu,
            })
            .unwrap();
        let fence = backend.create_fence(false).unwrap();
        let cmd = backend.allocate_command_buffers(1).unwrap()[0];
        backend.begin_command_buffer(cmd).unwrap();
        backend.cmd_bind_vertex_buffer(buffer, 0);
        backend.end_command_buffer().unwrap();
        backend
            .submit(&SubmitInfo {
                command_buffer: cmd,
                wait_semaphore: None,
                signal_semaphore: None,
                fence: Some(fence),
            })
            .unwrap();

        backend.write_buffer(buffer, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.hazards().len(), 1);

        backend.wait_for_fence(fence).unwrap();
        backend.write_buffer(buffer, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.hazards().len(), 1);
        assert_eq!(&backend.buffer_contents(buffer).unwrap()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_double_destroy_is_reported() {
        let mut backend = DummyBackend::new();
        let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();
        backend.destroy_sampler(sampler);
        backend.destroy_sampler(sampler);
        assert_eq!(backend.hazards().len(), 1);
    }

    #[test]
    fn test_missing_shader_fails() {
        let mut backend = DummyBackend::new().with_missing_shader("lighting.frag.spv");
        assert!(backend
            .create_shader_module(Path::new("shaders/gbuffer.vert.spv"))
            .is_ok());
        let err = backend
            .create_shader_module(Path::new("shaders/lighting.frag.spv"))
            .unwrap_err();
        assert!(matches!(err, BackendError::ShaderCreationFailed { .. }));
    }

    #[test]
    fn test_pinned_surface_extent_makes_chain_stale() {
        let mut backend = DummyBackend::new();
        let semaphore = backend.create_semaphore().unwrap();
        let config = SwapchainConfig {
            format: SurfaceFormat {
                format: TextureFormat::Bgra8UnormSrgb,
                color_space: ColorSpace::SrgbNonlinear,
            },
            present_mode: PresentMode::Fifo,
            extent: Extent2D::new(800, 600),
            image_count: 3,
        };
        let chain = backend.create_swapchain(&config, None).unwrap();
        assert_eq!(
            backend
                .acquire_next_image(chain.swapchain, semaphore)
                .unwrap(),
            Some(0)
        );

        backend.set_surface_extent(Some(Extent2D::new(1024, 768)));
        assert_eq!(
            backend
                .acquire_next_image(chain.swapchain, semaphore)
                .unwrap(),
            None
        );
        assert_eq!(
            backend.present(chain.swapchain, 0, semaphore).unwrap(),
            PresentResult::OutOfDate
        );
    }
}
