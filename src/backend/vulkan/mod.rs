//! Vulkan backend implementation using ash
//!
//! Vulkan 1.3 with dynamic rendering and synchronization2, a single
//! graphics+present queue and gpu-allocator for memory. Backend handles
//! index per-kind tables of raw Vulkan objects.

mod command;
mod context;
mod convert;
mod descriptor;
mod memory;
mod pipeline;
mod recorder;
mod swapchain;

use std::collections::HashMap;
use std::path::Path;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::traits::*;
use crate::backend::types::*;
use context::DeviceContext;
use recorder::Recorder;

/// Map a Vulkan error onto the subsystem error `kind`, keeping the
/// out-of-memory, device-lost and surface-lost cases distinct.
fn map_vk(kind: fn(String) -> BackendError) -> impl Fn(vk::Result) -> BackendError {
    move |result| match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_SURFACE_LOST_KHR => BackendError::SurfaceLost,
        other => kind(other.to_string()),
    }
}

/// Objects of one kind, keyed by the id inside their backend handle
struct Registry<T> {
    next: u64,
    items: HashMap<u64, T>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            next: 1,
            items: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn insert(&mut self, item: T) -> u64 {
        let id = self.next;
        self.next += 1;
        self.items.insert(id, item);
        id
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn lookup(&self, id: u64, kind: &str) -> BackendResult<&T> {
        self.items
            .get(&id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{} {}", kind, id)))
    }

    pub fn lookup_mut(&mut self, id: u64, kind: &str) -> BackendResult<&mut T> {
        self.items
            .get_mut(&id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{} {}", kind, id)))
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        self.items.remove(&id)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.items.retain(|_, item| keep(item));
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain().map(|(_, item)| item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
}

/// Swapchain images have no allocation and are never destroyed here.
struct VkTexture {
    image: vk::Image,
    allocation: Option<Allocation>,
    format: TextureFormat,
}

struct VkDescriptorSet {
    set: vk::DescriptorSet,
    pool: u64,
}

struct VkSwapchain {
    swapchain: vk::SwapchainKHR,
    images: Vec<u64>,
}

#[derive(Default)]
struct Resources {
    buffers: Registry<VkBuffer>,
    textures: Registry<VkTexture>,
    views: Registry<vk::ImageView>,
    samplers: Registry<vk::Sampler>,
    shaders: Registry<vk::ShaderModule>,
    pipelines: Registry<vk::Pipeline>,
    pipeline_layouts: Registry<vk::PipelineLayout>,
    set_layouts: Registry<vk::DescriptorSetLayout>,
    pools: Registry<vk::DescriptorPool>,
    sets: Registry<VkDescriptorSet>,
    semaphores: Registry<vk::Semaphore>,
    fences: Registry<vk::Fence>,
    command_buffers: Registry<vk::CommandBuffer>,
    swapchains: Registry<VkSwapchain>,
}

/// Vulkan backend implementation
pub struct VulkanBackend {
    ctx: DeviceContext,
    /// Dropped before the device is destroyed.
    allocator: Option<Mutex<Allocator>>,
    command_pool: vk::CommandPool,
    /// Command buffer between begin/end_command_buffer
    recording: Option<vk::CommandBuffer>,
    res: Resources,
}

impl VulkanBackend {
    /// Create the instance, surface and device for `window`. With
    /// `enable_validation` the Khronos validation layer is loaded when
    /// installed and its messages are forwarded to `log`.
    pub fn new<W>(window: &W, enable_validation: bool) -> BackendResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let mut ctx = DeviceContext::new(window, enable_validation)?;

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { ctx.destroy() };
                return Err(BackendError::InitializationFailed(e.to_string()));
            }
        };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.queue_family);
        let command_pool = match unsafe { ctx.device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                drop(allocator);
                unsafe { ctx.destroy() };
                return Err(map_vk(BackendError::InitializationFailed)(e));
            }
        };

        Ok(Self {
            ctx,
            allocator: Some(Mutex::new(allocator)),
            command_pool,
            recording: None,
            res: Resources::default(),
        })
    }

    fn recorder(&self) -> Option<Recorder<'_>> {
        match self.recording {
            Some(cmd) => Some(Recorder::new(&self.ctx.device, &self.res, cmd)),
            None => {
                log::error!("Command recorded with no command buffer open");
                None
            }
        }
    }
}

impl CommandRecorder for VulkanBackend {
    fn cmd_image_barrier(&mut self, barrier: &ImageBarrier) {
        if let Some(mut r) = self.recorder() {
            r.cmd_image_barrier(barrier);
        }
    }

    fn cmd_begin_rendering(&mut self, info: &RenderingInfo) {
        if let Some(mut r) = self.recorder() {
            r.cmd_begin_rendering(info);
        }
    }

    fn cmd_end_rendering(&mut self) {
        if let Some(mut r) = self.recorder() {
            r.cmd_end_rendering();
        }
    }

    fn cmd_set_viewport(&mut self, viewport: &Viewport) {
        if let Some(mut r) = self.recorder() {
            r.cmd_set_viewport(viewport);
        }
    }

    fn cmd_set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        if let Some(mut r) = self.recorder() {
            r.cmd_set_scissor(x, y, width, height);
        }
    }

    fn cmd_bind_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(mut r) = self.recorder() {
            r.cmd_bind_pipeline(pipeline);
        }
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        if let Some(mut r) = self.recorder() {
            r.cmd_bind_descriptor_set(layout, set_index, set);
        }
    }

    fn cmd_push_constants(
        &mut self,
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        if let Some(mut r) = self.recorder() {
            r.cmd_push_constants(layout, stages, offset, data);
        }
    }

    fn cmd_bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        if let Some(mut r) = self.recorder() {
            r.cmd_bind_vertex_buffer(buffer, offset);
        }
    }

    fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        if let Some(mut r) = self.recorder() {
            r.cmd_bind_index_buffer(buffer, offset);
        }
    }

    fn cmd_draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        if let Some(mut r) = self.recorder() {
            r.cmd_draw(vertices, instances);
        }
    }

    fn cmd_draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        if let Some(mut r) = self.recorder() {
            r.cmd_draw_indexed(indices, base_vertex, instances);
        }
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        buffer: BufferHandle,
        texture: TextureHandle,
        region: &TextureCopyRegion,
    ) {
        if let Some(mut r) = self.recorder() {
            r.cmd_copy_buffer_to_texture(buffer, texture, region);
        }
    }

    fn cmd_copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) {
        if let Some(mut r) = self.recorder() {
            r.cmd_copy_buffer(src, dst, size);
        }
    }
}

impl GraphicsBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.ctx.capabilities
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        unsafe { self.ctx.device.device_wait_idle() }.map_err(map_vk(BackendError::SyncFailed))
    }

    fn surface_support(&self) -> BackendResult<SurfaceSupport> {
        self.query_surface_support()
    }

    fn create_swapchain(
        &mut self,
        config: &SwapchainConfig,
        old: Option<SwapchainHandle>,
    ) -> BackendResult<SwapchainImages> {
        self.build_swapchain(config, old)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        self.release_swapchain(swapchain);
    }

    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> BackendResult<Option<u32>> {
        self.acquire(swapchain, signal)
    }

    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<PresentResult> {
        self.queue_present(swapchain, image_index, wait)
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let semaphore =
            unsafe { self.ctx.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .map_err(map_vk(BackendError::SyncFailed))?;
        Ok(SemaphoreHandle(self.res.semaphores.insert(semaphore)))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if let Some(semaphore) = self.res.semaphores.remove(semaphore.0) {
            unsafe { self.ctx.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence =
            unsafe { self.ctx.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
                .map_err(map_vk(BackendError::SyncFailed))?;
        Ok(FenceHandle(self.res.fences.insert(fence)))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if let Some(fence) = self.res.fences.remove(fence.0) {
            unsafe { self.ctx.device.destroy_fence(fence, None) };
        }
    }

    fn wait_for_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let fence = *self.res.fences.lookup(fence.0, "fence")?;
        unsafe { self.ctx.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(map_vk(BackendError::SyncFailed))
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let fence = *self.res.fences.lookup(fence.0, "fence")?;
        unsafe { self.ctx.device.reset_fences(&[fence]) }.map_err(map_vk(BackendError::SyncFailed))
    }

    fn allocate_command_buffers(&mut self, count: u32) -> BackendResult<Vec<CommandBufferHandle>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers = unsafe { self.ctx.device.allocate_command_buffers(&info) }
            .map_err(map_vk(BackendError::CommandFailed))?;
        Ok(buffers
            .into_iter()
            .map(|cmd| CommandBufferHandle(self.res.command_buffers.insert(cmd)))
            .collect())
    }

    fn free_command_buffers(&mut self, command_buffers: &[CommandBufferHandle]) {
        let raw: Vec<vk::CommandBuffer> = command_buffers
            .iter()
            .filter_map(|h| self.res.command_buffers.remove(h.0))
            .collect();
        if !raw.is_empty() {
            unsafe { self.ctx.device.free_command_buffers(self.command_pool, &raw) };
        }
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        if self.recording.is_some() {
            return Err(BackendError::CommandFailed(
                "a command buffer is already recording".into(),
            ));
        }
        let cmd = *self
            .res
            .command_buffers
            .lookup(command_buffer.0, "command buffer")?;
        let device = &self.ctx.device;
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(map_vk(BackendError::CommandFailed))?;
            device
                .begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .map_err(map_vk(BackendError::CommandFailed))?;
        }
        self.recording = Some(cmd);
        Ok(())
    }

    fn end_command_buffer(&mut self) -> BackendResult<()> {
        let cmd = self
            .recording
            .take()
            .ok_or_else(|| BackendError::CommandFailed("no command buffer is recording".into()))?;
        unsafe { self.ctx.device.end_command_buffer(cmd) }.map_err(map_vk(BackendError::CommandFailed))
    }

    fn submit(&mut self, info: &SubmitInfo) -> BackendResult<()> {
        self.queue_submit(info)
    }

    fn submit_immediate(
        &mut self,
        record: &mut dyn FnMut(&mut dyn CommandRecorder),
    ) -> BackendResult<()> {
        self.run_immediate(record)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        self.allocate_buffer(desc)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        self.allocate_buffer_init(desc, data)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        self.fill_buffer(buffer, offset, data)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.release_buffer(buffer);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.allocate_texture(desc)
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        self.make_view(texture, desc)
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        if let Some(view) = self.res.views.remove(view.0) {
            unsafe { self.ctx.device.destroy_image_view(view, None) };
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.release_texture(texture);
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        self.make_sampler(desc)
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let Some(sampler) = self.res.samplers.remove(sampler.0) {
            unsafe { self.ctx.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_shader_module(&mut self, path: &Path) -> BackendResult<ShaderModuleHandle> {
        self.load_shader(path)
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        if let Some(module) = self.res.shaders.remove(module.0) {
            unsafe { self.ctx.device.destroy_shader_module(module, None) };
        }
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle> {
        self.make_descriptor_pool(desc)
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        self.release_descriptor_pool(pool);
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        self.make_set_layout(bindings)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        if let Some(layout) = self.res.set_layouts.remove(layout.0) {
            unsafe { self.ctx.device.destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        self.allocate_set(pool, layout)
    }

    fn write_descriptor(
        &mut self,
        set: DescriptorSetHandle,
        binding: u32,
        resource: &DescriptorResource,
    ) -> BackendResult<()> {
        self.update_set(set, binding, resource)
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        self.make_pipeline_layout(set_layouts, push_constants)
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        if let Some(layout) = self.res.pipeline_layouts.remove(layout.0) {
            unsafe { self.ctx.device.destroy_pipeline_layout(layout, None) };
        }
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        self.make_graphics_pipeline(desc)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(pipeline) = self.res.pipelines.remove(pipeline.0) {
            unsafe { self.ctx.device.destroy_pipeline(pipeline, None) };
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.ctx.device.device_wait_idle() {
                log::error!("device_wait_idle failed during shutdown: {}", e);
            }

            let leaked = self.res.buffers.len()
                + self.res.views.len()
                + self.res.pipelines.len()
                + self.res.sets.len();
            if leaked > 0 {
                log::warn!("{} backend objects still alive at shutdown", leaked);
            }

            let device = &self.ctx.device;
            for pipeline in self.res.pipelines.drain() {
                device.destroy_pipeline(pipeline, None);
            }
            for layout in self.res.pipeline_layouts.drain() {
                device.destroy_pipeline_layout(layout, None);
            }
            for module in self.res.shaders.drain() {
                device.destroy_shader_module(module, None);
            }
            self.res.sets.drain().for_each(drop);
            for pool in self.res.pools.drain() {
                device.destroy_descriptor_pool(pool, None);
            }
            for layout in self.res.set_layouts.drain() {
                device.destroy_descriptor_set_layout(layout, None);
            }
            for sampler in self.res.samplers.drain() {
                device.destroy_sampler(sampler, None);
            }
            for view in self.res.views.drain() {
                device.destroy_image_view(view, None);
            }

            if let Some(allocator) = &self.allocator {
                let mut allocator = allocator.lock();
                for buffer in self.res.buffers.drain() {
                    device.destroy_buffer(buffer.buffer, None);
                    let _ = allocator.free(buffer.allocation);
                }
                for texture in self.res.textures.drain() {
                    if let Some(allocation) = texture.allocation {
                        device.destroy_image(texture.image, None);
                        let _ = allocator.free(allocation);
                    }
                }
            }
            drop(self.allocator.take());

            for semaphore in self.res.semaphores.drain() {
                device.destroy_semaphore(semaphore, None);
            }
            for fence in self.res.fences.drain() {
                device.destroy_fence(fence, None);
            }
            self.res.command_buffers.drain().for_each(drop);
            device.destroy_command_pool(self.command_pool, None);

            for chain in self.res.swapchains.drain() {
                self.ctx.swapchain_fn.destroy_swapchain(chain.swapchain, None);
            }

            self.ctx.destroy();
        }
    }
}
