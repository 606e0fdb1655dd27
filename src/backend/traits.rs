//! Core backend abstraction traits
//!
//! [`GraphicsBackend`] is the device seam: everything the frame driver,
//! swapchain manager, descriptor manager and passes need from the GPU goes
//! through it. [`CommandRecorder`] is the object-safe subset used while
//! recording a command buffer.
//!
//! Two implementations exist: the Vulkan backend and the dummy backend used
//! by tests.

use std::path::Path;

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create sampler: {0}")]
    SamplerCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader from {path}: {reason}")]
    ShaderCreationFailed { path: String, reason: String },
    #[error("Descriptor operation failed: {0}")]
    DescriptorFailed(String),
    #[error("Command buffer operation failed: {0}")]
    CommandFailed(String),
    #[error("Synchronization failed: {0}")]
    SyncFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Backend-internal id, useful in logs.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

handle_type!(
    /// Handle to a GPU buffer
    BufferHandle
);
handle_type!(
    /// Handle to a GPU image
    TextureHandle
);
handle_type!(
    /// Handle to an image view
    TextureViewHandle
);
handle_type!(
    /// Handle to a sampler
    SamplerHandle
);
handle_type!(
    /// Handle to a loaded shader module
    ShaderModuleHandle
);
handle_type!(
    /// Handle to a graphics pipeline
    PipelineHandle
);
handle_type!(
    /// Handle to a pipeline layout
    PipelineLayoutHandle
);
handle_type!(
    /// Handle to a descriptor set layout
    DescriptorSetLayoutHandle
);
handle_type!(
    /// Handle to a descriptor pool
    DescriptorPoolHandle
);
handle_type!(
    /// Handle to an allocated descriptor set
    DescriptorSetHandle
);
handle_type!(
    /// Handle to a binary semaphore
    SemaphoreHandle
);
handle_type!(
    /// Handle to a fence
    FenceHandle
);
handle_type!(
    /// Handle to a primary command buffer
    CommandBufferHandle
);
handle_type!(
    /// Handle to a swapchain
    SwapchainHandle
);

/// Queue submission of one recorded command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    pub command_buffer: CommandBufferHandle,
    /// Waited on at the color-attachment-output stage.
    pub wait_semaphore: Option<SemaphoreHandle>,
    pub signal_semaphore: Option<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

/// Presentable images created together with a swapchain
#[derive(Debug, Clone)]
pub struct SwapchainImages {
    pub swapchain: SwapchainHandle,
    pub images: Vec<TextureHandle>,
}

/// Commands that can be recorded into the currently open command buffer.
pub trait CommandRecorder {
    /// Record an explicit image layout transition.
    fn cmd_image_barrier(&mut self, barrier: &ImageBarrier);

    /// Begin a dynamic rendering scope.
    fn cmd_begin_rendering(&mut self, info: &RenderingInfo);

    /// End the current dynamic rendering scope.
    fn cmd_end_rendering(&mut self);

    fn cmd_set_viewport(&mut self, viewport: &Viewport);

    fn cmd_set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32);

    fn cmd_bind_pipeline(&mut self, pipeline: PipelineHandle);

    fn cmd_bind_descriptor_set(
        &mut self,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    );

    fn cmd_push_constants(
        &mut self,
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    fn cmd_bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64);

    /// Bind a 32-bit index buffer.
    fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64);

    fn cmd_draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    fn cmd_draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    );

    /// Copy a whole buffer into mip 0 of a texture in `TransferDst` layout.
    fn cmd_copy_buffer_to_texture(
        &mut self,
        buffer: BufferHandle,
        texture: TextureHandle,
        region: &TextureCopyRegion,
    );

    fn cmd_copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64);
}

/// Main graphics backend trait
pub trait GraphicsBackend: CommandRecorder {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Capabilities reported by the device at startup
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Block until every queue is idle
    fn wait_idle(&mut self) -> BackendResult<()>;

    // Swapchain

    /// Query surface capabilities, formats and present modes
    fn surface_support(&self) -> BackendResult<SurfaceSupport>;

    /// Create a swapchain, retiring `old` if given
    fn create_swapchain(
        &mut self,
        config: &SwapchainConfig,
        old: Option<SwapchainHandle>,
    ) -> BackendResult<SwapchainImages>;

    /// Destroy a swapchain; its images go with it
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle);

    /// Acquire the next presentable image. `Ok(None)` means the chain is
    /// stale (out of date or suboptimal) and no image is held.
    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> BackendResult<Option<u32>>;

    /// Queue an image for presentation and report the raw result
    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<PresentResult>;

    // Synchronization

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle>;

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle>;

    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Block until the fence is signaled (unbounded timeout)
    fn wait_for_fence(&mut self, fence: FenceHandle) -> BackendResult<()>;

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()>;

    // Command buffers

    fn allocate_command_buffers(&mut self, count: u32) -> BackendResult<Vec<CommandBufferHandle>>;

    fn free_command_buffers(&mut self, command_buffers: &[CommandBufferHandle]);

    /// Reset and begin recording; `cmd_*` calls go to this buffer until
    /// [`GraphicsBackend::end_command_buffer`].
    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()>;

    fn end_command_buffer(&mut self) -> BackendResult<()>;

    fn submit(&mut self, info: &SubmitInfo) -> BackendResult<()>;

    /// Record a one-shot command buffer, submit it and block until it completes.
    fn submit_immediate(
        &mut self,
        record: &mut dyn FnMut(&mut dyn CommandRecorder),
    ) -> BackendResult<()>;

    // Resources

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer filled with `data`. Device-local buffers are filled
    /// through a staging buffer.
    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle>;

    /// Copy into a host-visible buffer's persistent mapping
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle>;

    fn destroy_texture_view(&mut self, view: TextureViewHandle);

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    /// Load a SPIR-V module from disk
    fn create_shader_module(&mut self, path: &Path) -> BackendResult<ShaderModuleHandle>;

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle);

    // Descriptors

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle>;

    /// Destroying the pool frees every set allocated from it
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle>;

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;

    fn write_descriptor(
        &mut self,
        set: DescriptorSetHandle,
        binding: u32,
        resource: &DescriptorResource,
    ) -> BackendResult<()>;

    // Pipelines

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle>;

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle);

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);
}

/// Staged texture upload: undefined → transfer-dst, one copy per mip
/// level, → shader-read-only. `levels` holds every mip, largest first.
pub fn upload_texture(
    backend: &mut dyn GraphicsBackend,
    texture: TextureHandle,
    desc: &TextureDescriptor,
    levels: &[&[u8]],
) -> BackendResult<()> {
    if levels.len() as u32 != desc.mip_levels {
        return Err(BackendError::TextureCreationFailed(format!(
            "{:?}: {} mip levels declared, {} provided",
            desc.label,
            desc.mip_levels,
            levels.len()
        )));
    }

    let bytes_per_pixel = desc.format.bytes_per_pixel() as u64;
    let mut regions = Vec::with_capacity(levels.len());
    let mut offset = 0;
    for (level, data) in levels.iter().enumerate() {
        let (width, height) = desc.mip_extent(level as u32);
        let expected = width as u64 * height as u64 * bytes_per_pixel;
        if data.len() as u64 != expected {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: mip {} expects {} bytes of pixel data, got {}",
                desc.label,
                level,
                expected,
                data.len()
            )));
        }
        regions.push(TextureCopyRegion {
            buffer_offset: offset,
            mip_level: level as u32,
            width,
            height,
        });
        offset += expected;
    }

    let staging = backend.create_buffer_init(
        &BufferDescriptor {
            label: Some("texture_staging".into()),
            size: offset,
            usage: BufferUsage::COPY_SRC,
            location: MemoryLocation::CpuToGpu,
        },
        &levels.concat(),
    )?;

    let aspect = desc.format.aspect();
    let mip_levels = desc.mip_levels;
    let result = backend.submit_immediate(&mut |cmd| {
        cmd.cmd_image_barrier(&ImageBarrier::whole(
            texture,
            aspect,
            TextureLayout::Undefined,
            TextureLayout::TransferDst,
            mip_levels,
            1,
        ));
        for region in &regions {
            cmd.cmd_copy_buffer_to_texture(staging, texture, region);
        }
        cmd.cmd_image_barrier(&ImageBarrier::whole(
            texture,
            aspect,
            TextureLayout::TransferDst,
            TextureLayout::ShaderReadOnly,
            mip_levels,
            1,
        ));
    });

    backend.destroy_buffer(staging);
    result
}
