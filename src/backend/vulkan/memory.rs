//! Buffers, images, views and samplers backed by gpu-allocator

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation as AllocLocation;

use super::{convert, map_vk, VkBuffer, VkTexture, VulkanBackend};
use crate::backend::traits::*;
use crate::backend::types::*;

fn alloc_location(location: MemoryLocation) -> AllocLocation {
    match location {
        MemoryLocation::GpuOnly => AllocLocation::GpuOnly,
        MemoryLocation::CpuToGpu => AllocLocation::CpuToGpu,
    }
}

impl VulkanBackend {
    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: AllocLocation,
        linear: bool,
        fail: fn(String) -> BackendError,
    ) -> BackendResult<Allocation> {
        let allocator = self
            .allocator
            .as_ref()
            .ok_or_else(|| fail("allocator not available".into()))?;
        allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
                other => fail(other.to_string()),
            })
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = &self.allocator {
            if let Err(e) = allocator.lock().free(allocation) {
                log::warn!("Failed to free allocation: {}", e);
            }
        }
    }

    pub(super) fn allocate_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let device = &self.ctx.device;
        let info = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(convert::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&info, None) }
            .map_err(map_vk(BackendError::BufferCreationFailed))?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(
            desc.label.as_deref().unwrap_or("buffer"),
            requirements,
            alloc_location(desc.location),
            true,
            BackendError::BufferCreationFailed,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.ctx.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe {
            self.ctx
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.ctx.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(map_vk(BackendError::BufferCreationFailed)(e));
        }

        let id = self.res.buffers.insert(VkBuffer {
            buffer,
            allocation,
            size: desc.size,
        });
        Ok(BufferHandle(id))
    }

    pub(super) fn fill_buffer(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let buffer = self.res.buffers.lookup_mut(handle.0, "buffer")?;
        let end = offset + data.len() as u64;
        if end > buffer.size {
            return Err(BackendError::BufferCreationFailed(format!(
                "write of {} bytes at {} overruns {:?} ({} bytes)",
                data.len(),
                offset,
                handle,
                buffer.size
            )));
        }
        let mapped = buffer.allocation.mapped_slice_mut().ok_or_else(|| {
            BackendError::BufferCreationFailed(format!("{:?} is not host visible", handle))
        })?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Device-local buffers get a transfer-dst usage and a staged copy.
    pub(super) fn allocate_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if desc.location == MemoryLocation::CpuToGpu {
            let buffer = self.allocate_buffer(desc)?;
            if let Err(e) = self.fill_buffer(buffer, 0, data) {
                self.release_buffer(buffer);
                return Err(e);
            }
            return Ok(buffer);
        }

        let buffer = self.allocate_buffer(&BufferDescriptor {
            usage: desc.usage | BufferUsage::COPY_DST,
            ..desc.clone()
        })?;
        let staging = match self.allocate_buffer_init(
            &BufferDescriptor {
                label: Some("buffer_staging".into()),
                size: data.len() as u64,
                usage: BufferUsage::COPY_SRC,
                location: MemoryLocation::CpuToGpu,
            },
            data,
        ) {
            Ok(staging) => staging,
            Err(e) => {
                self.release_buffer(buffer);
                return Err(e);
            }
        };
        let size = data.len() as u64;
        let copied = self.run_immediate(&mut |cmd| cmd.cmd_copy_buffer(staging, buffer, size));
        self.release_buffer(staging);
        match copied {
            Ok(()) => Ok(buffer),
            Err(e) => {
                self.release_buffer(buffer);
                Err(e)
            }
        }
    }

    pub(super) fn release_buffer(&mut self, handle: BufferHandle) {
        if let Some(buffer) = self.res.buffers.remove(handle.0) {
            unsafe { self.ctx.device.destroy_buffer(buffer.buffer, None) };
            self.free(buffer.allocation);
        }
    }

    pub(super) fn allocate_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let flags = if desc.view_dimension == TextureViewDimension::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert::format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert::texture_usage(desc.usage, desc.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.ctx.device.create_image(&info, None) }
            .map_err(map_vk(BackendError::TextureCreationFailed))?;
        let requirements = unsafe { self.ctx.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(
            desc.label.as_deref().unwrap_or("texture"),
            requirements,
            AllocLocation::GpuOnly,
            false,
            BackendError::TextureCreationFailed,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.ctx.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe {
            self.ctx
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.ctx.device.destroy_image(image, None) };
            self.free(allocation);
            return Err(map_vk(BackendError::TextureCreationFailed)(e));
        }

        let id = self.res.textures.insert(VkTexture {
            image,
            allocation: Some(allocation),
            format: desc.format,
        });
        Ok(TextureHandle(id))
    }

    /// Swapchain images are only forgotten; the chain owns them.
    pub(super) fn release_texture(&mut self, handle: TextureHandle) {
        let Some(texture) = self.res.textures.remove(handle.0) else {
            return;
        };
        match texture.allocation {
            Some(allocation) => {
                unsafe { self.ctx.device.destroy_image(texture.image, None) };
                self.free(allocation);
            }
            None => log::warn!("{:?} belongs to a swapchain and is not destroyed", handle),
        }
    }

    pub(super) fn make_view(
        &mut self,
        handle: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let texture = self.res.textures.lookup(handle.0, "texture")?;
        let info = vk::ImageViewCreateInfo::default()
            .image(texture.image)
            .view_type(convert::view_type(desc.dimension))
            .format(convert::format(texture.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: convert::view_aspect(texture.format),
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: desc.base_array_layer,
                layer_count: desc.array_layer_count,
            });
        let view = unsafe { self.ctx.device.create_image_view(&info, None) }
            .map_err(map_vk(BackendError::TextureCreationFailed))?;
        Ok(TextureViewHandle(self.res.views.insert(view)))
    }

    pub(super) fn make_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let anisotropy = desc
            .max_anisotropy
            .filter(|&a| a > 1.0)
            .map(|a| a.min(self.ctx.capabilities.max_sampler_anisotropy));
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(convert::filter(desc.mag_filter))
            .min_filter(convert::filter(desc.min_filter))
            .mipmap_mode(convert::mipmap_mode(desc.mipmap_filter))
            .address_mode_u(convert::address_mode(desc.address_mode_u))
            .address_mode_v(convert::address_mode(desc.address_mode_v))
            .address_mode_w(convert::address_mode(desc.address_mode_w))
            .anisotropy_enable(anisotropy.is_some_and(|a| a > 1.0))
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare.is_some())
            .compare_op(desc.compare.map(convert::compare_op).unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);
        let sampler = unsafe { self.ctx.device.create_sampler(&info, None) }
            .map_err(map_vk(BackendError::SamplerCreationFailed))?;
        Ok(SamplerHandle(self.res.samplers.insert(sampler)))
    }
}
