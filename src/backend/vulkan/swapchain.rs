//! Surface queries and swapchain lifetime

use ash::vk;

use super::{convert, map_vk, VkSwapchain, VkTexture, VulkanBackend};
use crate::backend::traits::*;
use crate::backend::types::*;

impl VulkanBackend {
    pub(super) fn query_surface_support(&self) -> BackendResult<SurfaceSupport> {
        let surface_fn = &self.ctx.surface_fn;
        let (pd, surface) = (self.ctx.physical_device, self.ctx.surface);
        let caps = unsafe { surface_fn.get_physical_device_surface_capabilities(pd, surface) }
            .map_err(map_vk(BackendError::SwapchainCreationFailed))?;
        let formats = unsafe { surface_fn.get_physical_device_surface_formats(pd, surface) }
            .map_err(map_vk(BackendError::SwapchainCreationFailed))?;
        let present_modes =
            unsafe { surface_fn.get_physical_device_surface_present_modes(pd, surface) }
                .map_err(map_vk(BackendError::SwapchainCreationFailed))?;

        let current_extent = (caps.current_extent.width != u32::MAX)
            .then(|| convert::extent_back(caps.current_extent));

        Ok(SurfaceSupport {
            capabilities: SurfaceCapabilities {
                min_image_count: caps.min_image_count,
                max_image_count: caps.max_image_count,
                current_extent,
                min_image_extent: convert::extent_back(caps.min_image_extent),
                max_image_extent: convert::extent_back(caps.max_image_extent),
            },
            formats: formats
                .iter()
                .filter_map(|f| {
                    convert::format_back(f.format).map(|format| SurfaceFormat {
                        format,
                        color_space: convert::color_space_back(f.color_space),
                    })
                })
                .collect(),
            present_modes: present_modes
                .into_iter()
                .filter_map(convert::present_mode_back)
                .collect(),
        })
    }

    pub(super) fn build_swapchain(
        &mut self,
        config: &SwapchainConfig,
        old: Option<SwapchainHandle>,
    ) -> BackendResult<SwapchainImages> {
        let old_swapchain = match old {
            Some(handle) => self.res.swapchains.lookup(handle.0, "swapchain")?.swapchain,
            None => vk::SwapchainKHR::null(),
        };
        let caps = unsafe {
            self.ctx
                .surface_fn
                .get_physical_device_surface_capabilities(self.ctx.physical_device, self.ctx.surface)
        }
        .map_err(map_vk(BackendError::SwapchainCreationFailed))?;

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.ctx.surface)
            .min_image_count(config.image_count)
            .image_format(convert::format(config.format.format))
            .image_color_space(convert::color_space(config.format.color_space))
            .image_extent(convert::extent(config.extent))
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(convert::present_mode(config.present_mode))
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.ctx.swapchain_fn.create_swapchain(&info, None) }
            .map_err(map_vk(BackendError::SwapchainCreationFailed))?;
        let images = match unsafe { self.ctx.swapchain_fn.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.ctx.swapchain_fn.destroy_swapchain(swapchain, None) };
                return Err(map_vk(BackendError::SwapchainCreationFailed)(e));
            }
        };

        let textures: Vec<u64> = images
            .into_iter()
            .map(|image| {
                self.res.textures.insert(VkTexture {
                    image,
                    allocation: None,
                    format: config.format.format,
                })
            })
            .collect();
        let id = self.res.swapchains.insert(VkSwapchain {
            swapchain,
            images: textures.clone(),
        });

        log::info!(
            "Created swapchain {}x{} {:?} {:?} with {} images",
            config.extent.width,
            config.extent.height,
            config.format.format,
            config.present_mode,
            textures.len()
        );
        Ok(SwapchainImages {
            swapchain: SwapchainHandle(id),
            images: textures.into_iter().map(TextureHandle).collect(),
        })
    }

    /// The chain's image entries go with it; views on them must already be gone.
    pub(super) fn release_swapchain(&mut self, handle: SwapchainHandle) {
        let Some(chain) = self.res.swapchains.remove(handle.0) else {
            log::warn!("Destroying unknown swapchain {:?}", handle);
            return;
        };
        for image in chain.images {
            self.res.textures.remove(image);
        }
        unsafe { self.ctx.swapchain_fn.destroy_swapchain(chain.swapchain, None) };
    }

    pub(super) fn acquire(
        &mut self,
        handle: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> BackendResult<Option<u32>> {
        let swapchain = self.res.swapchains.lookup(handle.0, "swapchain")?.swapchain;
        let semaphore = *self.res.semaphores.lookup(signal.0, "semaphore")?;
        let result = unsafe {
            self.ctx.swapchain_fn.acquire_next_image(
                swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, false)) => Ok(Some(index)),
            Ok((_, true)) => {
                log::debug!("Swapchain suboptimal on acquire");
                Ok(None)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire");
                Ok(None)
            }
            Err(e) => Err(map_vk(BackendError::AcquireImageFailed)(e)),
        }
    }

    pub(super) fn queue_present(
        &mut self,
        handle: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<PresentResult> {
        let swapchain = self.res.swapchains.lookup(handle.0, "swapchain")?.swapchain;
        let semaphore = *self.res.semaphores.lookup(wait.0, "semaphore")?;
        let swapchains = [swapchain];
        let indices = [image_index];
        let waits = [semaphore];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.ctx.swapchain_fn.queue_present(self.ctx.queue, &info) } {
            Ok(false) => Ok(PresentResult::Success),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(map_vk(BackendError::PresentFailed)(e)),
        }
    }
}
