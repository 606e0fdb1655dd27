//! Swapchain management.
//!
//! [`SwapchainManager`] owns the presentable image chain and one view per
//! image. Configuration is picked by the free functions in this module from
//! the surface support reported by the backend:
//!
//! - format: `B8G8R8A8_SRGB` / sRGB-nonlinear if offered, then any sRGB
//!   format, else the first reported one
//! - present mode: mailbox if offered, else FIFO (always supported); FIFO
//!   when vsync is requested
//! - extent: the surface's current extent when it is fixed, else the
//!   requested size clamped to the surface limits
//! - image count: `min + 1`, capped by `max` when the surface has one

use crate::backend::{
    BackendError, BackendResult, ColorSpace, Extent2D, GraphicsBackend, PresentMode,
    PresentResult, SemaphoreHandle, SurfaceCapabilities, SurfaceFormat, SurfaceSupport,
    SwapchainConfig, SwapchainHandle, TextureFormat, TextureHandle, TextureViewDescriptor,
    TextureViewHandle,
};

/// Pick the surface format.
pub fn choose_surface_format(formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
    formats
        .iter()
        .find(|f| {
            f.format == TextureFormat::Bgra8UnormSrgb && f.color_space == ColorSpace::SrgbNonlinear
        })
        .or_else(|| {
            formats
                .iter()
                .find(|f| f.format.is_srgb() && f.color_space == ColorSpace::SrgbNonlinear)
        })
        .or_else(|| formats.first())
        .copied()
}

/// Pick the present mode.
pub fn choose_present_mode(modes: &[PresentMode], vsync: bool) -> PresentMode {
    if !vsync && modes.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::Fifo
    }
}

/// Pick the chain extent for a requested framebuffer size.
pub fn choose_extent(caps: &SurfaceCapabilities, width: u32, height: u32) -> Extent2D {
    if let Some(current) = caps.current_extent {
        return current;
    }
    Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Pick the number of images: one more than the minimum, within the maximum.
pub fn choose_image_count(caps: &SurfaceCapabilities) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Full configuration for a requested size.
pub fn choose_config(
    support: &SurfaceSupport,
    width: u32,
    height: u32,
    vsync: bool,
) -> BackendResult<SwapchainConfig> {
    let format = choose_surface_format(&support.formats).ok_or_else(|| {
        BackendError::SwapchainCreationFailed("surface reports no formats".into())
    })?;
    Ok(SwapchainConfig {
        format,
        present_mode: choose_present_mode(&support.present_modes, vsync),
        extent: choose_extent(&support.capabilities, width, height),
        image_count: choose_image_count(&support.capabilities),
    })
}

/// Owner of the presentable image chain
#[derive(Debug)]
pub struct SwapchainManager {
    handle: Option<SwapchainHandle>,
    images: Vec<TextureHandle>,
    views: Vec<TextureViewHandle>,
    config: SwapchainConfig,
    vsync: bool,
}

impl SwapchainManager {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> BackendResult<Self> {
        if width == 0 || height == 0 {
            return Err(BackendError::SwapchainCreationFailed(format!(
                "requested size {}x{} has zero area",
                width, height
            )));
        }
        let support = backend.surface_support()?;
        let config = choose_config(&support, width, height, vsync)?;
        let mut manager = Self {
            handle: None,
            images: Vec::new(),
            views: Vec::new(),
            config,
            vsync,
        };
        manager.create(backend, config)?;
        Ok(manager)
    }

    fn create(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        config: SwapchainConfig,
    ) -> BackendResult<()> {
        let chain = backend.create_swapchain(&config, None)?;
        let mut views = Vec::with_capacity(chain.images.len());
        for image in &chain.images {
            match backend.create_texture_view(*image, &TextureViewDescriptor::layer(0)) {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views {
                        backend.destroy_texture_view(view);
                    }
                    backend.destroy_swapchain(chain.swapchain);
                    return Err(e);
                }
            }
        }

        self.config = SwapchainConfig {
            image_count: chain.images.len() as u32,
            ..config
        };
        self.handle = Some(chain.swapchain);
        self.images = chain.images;
        self.views = views;

        log::info!(
            "Swapchain created: {}x{}, {} images ({:?}, {:?})",
            self.config.extent.width,
            self.config.extent.height,
            self.images.len(),
            self.config.format.format,
            self.config.present_mode
        );
        Ok(())
    }

    /// Acquire the next image, signaling `signal` when it is ready.
    /// `Ok(None)` means the chain is stale: skip this frame and recreate.
    pub fn acquire_next_image(
        &self,
        backend: &mut dyn GraphicsBackend,
        signal: SemaphoreHandle,
    ) -> BackendResult<Option<u32>> {
        backend.acquire_next_image(self.handle()?, signal)
    }

    pub fn present(
        &self,
        backend: &mut dyn GraphicsBackend,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<PresentResult> {
        backend.present(self.handle()?, image_index, wait)
    }

    /// Rebuild the chain for a new framebuffer size.
    ///
    /// Returns `Ok(false)` without touching anything when either dimension
    /// is zero (minimized window).
    pub fn recreate(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
    ) -> BackendResult<bool> {
        if width == 0 || height == 0 {
            log::debug!("Swapchain recreate skipped for {}x{}", width, height);
            return Ok(false);
        }
        let support = backend.surface_support()?;
        let config = choose_config(&support, width, height, self.vsync)?;
        if config.extent.is_zero_area() {
            log::debug!("Swapchain recreate skipped: surface reports zero extent");
            return Ok(false);
        }

        backend.wait_idle()?;
        self.destroy(backend);
        self.create(backend, config)?;
        Ok(true)
    }

    /// Destroy views and the chain. Safe to call more than once.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for view in self.views.drain(..) {
            backend.destroy_texture_view(view);
        }
        if let Some(handle) = self.handle.take() {
            backend.destroy_swapchain(handle);
        }
        self.images.clear();
    }

    pub fn handle(&self) -> BackendResult<SwapchainHandle> {
        self.handle
            .ok_or_else(|| BackendError::InvalidHandle("swapchain has been destroyed".into()))
    }

    pub fn format(&self) -> TextureFormat {
        self.config.format.format
    }

    pub fn extent(&self) -> Extent2D {
        self.config.extent
    }

    pub fn present_mode(&self) -> PresentMode {
        self.config.present_mode
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn image(&self, index: u32) -> Option<TextureHandle> {
        self.images.get(index as usize).copied()
    }

    pub fn view(&self, index: u32) -> Option<TextureViewHandle> {
        self.views.get(index as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, DummyEvent};

    fn caps(min: u32, max: u32) -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: min,
            max_image_count: max,
            current_extent: None,
            min_image_extent: Extent2D::new(64, 64),
            max_image_extent: Extent2D::new(4096, 4096),
        }
    }

    #[test]
    fn test_prefers_srgb_bgra() {
        let formats = [
            SurfaceFormat {
                format: TextureFormat::Rgba8Unorm,
                color_space: ColorSpace::SrgbNonlinear,
            },
            SurfaceFormat {
                format: TextureFormat::Bgra8UnormSrgb,
                color_space: ColorSpace::SrgbNonlinear,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            TextureFormat::Bgra8UnormSrgb
        );
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [
            SurfaceFormat {
                format: TextureFormat::Rgba16Float,
                color_space: ColorSpace::Other(1000104002),
            },
            SurfaceFormat {
                format: TextureFormat::Rgba8Unorm,
                color_space: ColorSpace::SrgbNonlinear,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            TextureFormat::Rgba16Float
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_preference() {
        let all = [PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate];
        assert_eq!(choose_present_mode(&all, false), PresentMode::Mailbox);
        assert_eq!(choose_present_mode(&all, true), PresentMode::Fifo);
        assert_eq!(
            choose_present_mode(&[PresentMode::Fifo, PresentMode::Immediate], false),
            PresentMode::Fifo
        );
    }

    #[test]
    fn test_extent_is_clamped() {
        let c = caps(2, 0);
        assert_eq!(choose_extent(&c, 10, 9000), Extent2D::new(64, 4096));
        assert_eq!(choose_extent(&c, 1600, 900), Extent2D::new(1600, 900));

        let fixed = SurfaceCapabilities {
            current_extent: Some(Extent2D::new(1280, 720)),
            ..c
        };
        assert_eq!(choose_extent(&fixed, 1600, 900), Extent2D::new(1280, 720));
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn test_recreate_zero_size_is_noop() {
        let mut backend = DummyBackend::new();
        let mut swapchain = SwapchainManager::new(&mut backend, 800, 600, false).unwrap();
        let handle = swapchain.handle().unwrap();
        let events_before = backend.events().len();

        assert!(!swapchain.recreate(&mut backend, 0, 600).unwrap());
        assert!(!swapchain.recreate(&mut backend, 800, 0).unwrap());

        assert_eq!(swapchain.handle().unwrap(), handle);
        assert_eq!(swapchain.extent(), Extent2D::new(800, 600));
        assert_eq!(backend.events().len(), events_before);
    }

    #[test]
    fn test_recreate_replaces_chain_and_views() {
        let mut backend = DummyBackend::new();
        let mut swapchain = SwapchainManager::new(&mut backend, 800, 600, false).unwrap();
        let before = backend.live_resources();
        let old = swapchain.handle().unwrap();

        assert!(swapchain.recreate(&mut backend, 1024, 768).unwrap());

        assert_ne!(swapchain.handle().unwrap(), old);
        assert_eq!(swapchain.extent(), Extent2D::new(1024, 768));
        assert_eq!(backend.live_resources(), before);
        assert!(backend.events().contains(&DummyEvent::WaitIdle));
        assert!(backend.events().contains(&DummyEvent::SwapchainDestroyed(old)));
        assert!(backend.hazards().is_empty());

        swapchain.destroy(&mut backend);
        swapchain.destroy(&mut backend);
        assert_eq!(backend.live_resources().swapchains, 0);
        assert_eq!(backend.live_resources().texture_views, 0);
    }
}
