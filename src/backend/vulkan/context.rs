//! Instance, debug messenger, surface and device creation

use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::map_vk;
use crate::backend::traits::*;
use crate::backend::types::*;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Everything created once at startup and destroyed at shutdown
pub(super) struct DeviceContext {
    pub _entry: ash::Entry,
    pub instance: ash::Instance,
    pub debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_fn: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub swapchain_fn: swapchain::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub capabilities: DeviceCapabilities,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan {:?}] {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan {:?}] {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!("[vulkan {:?}] {}", message_type, message);
    } else {
        log::trace!("[vulkan {:?}] {}", message_type, message);
    }
    vk::FALSE
}

fn validation_available(entry: &ash::Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
}

/// Queue family that can both draw and present to `surface`
fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_fn: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families.iter().enumerate().find_map(|(index, family)| {
        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = unsafe {
            surface_fn
                .get_physical_device_surface_support(physical_device, index as u32, surface)
                .unwrap_or(false)
        };
        (graphics && present).then_some(index as u32)
    })
}

/// Dynamic rendering and synchronization2 are required.
fn supports_vulkan13_features(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> bool {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    if properties.api_version < vk::API_VERSION_1_3 {
        return false;
    }
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);
    unsafe { instance.get_physical_device_features2(physical_device, &mut features) };
    features13.dynamic_rendering == vk::TRUE && features13.synchronization2 == vk::TRUE
}

impl DeviceContext {
    pub fn new<W>(window: &W, enable_validation: bool) -> BackendResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display_handle = window
            .display_handle()
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let validation = enable_validation && validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(map_vk(BackendError::InitializationFailed))?
            .to_vec();
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }
        let layers = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"deferred-renderer")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"deferred-renderer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .map_err(map_vk(BackendError::InitializationFailed))?;

        let debug = if validation {
            let loader = debug_utils::Instance::new(&entry, &instance);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            match unsafe { loader.create_debug_utils_messenger(&info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    log::warn!("Failed to create debug messenger: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface_fn = surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(map_vk(BackendError::SurfaceCreationFailed))?;

        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(map_vk(BackendError::DeviceCreationFailed))?;
        let (physical_device, queue_family) = physical_devices
            .iter()
            .filter(|&&pd| supports_vulkan13_features(&instance, pd))
            .filter_map(|&pd| {
                find_queue_family(&instance, pd, &surface_fn, surface).map(|family| (pd, family))
            })
            .max_by_key(|&(pd, _)| {
                let properties = unsafe { instance.get_physical_device_properties(pd) };
                (properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU) as u32
            })
            .ok_or_else(|| {
                BackendError::DeviceCreationFailed(
                    "no Vulkan 1.3 device with dynamic rendering that can present to the window"
                        .into(),
                )
            })?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        let anisotropy = supported.sampler_anisotropy == vk::TRUE;

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)];
        let device_extensions = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features)
            .push_next(&mut features13);
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(map_vk(BackendError::DeviceCreationFailed))?;

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_fn = swapchain::Device::new(&instance, &device);

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".into());
        log::info!(
            "Using {} (Vulkan {}.{}.{}), validation {}",
            device_name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version),
            if debug.is_some() { "on" } else { "off" }
        );

        let capabilities = DeviceCapabilities {
            device_name,
            graphics_family: queue_family,
            present_family: queue_family,
            compute_family: Some(queue_family),
            ray_tracing: false,
            dynamic_rendering: true,
            synchronization2: true,
            max_sampler_anisotropy: if anisotropy {
                properties.limits.max_sampler_anisotropy.min(16.0)
            } else {
                1.0
            },
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
        };

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_fn,
            surface,
            physical_device,
            device,
            swapchain_fn,
            queue,
            queue_family,
            capabilities,
        })
    }

    /// Destroy the device, surface and instance. Every child object must
    /// already be gone.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_device(None);
        self.surface_fn.destroy_surface(self.surface, None);
        if let Some((loader, messenger)) = self.debug.take() {
            loader.destroy_debug_utils_messenger(messenger, None);
        }
        self.instance.destroy_instance(None);
    }
}
