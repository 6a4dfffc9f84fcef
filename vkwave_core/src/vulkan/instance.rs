use std::ffi::{c_void, CStr, CString};

use anyhow::Result;
use ash::ext::debug_utils;
use ash::vk;
use raw_window_handle::RawDisplayHandle;

use super::surface::Surface;

/// Thin wrapper around a `VkInstance` plus its debug-utils messenger.
///
/// Validation is always enabled: this engine targets development and
/// screenshot-driven verification workflows, not a shipping game.
pub struct Instance {
    pub(crate) entry: ash::Entry,
    pub(crate) raw: ash::Instance,
    debug_utils: debug_utils::Instance,
    debug_utils_messenger: vk::DebugUtilsMessengerEXT,
}

impl Instance {
    pub fn new(display_handle: RawDisplayHandle) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let app_name = CString::new("vkwave").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .api_version(vk::API_VERSION_1_2);

        let mut extension_names =
            ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        extension_names.push(debug_utils::NAME.as_ptr());

        let layer_strings = vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()];
        let layer_names: Vec<*const i8> =
            layer_strings.iter().map(|c_str| c_str.as_ptr()).collect();

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let raw = unsafe { entry.create_instance(&instance_info, None)? };

        let debug_utils_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .flags(vk::DebugUtilsMessengerCreateFlagsEXT::empty())
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_utils_callback));

        let debug_utils = debug_utils::Instance::new(&entry, &raw);
        let debug_utils_messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&debug_utils_info, None)? };

        Ok(Self {
            entry,
            raw,
            debug_utils,
            debug_utils_messenger,
        })
    }

    pub(crate) fn get_physical_devices(
        &self,
        surface: &Surface,
    ) -> Result<Vec<PhysicalDevice>> {
        let physical_devices = unsafe { self.raw.enumerate_physical_devices()? };
        physical_devices
            .into_iter()
            .map(|raw| PhysicalDevice::new_from_vulkan_handle(&self.raw, surface, raw))
            .collect::<Result<_>>()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::trace!("instance dropped");
        unsafe {
            self.debug_utils
                .destroy_debug_utils_messenger(self.debug_utils_messenger, None);
            self.raw.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_utils_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let severity = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => "verbose",
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => "warning",
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => "error",
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => "info",
        _ => "unknown",
    };
    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        _ => "unknown",
    };
    let message = CStr::from_ptr((*p_callback_data).p_message);
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[vk:{severity}:{kind}] {message:?}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[vk:{severity}:{kind}] {message:?}")
        }
        _ => log::debug!("[vk:{severity}:{kind}] {message:?}"),
    }

    vk::FALSE
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueFamily {
    pub(crate) index: u32,
    properties: vk::QueueFamilyProperties,
    pub(crate) supports_present: bool,
}

impl QueueFamily {
    fn new(index: u32, properties: vk::QueueFamilyProperties, supports_present: bool) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    fn supports_graphics(&self) -> bool {
        self.properties
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PhysicalDevice {
    pub(crate) raw: vk::PhysicalDevice,
    pub(crate) name: String,
    device_type: vk::PhysicalDeviceType,
    pub(crate) limits: vk::PhysicalDeviceLimits,
    pub(crate) queue_families: Vec<QueueFamily>,
}

impl PhysicalDevice {
    fn new_from_vulkan_handle(
        instance: &ash::Instance,
        surface: &Surface,
        raw: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(raw) };
        let name = unsafe {
            CStr::from_ptr(properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("<unnamed device>")
                .to_owned()
        };

        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(raw) };
        let queue_families = queue_family_properties
            .into_iter()
            .enumerate()
            .map(|(index, props)| {
                let present_support = unsafe {
                    surface.loader.get_physical_device_surface_support(
                        raw,
                        index as u32,
                        surface.raw,
                    )?
                };
                Ok(QueueFamily::new(index as u32, props, present_support))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            raw,
            name,
            device_type: properties.device_type,
            limits: properties.limits,
            queue_families,
        })
    }
}

/// Prefers a discrete GPU; falls back to the first device exposing a
/// combined graphics+present queue family.
pub(crate) fn select_physical_device(devices: &[PhysicalDevice]) -> Result<PhysicalDevice> {
    let suitable = devices
        .iter()
        .filter(|d| {
            d.queue_families
                .iter()
                .any(|f| f.supports_graphics() && f.supports_present)
        })
        .collect::<Vec<_>>();

    let chosen = suitable
        .iter()
        .find(|d| d.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| suitable.first())
        .ok_or_else(|| anyhow::anyhow!("no suitable Vulkan physical device found"))?;

    Ok((*chosen).clone())
}

pub(crate) fn select_graphics_present_family(device: &PhysicalDevice) -> Result<u32> {
    device
        .queue_families
        .iter()
        .find(|f| f.supports_graphics() && f.supports_present)
        .map(|f| f.index)
        .ok_or_else(|| anyhow::anyhow!("device exposes no graphics+present queue family"))
}
