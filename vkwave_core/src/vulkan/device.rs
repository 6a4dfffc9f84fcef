use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use anyhow::Result;
use ash::ext::debug_utils;
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationSizes, AllocatorDebugSettings};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::instance::{select_graphics_present_family, select_physical_device, Instance, PhysicalDevice};
use super::queue::Queue;
use super::surface::Surface;

/// Everything a `Device` needs to outlive every object it creates; shared
/// via `Arc` so buffers, images, pipelines and semaphores can each hold a
/// clone and release themselves independently in `Drop`.
pub struct DeviceShared {
    pub(crate) allocator: ManuallyDrop<Mutex<Allocator>>,
    pub(crate) raw: ash::Device,
    pub(crate) debug_utils: Option<debug_utils::Device>,
    pub(crate) physical_device: PhysicalDevice,
    pub(crate) graphics_present_family_index: u32,
    pub(crate) surface: Surface,
    pub(crate) instance: Instance,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            log::trace!("logical device dropped");
            ManuallyDrop::drop(&mut self.allocator);
            self.raw.destroy_device(None);
        }
    }
}

/// Owns the Vulkan instance, physical/logical device, surface and the
/// graphics+present queue. This is the `Device` half of the External
/// Interfaces contract: the render graph and execution groups depend only
/// on the methods exposed here, never on `ash` types reaching further back
/// than this module.
pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
    pub(crate) graphics_queue: Queue,
    debug_enabled: bool,
}

impl Device {
    pub fn new(
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
        debug_enabled: bool,
    ) -> Result<Self> {
        let instance = Instance::new(display_handle)?;
        let surface = Surface::new(&instance, window_handle, display_handle)?;

        let physical_devices = instance.get_physical_devices(&surface)?;
        let physical_device = select_physical_device(&physical_devices)?;
        let graphics_present_family_index = select_graphics_present_family(&physical_device)?;

        log::info!("selected physical device: {}", physical_device.name);

        let raw = Self::create_logical_device(
            &instance,
            &physical_device,
            graphics_present_family_index,
        )?;

        let debug_utils = debug_enabled.then(|| debug_utils::Device::new(&instance.raw, &raw));

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.raw.clone(),
            device: raw.clone(),
            physical_device: physical_device.raw,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: debug_enabled,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })?;

        let shared = Arc::new(DeviceShared {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            raw: raw.clone(),
            debug_utils,
            physical_device,
            graphics_present_family_index,
            surface,
            instance,
        });

        let raw_queue = unsafe { raw.get_device_queue(graphics_present_family_index, 0) };
        let graphics_queue =
            Queue::new(shared.clone(), raw_queue, graphics_present_family_index);

        Ok(Self {
            shared,
            graphics_queue,
            debug_enabled,
        })
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: &PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let extension_strs = ["VK_KHR_swapchain"];
        let extension_cstrs = extension_strs
            .iter()
            .map(|s| CString::new(*s))
            .collect::<Result<Vec<_>, _>>()?;
        let extension_ptrs = extension_cstrs.iter().map(|s| s.as_ptr()).collect::<Vec<_>>();

        let mut vulkan12_features =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features)
            .push_next(&mut vulkan12_features);

        let device = unsafe {
            instance
                .raw
                .create_device(physical_device.raw, &device_create_info, None)?
        };

        Ok(device)
    }

    pub fn raw(&self) -> &ash::Device {
        &self.shared.raw
    }

    pub fn instance_raw(&self) -> &ash::Instance {
        &self.shared.instance.raw
    }

    pub fn graphics_queue(&self) -> &Queue {
        &self.graphics_queue
    }

    pub fn graphics_present_family_index(&self) -> u32 {
        self.shared.graphics_present_family_index
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_enabled
    }

    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        let limits = &self.shared.physical_device.limits;
        let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        for count in [
            vk::SampleCountFlags::TYPE_64,
            vk::SampleCountFlags::TYPE_32,
            vk::SampleCountFlags::TYPE_16,
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_2,
        ] {
            if counts.contains(count) {
                return count;
            }
        }
        vk::SampleCountFlags::TYPE_1
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required_properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        let memory_properties = unsafe {
            self.shared
                .instance
                .raw
                .get_physical_device_memory_properties(self.shared.physical_device.raw)
        };
        (0..memory_properties.memory_type_count)
            .find(|&i| {
                (type_bits & (1 << i)) != 0
                    && memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(required_properties)
            })
            .ok_or_else(|| anyhow::anyhow!("no suitable memory type for mask {type_bits:#x}"))
    }

    /// No-op unless a debug-utils loader was created (i.e. `debug_enabled`).
    pub fn set_debug_name<T: vk::Handle>(&self, object: T, name: &str) {
        let Some(debug_utils) = &self.shared.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(&name);
        unsafe {
            let _ = debug_utils.set_debug_utils_object_name(&name_info);
        }
    }

    pub fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.shared.raw.create_fence(&info, None)? })
    }

    pub fn wait_for_device_idle(&self) -> Result<()> {
        unsafe { self.shared.raw.device_wait_idle()? };
        Ok(())
    }
}
