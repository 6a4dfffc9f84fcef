use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::device::{Device, DeviceShared};

pub struct ImageDescriptor<'a> {
    pub name: &'a str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect_mask: vk::ImageAspectFlags,
    pub samples: vk::SampleCountFlags,
}

/// A `VkImage` + view + device-local allocation. Used for the HDR scene
/// color target, the MSAA resolve target and the depth-stencil attachment
/// — every offscreen attachment the pipeline builder's render-pass recipes
/// reference.
pub struct Image {
    device: Arc<DeviceShared>,
    pub raw: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

impl Image {
    pub fn new(device: &Device, desc: ImageDescriptor) -> Result<Self> {
        let shared = device.shared.clone();

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = unsafe { shared.raw.create_image(&create_info, None)? };
        let requirements = unsafe { shared.raw.get_image_memory_requirements(raw) };

        let allocation = shared.allocator.lock().allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            shared
                .raw
                .bind_image_memory(raw, allocation.memory(), allocation.offset())?
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect_mask)
                    .level_count(1)
                    .layer_count(1),
            );
        let view = unsafe { shared.raw.create_image_view(&view_info, None)? };

        device.set_debug_name(raw, desc.name);

        Ok(Self {
            device: shared,
            raw,
            view,
            allocation: Some(allocation),
            extent: desc.extent,
            format: desc.format,
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_image_view(self.view, None) };
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator.lock().free(allocation);
        }
        unsafe { self.device.raw.destroy_image(self.raw, None) };
    }
}
