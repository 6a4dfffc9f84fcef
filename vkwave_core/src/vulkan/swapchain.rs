use std::sync::Arc;

use anyhow::{Context, Result};
use ash::khr;
use ash::vk;

use super::device::{Device, DeviceShared};

/// Swapchain half of the External Interfaces contract. Presentation-mode
/// requests that the surface does not support are a hard error rather than
/// a silent fallback, so misconfiguration is caught at startup.
pub struct Swapchain {
    device: Arc<DeviceShared>,
    loader: khr::swapchain::Device,
    raw: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        device: &Device,
        preferred_present_mode: vk::PresentModeKHR,
        min_image_count_hint: u32,
    ) -> Result<Self> {
        Self::create(device.shared.clone(), preferred_present_mode, min_image_count_hint, None)
    }

    fn create(
        device: Arc<DeviceShared>,
        preferred_present_mode: vk::PresentModeKHR,
        min_image_count_hint: u32,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let physical = device.physical_device.raw;
        let surface = &device.surface;

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical, surface.raw)?
        };
        let surface_format = *formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .unwrap_or(&formats[0]);

        let available_present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical, surface.raw)?
        };
        if !available_present_modes.contains(&preferred_present_mode) {
            return Err(anyhow::anyhow!(
                "present mode {preferred_present_mode:?} is not supported by this surface (available: {available_present_modes:?})"
            ));
        }

        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(physical, surface.raw)?
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            capabilities.max_image_extent
        };

        let mut image_count = capabilities.min_image_count.max(min_image_count_hint);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.raw)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .present_mode(preferred_present_mode)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let loader = khr::swapchain::Device::new(&device.instance.raw, &device.raw);
        let raw = unsafe { loader.create_swapchain(&create_info, None)? };

        if let Some(old) = old_swapchain {
            unsafe { loader.destroy_swapchain(old, None) };
        }

        let images = unsafe { loader.get_swapchain_images(raw)? };
        let image_views = images
            .iter()
            .map(|&image| {
                let info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .level_count(1)
                            .layer_count(1),
                    );
                Ok(unsafe { device.raw.create_image_view(&info, None)? })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device,
            loader,
            raw,
            images,
            image_views,
            surface_format,
            present_mode: preferred_present_mode,
            extent,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn image_format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn is_vsync(&self) -> bool {
        matches!(
            self.present_mode,
            vk::PresentModeKHR::FIFO | vk::PresentModeKHR::FIFO_RELAXED
        )
    }

    /// Recreates the swapchain in place at the current surface extent,
    /// reusing the previous present mode. The caller must have drained all
    /// GPU work referencing the old images before calling this.
    pub fn recreate(&mut self) -> Result<()> {
        let recreated = Self::create(self.device.clone(), self.present_mode, self.images.len() as u32, Some(self.raw))?;
        self.destroy_views();
        *self = recreated;
        Ok(())
    }

    pub fn acquire_next_image(&self, signal_semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.raw, u64::MAX, signal_semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SwapchainError::OutOfDate.into()),
            Err(e) => Err(e).context("vkAcquireNextImageKHR failed"),
        }
    }

    pub fn queue_present(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        image_index: u32,
    ) -> Result<bool> {
        let swapchains = [self.raw];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.loader.queue_present(queue, &info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SwapchainError::OutOfDate.into()),
            Err(e) => Err(e).context("vkQueuePresentKHR failed"),
        }
    }

    fn destroy_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.raw.destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        unsafe { self.loader.destroy_swapchain(self.raw, None) };
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SwapchainError {
    #[error("swapchain is out of date and must be rebuilt")]
    OutOfDate,
}
