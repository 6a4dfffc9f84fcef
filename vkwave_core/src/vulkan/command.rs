use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use super::device::DeviceShared;

/// Single-buffer command pool: reset in bulk once per ring-slot reuse
/// rather than tracked per-command-buffer.
pub struct CommandPool {
    device: Arc<DeviceShared>,
    pub(crate) raw: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: Arc<DeviceShared>, queue_family_index: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index);
        let raw = unsafe { device.raw.create_command_pool(&info, None)? };
        Ok(Self { device, raw })
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .raw
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::empty())?
        };
        Ok(())
    }

    pub fn allocate_primary(&self, count: u32) -> Result<Vec<CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let raws = unsafe { self.device.raw.allocate_command_buffers(&info)? };
        Ok(raws
            .into_iter()
            .map(|raw| CommandBuffer {
                device: self.device.clone(),
                raw,
            })
            .collect())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_command_pool(self.raw, None) };
    }
}

/// Thin recording surface over a primary `VkCommandBuffer`. Owns no
/// lifetime of its own beyond the pool it was allocated from; destroyed
/// implicitly when the pool is reset or destroyed.
#[derive(Clone)]
pub struct CommandBuffer {
    device: Arc<DeviceShared>,
    pub raw: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn begin(&self) -> Result<()> {
        let info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.raw.begin_command_buffer(self.raw, &info)? };
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.device.raw.end_command_buffer(self.raw)? };
        Ok(())
    }

    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            self.device
                .raw
                .cmd_begin_render_pass(self.raw, &info, vk::SubpassContents::INLINE)
        };
    }

    pub fn end_render_pass(&self) {
        unsafe { self.device.raw.cmd_end_render_pass(self.raw) };
    }

    pub fn set_viewport_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device
                .raw
                .cmd_set_viewport(self.raw, 0, std::slice::from_ref(&viewport));
            self.device
                .raw
                .cmd_set_scissor(self.raw, 0, std::slice::from_ref(&scissor));
        }
    }

    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .raw
                .cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    pub fn bind_descriptor_set(&self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device.raw.cmd_bind_descriptor_sets(
                self.raw,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                std::slice::from_ref(&set),
                &[],
            )
        };
    }

    pub fn push_constants(&self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]) {
        unsafe {
            self.device
                .raw
                .cmd_push_constants(self.raw, layout, stages, 0, data)
        };
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .raw
                .cmd_draw(self.raw, vertex_count, instance_count, 0, 0)
        };
    }

    pub fn pipeline_barrier2(
        &self,
        image_barriers: &[vk::ImageMemoryBarrier2],
        buffer_barriers: &[vk::BufferMemoryBarrier2],
    ) {
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(image_barriers)
            .buffer_memory_barriers(buffer_barriers);
        unsafe {
            self.device
                .raw
                .cmd_pipeline_barrier2(self.raw, &dependency_info)
        };
    }

    pub fn copy_image_to_buffer(
        &self,
        image: vk::Image,
        image_layout: vk::ImageLayout,
        buffer: vk::Buffer,
        extent: vk::Extent3D,
    ) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(extent);
        unsafe {
            self.device.raw.cmd_copy_image_to_buffer(
                self.raw,
                image,
                image_layout,
                buffer,
                std::slice::from_ref(&region),
            )
        };
    }
}
