use anyhow::Result;
use ash::vk;

use crate::vulkan::command::{CommandBuffer, CommandPool};
use crate::vulkan::device::Device;

/// One ring slot's worth of per-frame GPU resources: a single-buffer
/// command pool plus its primary command buffer, and (for groups that own
/// a render pass) a framebuffer rebuilt whenever the group resizes.
pub struct FrameResources {
    pub command_pool: CommandPool,
    pub command_buffer: CommandBuffer,
    pub framebuffer: Option<vk::Framebuffer>,
}

pub fn create_frame_resources(device: &Device, count: u32) -> Result<Vec<FrameResources>> {
    (0..count)
        .map(|_| {
            let pool = CommandPool::new(device.shared.clone(), device.graphics_present_family_index())?;
            let command_buffer = pool.allocate_primary(1)?.remove(0);
            Ok(FrameResources {
                command_pool: pool,
                command_buffer,
                framebuffer: None,
            })
        })
        .collect()
}

/// Destroys the framebuffer associated with each slot (if any) and then
/// drops the slot's command pool (which frees its command buffer). Takes
/// the raw device handle rather than `&Device` so it can also be called
/// from a `Drop` impl that only has an `Arc<DeviceShared>` on hand.
/// Idempotent: called again on an already-emptied vector is a no-op.
pub fn destroy_frame_resources(device: &ash::Device, frames: &mut Vec<FrameResources>) {
    for frame in frames.drain(..) {
        if let Some(framebuffer) = frame.framebuffer {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }
}
