use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use super::device::DeviceShared;
use super::semaphore::Semaphore;

/// One semaphore wait or signal attached to a submission. `value` is
/// ignored for binary semaphores; required for timeline ones.
pub struct SemaphoreSubmit<'a> {
    pub semaphore: &'a Semaphore,
    pub stage_mask: vk::PipelineStageFlags2,
    pub value: u64,
}

impl<'a> SemaphoreSubmit<'a> {
    pub fn binary(semaphore: &'a Semaphore, stage_mask: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            stage_mask,
            value: 0,
        }
    }

    pub fn timeline(semaphore: &'a Semaphore, stage_mask: vk::PipelineStageFlags2, value: u64) -> Self {
        Self {
            semaphore,
            stage_mask,
            value,
        }
    }
}

/// Thin handle to a `VkQueue`. Submission uses `VkSubmitInfo2` /
/// `vkQueueSubmit2` (synchronization2) rather than the classic
/// `VkSubmitInfo`, matching how this engine's device layer is built
/// elsewhere in the codebase.
#[derive(Clone)]
pub struct Queue {
    device: Arc<DeviceShared>,
    pub(crate) raw: vk::Queue,
    family_index: u32,
}

impl Queue {
    pub(crate) fn new(device: Arc<DeviceShared>, raw: vk::Queue, family_index: u32) -> Self {
        Self {
            device,
            raw,
            family_index,
        }
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn raw(&self) -> vk::Queue {
        self.raw
    }

    pub fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        waits: &[SemaphoreSubmit],
        signals: &[SemaphoreSubmit],
    ) -> Result<()> {
        let wait_infos = waits
            .iter()
            .map(|w| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(w.semaphore.raw)
                    .stage_mask(w.stage_mask)
                    .value(w.value)
            })
            .collect::<Vec<_>>();

        let signal_infos = signals
            .iter()
            .map(|s| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(s.semaphore.raw)
                    .stage_mask(s.stage_mask)
                    .value(s.value)
            })
            .collect::<Vec<_>>();

        let command_buffer_infos = command_buffers
            .iter()
            .map(|cb| vk::CommandBufferSubmitInfo::default().command_buffer(*cb))
            .collect::<Vec<_>>();

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&command_buffer_infos);

        unsafe {
            self.device.raw.queue_submit2(
                self.raw,
                std::slice::from_ref(&submit_info),
                vk::Fence::null(),
            )?
        };

        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.raw.queue_wait_idle(self.raw)? };
        Ok(())
    }
}
