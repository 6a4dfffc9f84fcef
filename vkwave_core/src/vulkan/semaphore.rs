use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use super::device::DeviceShared;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SemaphoreType {
    Binary,
    Timeline,
}

/// A binary or timeline semaphore. Timeline semaphores back the monotonic
/// per-group signal counter (`ExecutionGroup`'s synchronization point);
/// binary semaphores back acquire/present hand-off.
pub struct Semaphore {
    device: Arc<DeviceShared>,
    pub(crate) raw: vk::Semaphore,
    pub kind: SemaphoreType,
}

impl Semaphore {
    pub(crate) fn new(device: Arc<DeviceShared>, kind: SemaphoreType, initial_value: u64) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default().semaphore_type(match kind {
            SemaphoreType::Binary => vk::SemaphoreType::BINARY,
            SemaphoreType::Timeline => vk::SemaphoreType::TIMELINE,
        });
        if kind == SemaphoreType::Timeline {
            type_info = type_info.initial_value(initial_value);
        }
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let raw = unsafe { device.raw.create_semaphore(&info, None)? };

        Ok(Self { device, raw, kind })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }

    /// Current counter value. Only meaningful for timeline semaphores.
    pub fn counter_value(&self) -> Result<u64> {
        debug_assert_eq!(self.kind, SemaphoreType::Timeline);
        Ok(unsafe { self.device.raw.get_semaphore_counter_value(self.raw)? })
    }

    /// Blocks the calling thread until the timeline counter reaches `value`.
    pub fn wait_at_least(&self, value: u64) -> Result<()> {
        debug_assert_eq!(self.kind, SemaphoreType::Timeline);
        if value == 0 {
            return Ok(());
        }
        let semaphores = [self.raw];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.raw.wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_semaphore(self.raw, None);
        }
    }
}
