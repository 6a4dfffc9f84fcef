use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::device::{Device, DeviceShared};

pub struct BufferDescriptor<'a> {
    pub name: &'a str,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

/// A `VkBuffer` plus its `gpu-allocator` allocation. Host-visible buffers
/// are mapped for their entire lifetime (every auto-buffer in an
/// `ExecutionGroup` is host-visible + host-coherent, so there is never a
/// reason to map/unmap per write).
pub struct Buffer {
    device: Arc<DeviceShared>,
    pub(crate) raw: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: u64,
}

impl Buffer {
    pub fn new(device: &Device, desc: BufferDescriptor) -> Result<Self> {
        let shared = device.shared.clone();

        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { shared.raw.create_buffer(&create_info, None)? };
        let requirements = unsafe { shared.raw.get_buffer_memory_requirements(raw) };

        let allocation = shared.allocator.lock().allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: desc.location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            shared
                .raw
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())?
        };

        device.set_debug_name(raw, desc.name);

        Ok(Self {
            device: shared,
            raw,
            allocation: Some(allocation),
            size: desc.size,
        })
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    /// Writes `data` at `offset` bytes into the mapped allocation.
    /// Panics (invariant violation, not a caller-recoverable error) if the
    /// buffer was not created with a host-visible memory location.
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T], offset: u64) {
        let bytes = bytemuck::cast_slice(data);
        let slice = self
            .allocation
            .as_mut()
            .expect("buffer allocation already freed")
            .mapped_slice_mut()
            .expect("write() requires a host-visible buffer");
        let start = offset as usize;
        slice[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr() as *mut u8)
    }

    /// Copies `len` bytes out of the mapped allocation. Panics if the
    /// buffer is not host-visible or `len` exceeds its size — both are
    /// programming errors, never a caller-recoverable condition.
    pub fn read_bytes(&self, len: usize) -> Vec<u8> {
        assert!(len as u64 <= self.size, "read_bytes: len exceeds buffer size");
        let ptr = self
            .mapped_ptr()
            .expect("read_bytes() requires a host-visible buffer");
        unsafe { std::slice::from_raw_parts(ptr, len).to_vec() }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator.lock().free(allocation);
        }
        unsafe { self.device.raw.destroy_buffer(self.raw, None) };
    }
}
