use crate::error::RenderResult;
use crate::gpu;
use ash::vk;
use std::sync::{Arc, Mutex};

/// Single owning record for a buffer and its memory. Everything else
/// passes the raw `vk::Buffer` handle around non-owningly.
pub struct DeviceBuffer {
    handle: vk::Buffer,
    allocation: gpu_allocator::vulkan::Allocation,
    size: vk::DeviceSize,

    device: Arc<gpu::Device>,
    allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
}

impl DeviceBuffer {
    pub fn new(
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: gpu_allocator::MemoryLocation,
        device: Arc<gpu::Device>,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
    ) -> RenderResult<Self> {
        let buffer_ci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let handle = unsafe { device.handle.create_buffer(&buffer_ci, None)? };
        let requirements = unsafe { device.handle.get_buffer_memory_requirements(handle) };

        let allocation = {
            let mut allocator_lock = allocator.lock().unwrap();
            let allocation =
                allocator_lock.allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
                })?;
            unsafe {
                device
                    .handle
                    .bind_buffer_memory(handle, allocation.memory(), allocation.offset())?
            };
            allocation
        };

        Ok(DeviceBuffer {
            handle,
            allocation,
            size,
            device,
            allocator,
        })
    }

    /// Device-local buffer filled through the staging path.
    pub fn new_gpu_only(
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        device: Arc<gpu::Device>,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
    ) -> RenderResult<Self> {
        DeviceBuffer::new(
            name,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            gpu_allocator::MemoryLocation::GpuOnly,
            device,
            allocator,
        )
    }

    /// Host-visible, persistently mapped buffer for per-frame writes.
    pub fn new_host_visible(
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        device: Arc<gpu::Device>,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
    ) -> RenderResult<Self> {
        DeviceBuffer::new(
            name,
            size,
            usage,
            gpu_allocator::MemoryLocation::CpuToGpu,
            device,
            allocator,
        )
    }

    pub fn get_handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Writes `data` at `offset` through the persistent mapping. Returns
    /// false when the buffer is not host-visible or the write would run
    /// past the end.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> bool {
        match self.allocation.mapped_slice_mut() {
            Some(mapped) if offset + data.len() <= mapped.len() => {
                mapped[offset..offset + data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_buffer(self.handle, None);
        };
        let mut allocator = self.allocator.lock().unwrap();
        let _ = allocator.free(std::mem::take(&mut self.allocation));
    }
}
