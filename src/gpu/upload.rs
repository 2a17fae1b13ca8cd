use crate::error::{RenderError, RenderResult};
use crate::gpu;
use ash::vk;
use std::sync::{Arc, Mutex};

/// Starting size of the staging buffer. Grows on demand and never shrinks.
const INITIAL_STAGING_SIZE: vk::DeviceSize = 1 << 20;

/// Host-visible staging buffer shared by every upload. Single-checkout:
/// `acquire` fails while a previous checkout has not been released, which
/// keeps the synchronous upload path honest about reuse.
pub struct UploadBuffer {
    buffer: gpu::DeviceBuffer,
    in_use: bool,
    device: Arc<gpu::Device>,
    allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
}

impl UploadBuffer {
    pub fn new(
        device: Arc<gpu::Device>,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
    ) -> RenderResult<Self> {
        let buffer = gpu::DeviceBuffer::new_host_visible(
            "upload staging",
            INITIAL_STAGING_SIZE,
            vk::BufferUsageFlags::TRANSFER_SRC,
            device.clone(),
            allocator.clone(),
        )?;
        Ok(UploadBuffer {
            buffer,
            in_use: false,
            device,
            allocator,
        })
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    /// Checks out the staging buffer with at least `size` bytes, growing
    /// the backing store first when it is too small. Replacing the store
    /// here is safe: the previous upload completed before its `release`,
    /// so nothing on the device still reads the old buffer.
    pub fn acquire(&mut self, size: vk::DeviceSize) -> RenderResult<&mut gpu::DeviceBuffer> {
        if self.in_use {
            return Err(RenderError::NoSpace("upload staging"));
        }
        if size > self.buffer.size() {
            let new_size = size.next_power_of_two();
            log::debug!("growing upload staging buffer to {} bytes", new_size);
            self.buffer = gpu::DeviceBuffer::new_host_visible(
                "upload staging",
                new_size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                self.device.clone(),
                self.allocator.clone(),
            )?;
        }
        self.in_use = true;
        Ok(&mut self.buffer)
    }

    /// Returns the buffer after the upload's submission has completed.
    pub fn release(&mut self) {
        self.in_use = false;
    }
}

/// One-shot command recording for uploads and other out-of-frame work.
/// `begin` hands out a recording buffer; `submit` runs it on the graphics
/// queue and blocks until its fence signals, so the caller may free or
/// reuse any staging memory immediately after.
pub struct ImmediateCommands {
    pool: gpu::CommandPool,
    command_buffer: gpu::CommandBuffer,
    fence: gpu::Fence,
    device: Arc<gpu::Device>,
}

impl ImmediateCommands {
    pub fn new(device: Arc<gpu::Device>) -> RenderResult<Self> {
        let pool = gpu::CommandPool::new(
            vk::CommandPoolCreateFlags::TRANSIENT,
            device.graphics_family,
            device.clone(),
        )?;
        let command_buffer =
            gpu::CommandBuffer::new(&pool, vk::CommandBufferLevel::PRIMARY, &device)?;
        let fence = gpu::Fence::new(device.clone(), false)?;
        Ok(ImmediateCommands {
            pool,
            command_buffer,
            fence,
            device,
        })
    }

    pub fn begin(&self) -> RenderResult<vk::CommandBuffer> {
        self.pool.reset()?;
        self.command_buffer.begin(&self.device)?;
        Ok(self.command_buffer.get_handle())
    }

    pub fn submit(&self) -> RenderResult<()> {
        self.command_buffer.end(&self.device)?;

        let command_buffers = [self.command_buffer.get_handle()];
        let submit_info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: command_buffers.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device.handle.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                self.fence.get_handle(),
            )?
        };
        self.fence.wait(gpu::FRAME_TIMEOUT_NS)?;
        self.fence.reset()
    }
}
