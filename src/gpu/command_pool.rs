use crate::error::RenderResult;
use crate::gpu;
use ash::vk;
use std::sync::Arc;

pub struct CommandPool {
    handle: vk::CommandPool,
    device: Arc<gpu::Device>,
}

impl CommandPool {
    pub fn new(
        flags: vk::CommandPoolCreateFlags,
        queue_family_index: u32,
        device: Arc<gpu::Device>,
    ) -> RenderResult<Self> {
        let pool_ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags,
            queue_family_index,
            ..Default::default()
        };
        let pool = unsafe { device.handle.create_command_pool(&pool_ci, None)? };
        Ok(CommandPool {
            handle: pool,
            device,
        })
    }

    pub fn get_handle(&self) -> vk::CommandPool {
        self.handle
    }

    /// Returns every buffer allocated from this pool to the initial
    /// state. Cheaper than resetting buffers one by one and the only
    /// reset the frame loop needs.
    pub fn reset(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .handle
                .reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())?
        };
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_command_pool(self.handle, None);
        };
    }
}
