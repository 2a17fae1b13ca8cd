use crate::error::{RenderError, RenderResult};
use crate::gpu;
use ash::vk;
use std::sync::Arc;

pub struct Fence {
    device: Arc<gpu::Device>,
    handle: vk::Fence,
}

impl Fence {
    pub fn new(device: Arc<gpu::Device>, signaled: bool) -> RenderResult<Self> {
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };

        let handle = unsafe { device.handle.create_fence(&fence_ci, None)? };

        Ok(Fence { device, handle })
    }

    pub fn get_handle(&self) -> vk::Fence {
        self.handle
    }

    /// Blocks until the fence is signaled. An elapsed timeout means the
    /// device stopped making progress, which is unrecoverable.
    pub fn wait(&self, timeout: u64) -> RenderResult<()> {
        let fences = [self.handle];
        let result = unsafe { self.device.handle.wait_for_fences(&fences, true, timeout) };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RenderError::FenceTimeout),
            Err(e) => Err(e.into()),
        }
    }

    pub fn reset(&self) -> RenderResult<()> {
        let fences = [self.handle];
        unsafe { self.device.handle.reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_fence(self.handle, None);
        };
    }
}
