use crate::error::RenderResult;
use crate::gpu;
use std::sync::Arc;

/// Effectively an infinite wait; a frame fence that never signals means
/// the device is lost.
pub const FRAME_TIMEOUT_NS: u64 = u64::MAX;

/// Per-slot synchronization set: one fence marking host-observable frame
/// completion, plus the acquire/present semaphore pair ordering work on
/// the device timeline.
pub struct FrameSync {
    device: Arc<gpu::Device>,
    in_flight_fence: gpu::Fence,
    image_available_semaphore: gpu::Semaphore,
    render_done_semaphore: gpu::Semaphore,
}

impl FrameSync {
    pub fn new(device: Arc<gpu::Device>) -> RenderResult<Self> {
        // Signaled so the first wait on a fresh slot does not block.
        let in_flight_fence = gpu::Fence::new(device.clone(), true)?;
        let image_available_semaphore = gpu::Semaphore::new(device.clone())?;
        let render_done_semaphore = gpu::Semaphore::new(device.clone())?;

        Ok(FrameSync {
            device,
            in_flight_fence,
            image_available_semaphore,
            render_done_semaphore,
        })
    }

    pub fn fence(&self) -> &gpu::Fence {
        &self.in_flight_fence
    }

    pub fn image_available(&self) -> &gpu::Semaphore {
        &self.image_available_semaphore
    }

    pub fn render_done(&self) -> &gpu::Semaphore {
        &self.render_done_semaphore
    }

    /// Blocks until the slot's previous submission has completed.
    pub fn wait(&self) -> RenderResult<()> {
        self.in_flight_fence.wait(FRAME_TIMEOUT_NS)
    }

    pub fn reset(&self) -> RenderResult<()> {
        self.in_flight_fence.reset()
    }

    /// Replaces only the semaphore pair. After a swapchain rebuild the old
    /// acquire semaphore may hold a signal for an image that no longer
    /// exists, which would desynchronize acquire/present; the fence state
    /// stays valid and is kept.
    pub fn resync(&mut self) -> RenderResult<()> {
        self.image_available_semaphore = gpu::Semaphore::new(self.device.clone())?;
        self.render_done_semaphore = gpu::Semaphore::new(self.device.clone())?;
        Ok(())
    }
}
