use ash::vk;
use thiserror::Error;

/// Crate-wide error type.
///
/// Three classes matter to callers:
/// - [`RenderError::SwapchainOutOfDate`] is recoverable: rebuild the
///   swapchain and retry the frame.
/// - [`RenderError::NoFrameMemory`] and [`RenderError::NoSpace`] signal
///   exhaustion of a heap or a fixed-capacity table; the caller decides
///   whether to grow, defer, or abort the frame.
/// - Everything else is fatal and requires tearing the context down.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The surface changed under the swapchain (resize, surface loss,
    /// suboptimal). Recoverable via `Renderer::resize_swapchain`.
    #[error("swapchain requires recreation")]
    SwapchainOutOfDate,

    /// A frame-heap backing allocation could not be created.
    #[error("no frame memory left")]
    NoFrameMemory,

    /// A fixed-capacity table overflowed (swapchain images, garbage items).
    #[error("no space left in {0}")]
    NoSpace(&'static str),

    /// A fence wait hit the timeout. The timeout is effectively infinite,
    /// so this indicates a lost device.
    #[error("fence wait timed out, device presumed lost")]
    FenceTimeout,

    /// No physical device satisfied the surface/queue requirements.
    #[error("no suitable gpu found")]
    NoSuitableGpu,

    /// Any other driver-reported failure.
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("gpu allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("model load failed: {0}")]
    Model(#[from] gltf::Error),

    /// Scene data that parsed but cannot be represented (missing
    /// attributes, out-of-range references).
    #[error("invalid scene data: {0}")]
    InvalidScene(&'static str),
}

impl RenderError {
    /// True for conditions resolved by a swapchain rebuild rather than a
    /// context teardown.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::SwapchainOutOfDate)
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapchain_out_of_date_is_recoverable() {
        assert!(RenderError::SwapchainOutOfDate.is_recoverable());
    }

    #[test]
    fn exhaustion_and_fatal_are_not_recoverable() {
        assert!(!RenderError::NoFrameMemory.is_recoverable());
        assert!(!RenderError::NoSpace("garbage ring").is_recoverable());
        assert!(!RenderError::FenceTimeout.is_recoverable());
        assert!(!RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_recoverable());
    }
}
