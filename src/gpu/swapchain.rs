use crate::error::{RenderError, RenderResult};
use crate::gpu;
use ash::vk;
use std::ptr;
use std::sync::Arc;

/// Surface capability sentinel meaning "the surface imposes no size, use
/// whatever the caller asked for".
const UNRESTRICTED_DIMENSION: u32 = u32::MAX;

/// True for the driver conditions resolved by rebuilding the swapchain.
/// Everything else coming out of acquire/present is fatal.
pub fn is_recoverable_result(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_DATE_KHR
            | vk::Result::SUBOPTIMAL_KHR
            | vk::Result::ERROR_SURFACE_LOST_KHR
    )
}

/// Picks the swapchain extent: the surface's own size when it reports one,
/// otherwise the requested size clamped into the surface's [min, max].
pub fn clamp_extent(
    requested: vk::Extent2D,
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::Extent2D {
    if capabilities.current_extent.width != UNRESTRICTED_DIMENSION {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

#[derive(Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn choose_format(&self, preferred_formats: &[vk::Format]) -> vk::SurfaceFormatKHR {
        for preferred_format in preferred_formats.iter() {
            for available_format in self.formats.iter() {
                if *preferred_format == available_format.format {
                    return *available_format;
                }
            }
        }

        self.formats[0]
    }

    pub fn choose_presentation_mode(
        &self,
        preferred_present_modes: &[vk::PresentModeKHR],
    ) -> vk::PresentModeKHR {
        for preferred_mode in preferred_present_modes.iter() {
            for available_mode in self.present_modes.iter() {
                if preferred_mode == available_mode {
                    return *preferred_mode;
                }
            }
        }

        vk::PresentModeKHR::FIFO
    }
}

/// Whether the swapchain can serve frames or must be rebuilt first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SwapchainState {
    Ready,
    NeedsRecovery,
}

pub struct SwapchainPreferred<'a> {
    pub preferred_format: &'a [vk::Format],
    pub preferred_present_modes: &'a [vk::PresentModeKHR],
}

/// Owns the presentable images, their views and framebuffers. Acquire and
/// present translate resize-class driver results into the recoverable
/// error and flip the state to `NeedsRecovery`; `recreate` rebuilds
/// everything against fresh surface capabilities and flips it back.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub clear_values: [vk::ClearValue; 2],
    image_index: u32,
    state: SwapchainState,
    present_mode: vk::PresentModeKHR,
    loader: ash::extensions::khr::Swapchain,

    // Reference-counting
    device: Arc<gpu::Device>,
    surface: Arc<gpu::Surface>,
    physical_device: Arc<gpu::PhysicalDevice>,
}

impl Swapchain {
    pub fn new(
        swapchain_loader: ash::extensions::khr::Swapchain,
        physical_device: Arc<gpu::PhysicalDevice>,
        device: Arc<gpu::Device>,
        surface: Arc<gpu::Surface>,
        preferred: SwapchainPreferred,
        requested_extent: vk::Extent2D,
        render_pass: vk::RenderPass,
        depth_view: vk::ImageView,
    ) -> RenderResult<Swapchain> {
        let support = physical_device.get_swapchain_support(&surface.loader, surface.handle)?;
        let surface_format = support.choose_format(preferred.preferred_format);
        let present_mode = support.choose_presentation_mode(preferred.preferred_present_modes);

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let mut swapchain = Swapchain {
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            extent: vk::Extent2D::default(),
            surface_format,
            clear_values,
            image_index: 0,
            state: SwapchainState::NeedsRecovery,
            present_mode,
            loader: swapchain_loader,
            device,
            surface,
            physical_device,
        };
        swapchain.build(requested_extent, render_pass, depth_view)?;
        Ok(swapchain)
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Index of the most recently acquired presentable image.
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn current_framebuffer(&self) -> vk::Framebuffer {
        self.framebuffers[self.image_index as usize]
    }

    fn build(
        &mut self,
        requested_extent: vk::Extent2D,
        render_pass: vk::RenderPass,
        depth_view: vk::ImageView,
    ) -> RenderResult<()> {
        let support = self
            .physical_device
            .get_swapchain_support(&self.surface.loader, self.surface.handle)?;
        let capabilities = &support.capabilities;
        let extent = clamp_extent(requested_extent, capabilities);

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let families = [
            self.device.graphics_family,
            self.device.present_family,
        ];
        let concurrent = self.device.graphics_family != self.device.present_family;
        let swapchain_ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface.handle,
            min_image_count: image_count,
            image_format: self.surface_format.format,
            image_color_space: self.surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: if concurrent {
                vk::SharingMode::CONCURRENT
            } else {
                vk::SharingMode::EXCLUSIVE
            },
            queue_family_index_count: if concurrent { 2 } else { 0 },
            p_queue_family_indices: if concurrent { families.as_ptr() } else { ptr::null() },
            pre_transform: capabilities.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: self.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..vk::SwapchainCreateInfoKHR::default()
        };
        let handle = unsafe { self.loader.create_swapchain(&swapchain_ci, None)? };

        // Retrieve swapchain images and build one view + framebuffer each
        let images = unsafe { self.loader.get_swapchain_images(handle) }.map_err(|e| {
            unsafe { self.loader.destroy_swapchain(handle, None) };
            RenderError::from(e)
        })?;
        if images.len() > gpu::MAX_SWAPCHAIN_IMAGES {
            unsafe { self.loader.destroy_swapchain(handle, None) };
            return Err(RenderError::NoSpace("swapchain images"));
        }

        let mut image_views = Vec::with_capacity(images.len());
        let mut framebuffers = Vec::with_capacity(images.len());
        for &image in images.iter() {
            let image_view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.surface_format.format,
                components: vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                },
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..vk::ImageViewCreateInfo::default()
            };
            let view = match unsafe { self.device.handle.create_image_view(&image_view_ci, None) }
            {
                Ok(view) => view,
                Err(e) => {
                    Swapchain::destroy_partial(&self.device, &self.loader, handle, &framebuffers, &image_views);
                    return Err(e.into());
                }
            };
            image_views.push(view);

            let attachments = [view, depth_view];
            let framebuffer_ci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let framebuffer =
                match unsafe { self.device.handle.create_framebuffer(&framebuffer_ci, None) } {
                    Ok(framebuffer) => framebuffer,
                    Err(e) => {
                        Swapchain::destroy_partial(&self.device, &self.loader, handle, &framebuffers, &image_views);
                        return Err(e.into());
                    }
                };
            framebuffers.push(framebuffer);
        }

        self.handle = handle;
        self.images = images;
        self.image_views = image_views;
        self.framebuffers = framebuffers;
        self.extent = extent;
        self.image_index = 0;
        self.state = SwapchainState::Ready;

        log::debug!(
            "swapchain built: {} images at {}x{}",
            self.images.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn destroy_partial(
        device: &gpu::Device,
        loader: &ash::extensions::khr::Swapchain,
        handle: vk::SwapchainKHR,
        framebuffers: &[vk::Framebuffer],
        image_views: &[vk::ImageView],
    ) {
        unsafe {
            for &framebuffer in framebuffers.iter().rev() {
                device.handle.destroy_framebuffer(framebuffer, None);
            }
            for &view in image_views.iter().rev() {
                device.handle.destroy_image_view(view, None);
            }
            loader.destroy_swapchain(handle, None);
        }
    }

    /// Reverse-creation-order teardown: framebuffers, then views, then the
    /// swapchain itself.
    fn destroy_resources(&mut self) {
        unsafe {
            for &framebuffer in self.framebuffers.iter().rev() {
                self.device.handle.destroy_framebuffer(framebuffer, None);
            }
            for &view in self.image_views.iter().rev() {
                self.device.handle.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
        self.framebuffers.clear();
        self.image_views.clear();
        self.images.clear();
        self.handle = vk::SwapchainKHR::null();
    }

    /// Requests the next presentable image, signaling the slot's
    /// image-available semaphore once it is usable. Resize-class results
    /// flip the state to `NeedsRecovery` and come back as the recoverable
    /// error; the caller must `recreate` before retrying.
    pub fn acquire_next_image(&mut self, sync: &gpu::FrameSync) -> RenderResult<u32> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                u64::MAX,
                sync.image_available().get_handle(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, false)) => {
                self.image_index = index;
                Ok(index)
            }
            Ok((_, true)) => {
                self.state = SwapchainState::NeedsRecovery;
                Err(RenderError::SwapchainOutOfDate)
            }
            Err(e) if is_recoverable_result(e) => {
                self.state = SwapchainState::NeedsRecovery;
                Err(RenderError::SwapchainOutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queues the acquired image for presentation once the slot's
    /// render-done semaphore signals.
    pub fn present(&mut self, sync: &gpu::FrameSync) -> RenderResult<()> {
        let wait_semaphores = [sync.render_done().get_handle()];
        let swapchains = [self.handle];
        let image_indices = [self.image_index];
        let present_info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: image_indices.as_ptr(),
            ..Default::default()
        };

        let result = unsafe {
            self.loader
                .queue_present(self.device.present_queue, &present_info)
        };
        match result {
            Ok(false) => Ok(()),
            Ok(true) => {
                self.state = SwapchainState::NeedsRecovery;
                Err(RenderError::SwapchainOutOfDate)
            }
            Err(e) if is_recoverable_result(e) => {
                self.state = SwapchainState::NeedsRecovery;
                Err(RenderError::SwapchainOutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tears down and rebuilds against current surface capabilities. The
    /// caller serializes this against acquire/present and must have idled
    /// the device.
    pub fn recreate(
        &mut self,
        requested_extent: vk::Extent2D,
        render_pass: vk::RenderPass,
        depth_view: vk::ImageView,
    ) -> RenderResult<()> {
        self.destroy_resources();
        self.build(requested_extent, render_pass, depth_view)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn surface_reported_extent_wins() {
        let caps = capabilities((800, 600), (1, 1), (4096, 4096));
        let extent = clamp_extent(
            vk::Extent2D {
                width: 123,
                height: 456,
            },
            &caps,
        );
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn unrestricted_surface_clamps_requested_size() {
        let caps = capabilities((UNRESTRICTED_DIMENSION, 600), (200, 200), (1920, 1080));
        let extent = clamp_extent(
            vk::Extent2D {
                width: 4000,
                height: 100,
            },
            &caps,
        );
        assert_eq!((extent.width, extent.height), (1920, 200));
    }

    #[test]
    fn unrestricted_surface_keeps_in_range_request() {
        let caps = capabilities((UNRESTRICTED_DIMENSION, 0), (200, 200), (1920, 1080));
        let extent = clamp_extent(
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            &caps,
        );
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn resize_class_results_are_recoverable() {
        assert!(is_recoverable_result(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(is_recoverable_result(vk::Result::SUBOPTIMAL_KHR));
        assert!(is_recoverable_result(vk::Result::ERROR_SURFACE_LOST_KHR));
    }

    #[test]
    fn other_results_stay_fatal() {
        assert!(!is_recoverable_result(vk::Result::ERROR_DEVICE_LOST));
        assert!(!is_recoverable_result(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert!(!is_recoverable_result(vk::Result::TIMEOUT));
    }
}
