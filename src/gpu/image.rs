use crate::error::RenderResult;
use crate::gpu;
use ash::vk;
use std::sync::{Arc, Mutex};

pub struct AllocatedImage {
    handle: vk::Image,
    view: vk::ImageView,
    allocation: gpu_allocator::vulkan::Allocation,
    extent: vk::Extent3D,
    format: vk::Format,

    device: Arc<gpu::Device>,
    allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
}

impl AllocatedImage {
    pub fn new(
        image_ci: vk::ImageCreateInfo,
        image_aspect_flags: vk::ImageAspectFlags,
        device: Arc<gpu::Device>,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
    ) -> RenderResult<Self> {
        let handle = unsafe { device.handle.create_image(&image_ci, None)? };
        let requirements = unsafe { device.handle.get_image_memory_requirements(handle) };
        // Allocate image into gpu memory
        let allocation = {
            let mut allocator_lock = allocator.lock().unwrap();
            let allocation =
                allocator_lock.allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                    name: "image",
                    requirements,
                    location: gpu_allocator::MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
                })?;
            unsafe {
                device
                    .handle
                    .bind_image_memory(handle, allocation.memory(), allocation.offset())?
            };
            allocation
        };

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: handle,
            view_type: vk::ImageViewType::TYPE_2D,
            format: image_ci.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: image_aspect_flags,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = unsafe { device.handle.create_image_view(&view_ci, None)? };

        Ok(AllocatedImage {
            handle,
            view,
            allocation,
            extent: image_ci.extent,
            format: image_ci.format,

            device,
            allocator,
        })
    }

    /// Depth attachment sized to the swapchain extent.
    pub fn new_depth(
        extent: vk::Extent2D,
        format: vk::Format,
        device: Arc<gpu::Device>,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
    ) -> RenderResult<Self> {
        let image_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        AllocatedImage::new(image_ci, vk::ImageAspectFlags::DEPTH, device, allocator)
    }

    pub fn get_handle(&self) -> vk::Image {
        self.handle
    }

    pub fn get_view(&self) -> vk::ImageView {
        self.view
    }

    pub fn get_format(&self) -> vk::Format {
        self.format
    }

    pub fn get_extent(&self) -> vk::Extent3D {
        self.extent
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_image_view(self.view, None);
            self.device.handle.destroy_image(self.handle, None);
        };
        let mut allocator = self.allocator.lock().unwrap();
        let _ = allocator.free(std::mem::take(&mut self.allocation));
    }
}
