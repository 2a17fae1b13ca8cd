use crate::error::{RenderError, RenderResult};
use crate::gpu;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::{Arc, Mutex};

const PREFERRED_SURFACE_FORMATS: [vk::Format; 2] =
    [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];
const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
const DESCRIPTOR_POOL_SETS: u32 = 64;

pub struct RendererConfig {
    pub app_name: String,
    pub validation: bool,
    pub preferred_present_modes: Vec<vk::PresentModeKHR>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            app_name: "kestrel".to_string(),
            validation: cfg!(debug_assertions),
            preferred_present_modes: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        }
    }
}

/// Ties the frame slots, the swapchain and the garbage collector into one
/// begin/end cycle. One slot is active at a time; `begin_frame` readies it
/// for recording and `end_frame` submits, presents and rotates to the next
/// slot. Swapchain resize errors surface as the recoverable
/// `SwapchainOutOfDate`, after which `resize_swapchain` restores service.
pub struct Renderer {
    _instance: Arc<gpu::Instance>,
    _debug_messenger: Option<gpu::DebugMessenger>,
    surface: Arc<gpu::Surface>,
    physical_device: Arc<gpu::PhysicalDevice>,
    device: Arc<gpu::Device>,
    allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
    descriptors: gpu::DescriptorAllocator,
    render_pass: gpu::RenderPass,
    depth_image: gpu::AllocatedImage,
    swapchain: gpu::Swapchain,
    slots: Vec<gpu::FrameSlot>,
    garbage: gpu::GarbageRing,
    staging: gpu::UploadBuffer,
    immediate: gpu::ImmediateCommands,
    active_slot: usize,
    recording: bool,
}

impl Renderer {
    pub fn new(window: &winit::window::Window, config: RendererConfig) -> RenderResult<Renderer> {
        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();
        let window_size = window.inner_size();

        let mut required_extensions: Vec<*const i8> =
            ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        if config.validation {
            required_extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }
        let instance = gpu::Instance::new(&config.app_name, required_extensions, config.validation)?;
        let debug_messenger = if config.validation {
            Some(gpu::DebugMessenger::new(instance.clone())?)
        } else {
            None
        };

        let surface_loader =
            ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);
        let surface = gpu::Surface::new(&instance, surface_loader, display_handle, window_handle)?;

        let device_extensions = vec!["VK_KHR_swapchain".to_string()];
        let physical_device = gpu::PhysicalDevice::pick(
            instance.clone(),
            &surface.loader,
            surface.handle,
            &device_extensions,
        )?;
        let device = gpu::Device::new(physical_device.clone(), &device_extensions, instance.clone())?;

        let allocator = Arc::new(Mutex::new(gpu_allocator::vulkan::Allocator::new(
            &gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.instance.clone(),
                device: device.handle.clone(),
                physical_device: physical_device.handle,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            },
        )?));

        let descriptors = gpu::DescriptorAllocator::new(
            device.clone(),
            DESCRIPTOR_POOL_SETS,
            &[gpu::PoolSizeRatio {
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                ratio: 1.0,
            }],
        )?;

        let support = physical_device.get_swapchain_support(&surface.loader, surface.handle)?;
        let surface_format = support.choose_format(&PREFERRED_SURFACE_FORMATS);
        let render_pass = gpu::RenderPass::new(device.clone(), surface_format.format, DEPTH_FORMAT)?;

        let requested_extent = vk::Extent2D {
            width: window_size.width,
            height: window_size.height,
        };
        let extent = gpu::clamp_extent(requested_extent, &support.capabilities);
        let depth_image =
            gpu::AllocatedImage::new_depth(extent, DEPTH_FORMAT, device.clone(), allocator.clone())?;

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&instance.instance, &device.handle);
        let swapchain = gpu::Swapchain::new(
            swapchain_loader,
            physical_device.clone(),
            device.clone(),
            surface.clone(),
            gpu::SwapchainPreferred {
                preferred_format: &PREFERRED_SURFACE_FORMATS,
                preferred_present_modes: &config.preferred_present_modes,
            },
            requested_extent,
            render_pass.get_handle(),
            depth_image.get_view(),
        )?;

        let mut slots = Vec::with_capacity(gpu::NUM_IN_FLIGHT_FRAMES);
        for _ in 0..gpu::NUM_IN_FLIGHT_FRAMES {
            slots.push(gpu::FrameSlot::new(
                device.clone(),
                allocator.clone(),
                &descriptors,
            )?);
        }

        let staging = gpu::UploadBuffer::new(device.clone(), allocator.clone())?;
        let immediate = gpu::ImmediateCommands::new(device.clone())?;

        log::info!(
            "renderer up: {} frame slots, {} swapchain images",
            gpu::NUM_IN_FLIGHT_FRAMES,
            swapchain.image_count()
        );

        Ok(Renderer {
            _instance: instance,
            _debug_messenger: debug_messenger,
            surface,
            physical_device,
            device,
            allocator,
            descriptors,
            render_pass,
            depth_image,
            swapchain,
            slots,
            garbage: gpu::GarbageRing::new(gpu::NUM_IN_FLIGHT_FRAMES),
            staging,
            immediate,
            active_slot: 0,
            recording: false,
        })
    }

    pub fn device(&self) -> &Arc<gpu::Device> {
        &self.device
    }

    pub fn allocator(&self) -> &Arc<Mutex<gpu_allocator::vulkan::Allocator>> {
        &self.allocator
    }

    pub fn active_slot(&self) -> usize {
        self.active_slot
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.get_handle()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn uniform_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptors.uniform_layout()
    }

    /// Readies the active slot for recording and returns its command
    /// buffer with the render pass already begun. A recoverable error
    /// here means no frame started; call `resize_swapchain` and try
    /// again next iteration.
    pub fn begin_frame(&mut self) -> RenderResult<vk::CommandBuffer> {
        debug_assert!(!self.recording, "begin_frame while a frame is recording");

        if self.swapchain.state() == gpu::SwapchainState::NeedsRecovery {
            return Err(RenderError::SwapchainOutOfDate);
        }

        // Cursor rewind is host-only bookkeeping; nothing touches the
        // heap's contents until after the fence wait below proves the GPU
        // is done with this slot.
        self.slots[self.active_slot].heap.reset();

        // Acquire before touching the fence or command state so a resize
        // error leaves the slot untouched and retryable.
        self.swapchain
            .acquire_next_image(&self.slots[self.active_slot].sync)?;

        let slot = &mut self.slots[self.active_slot];
        slot.sync.wait()?;
        slot.sync.reset()?;

        // The fence was just observed signaled, so anything this slot
        // retired a full rotation ago is safe to destroy.
        self.garbage.collect(
            self.active_slot,
            &self.device,
            &self.allocator,
            &self.descriptors,
        );

        let slot = &self.slots[self.active_slot];
        slot.pool.reset()?;
        slot.command_buffer.begin(&self.device)?;
        slot.command_buffer.begin_render_pass(
            &self.device,
            self.render_pass.get_handle(),
            self.swapchain.current_framebuffer(),
            self.swapchain.extent,
            &self.swapchain.clear_values,
        );

        self.recording = true;
        Ok(slot.command_buffer.get_handle())
    }

    /// Submits the recorded frame and queues it for presentation. The
    /// active slot advances even when presentation reports a resize,
    /// because the submission already happened and the slot's fence now
    /// tracks it.
    pub fn end_frame(&mut self) -> RenderResult<()> {
        debug_assert!(self.recording, "end_frame without begin_frame");
        self.recording = false;

        let slot = &self.slots[self.active_slot];
        slot.command_buffer.end_render_pass(&self.device);
        slot.command_buffer.end(&self.device)?;

        let wait_semaphores = [slot.sync.image_available().get_handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.sync.render_done().get_handle()];
        let command_buffers = [slot.command_buffer.get_handle()];
        let submit_info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: command_buffers.as_ptr(),
            signal_semaphore_count: 1,
            p_signal_semaphores: signal_semaphores.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device.handle.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                slot.sync.fence().get_handle(),
            )?
        };

        let present_result = self.swapchain.present(&self.slots[self.active_slot].sync);
        self.active_slot = gpu::next_slot(self.active_slot, gpu::NUM_IN_FLIGHT_FRAMES);
        present_result
    }

    /// Rebuilds the swapchain and depth attachment at the window's new
    /// size and replaces every slot's semaphore pair, discarding any
    /// acquire signal the dead swapchain left pending.
    pub fn resize_swapchain(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.device.wait_idle()?;

        // Idle device: every fence condition is trivially met.
        self.garbage
            .collect_all(&self.device, &self.allocator, &self.descriptors);

        let support = self
            .physical_device
            .get_swapchain_support(&self.surface.loader, self.surface.handle)?;
        let requested_extent = vk::Extent2D { width, height };
        let extent = gpu::clamp_extent(requested_extent, &support.capabilities);
        self.depth_image = gpu::AllocatedImage::new_depth(
            extent,
            DEPTH_FORMAT,
            self.device.clone(),
            self.allocator.clone(),
        )?;
        self.swapchain.recreate(
            requested_extent,
            self.render_pass.get_handle(),
            self.depth_image.get_view(),
        )?;

        for slot in self.slots.iter_mut() {
            slot.sync.resync()?;
        }

        log::info!("swapchain recovered at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Grows the active heap if `size` does not fit, retiring the old
    /// store to the active slot's garbage bin. Fails with resource
    /// exhaustion when the bin is already full.
    pub fn frame_reserve(&mut self, size: vk::DeviceSize) -> RenderResult<()> {
        let slot = &mut self.slots[self.active_slot];
        if slot.heap.has_space(size) {
            return Ok(());
        }
        if self.garbage.len(self.active_slot) >= gpu::MAX_GARBAGE_ITEMS {
            return Err(RenderError::NoSpace("garbage ring"));
        }
        if let Some(retired) = slot.heap.reserve(size, &self.descriptors)? {
            self.garbage.add(self.active_slot, retired)?;
        }
        Ok(())
    }

    /// Bump-allocates `size` bytes of per-frame memory out of the active
    /// heap, growing it first when needed. The returned window is valid
    /// until this slot's next `begin_frame`.
    pub fn frame_allocate(&mut self, size: vk::DeviceSize) -> RenderResult<gpu::FrameAllocation> {
        self.frame_reserve(size)?;
        Ok(self.slots[self.active_slot].heap.allocate(size))
    }

    /// Uniform descriptor set of the active heap, for dynamic-offset
    /// binding of allocations made this frame.
    pub fn frame_uniform_set(&self) -> vk::DescriptorSet {
        self.slots[self.active_slot].heap.uniform_set()
    }

    pub fn frame_heap_buffer(&self) -> vk::Buffer {
        self.slots[self.active_slot].heap.buffer()
    }

    /// Copies `data` into `dst` through the staging buffer, blocking
    /// until the transfer completes.
    pub fn upload(&mut self, data: &[u8], dst: &gpu::DeviceBuffer) -> RenderResult<()> {
        if (data.len() as vk::DeviceSize) > dst.size() {
            return Err(RenderError::NoSpace("upload destination"));
        }

        let staging = self.staging.acquire(data.len() as vk::DeviceSize)?;
        if !staging.write(0, data) {
            self.staging.release();
            return Err(RenderError::NoSpace("upload staging"));
        }
        let src_handle = staging.get_handle();

        let result = (|| {
            let cmd = self.immediate.begin()?;
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: data.len() as vk::DeviceSize,
            };
            unsafe {
                self.device
                    .handle
                    .cmd_copy_buffer(cmd, src_handle, dst.get_handle(), &[region]);
            }
            self.immediate.submit()
        })();
        self.staging.release();
        result
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Nothing here can outlive the device; flush everything pending
        // before the field-order teardown runs.
        if self.device.wait_idle().is_ok() {
            self.garbage
                .collect_all(&self.device, &self.allocator, &self.descriptors);
        }
    }
}
