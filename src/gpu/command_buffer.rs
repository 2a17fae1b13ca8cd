use crate::error::{RenderError, RenderResult};
use crate::gpu;
use ash::vk;

pub struct CommandBuffer {
    handle: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn new(
        command_pool: &gpu::CommandPool,
        level: vk::CommandBufferLevel,
        device: &gpu::Device,
    ) -> RenderResult<Self> {
        let command_buffer_ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: command_pool.get_handle(),
            level,
            command_buffer_count: 1,
            ..Default::default()
        };
        let handle = unsafe {
            device
                .handle
                .allocate_command_buffers(&command_buffer_ai)?
                .pop()
                .ok_or(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN))?
        };
        Ok(CommandBuffer { handle })
    }

    pub fn get_handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Begins one-time-submit recording. The pool must have been reset
    /// since the last submission of this buffer.
    pub fn begin(&self, device: &gpu::Device) -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { device.handle.begin_command_buffer(self.handle, &begin_info)? };
        Ok(())
    }

    pub fn end(&self, device: &gpu::Device) -> RenderResult<()> {
        unsafe { device.handle.end_command_buffer(self.handle)? };
        Ok(())
    }

    pub fn begin_render_pass(
        &self,
        device: &gpu::Device,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let render_pass_info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
            ..Default::default()
        };
        unsafe {
            device.handle.cmd_begin_render_pass(
                self.handle,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self, device: &gpu::Device) {
        unsafe { device.handle.cmd_end_render_pass(self.handle) };
    }
}
