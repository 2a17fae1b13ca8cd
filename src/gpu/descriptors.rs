use crate::error::RenderResult;
use crate::gpu;
use ash::vk;
use std::sync::Arc;

pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

#[derive(Default, Copy, Clone)]
pub struct PoolSizeRatio {
    pub descriptor_type: vk::DescriptorType,
    pub ratio: f32,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> DescriptorLayoutBuilder {
        DescriptorLayoutBuilder {
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(&mut self, binding: u32, descriptor_type: vk::DescriptorType) -> &mut Self {
        let new_bind = vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_count: 1,
            descriptor_type,
            stage_flags: vk::ShaderStageFlags::empty(),
            ..Default::default()
        };
        self.bindings.push(new_bind);
        self
    }

    pub fn build(
        &mut self,
        device: &gpu::Device,
        shader_stages: vk::ShaderStageFlags,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        for binding in self.bindings.iter_mut() {
            binding.stage_flags |= shader_stages;
        }

        let descriptor_set_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            p_bindings: self.bindings.as_ptr(),
            binding_count: self.bindings.len() as u32,
            flags: vk::DescriptorSetLayoutCreateFlags::empty(),
            ..Default::default()
        };
        let layout = unsafe {
            device
                .handle
                .create_descriptor_set_layout(&descriptor_set_ci, None)?
        };
        Ok(layout)
    }
}

/// Owns the descriptor pool the frame heaps and the model loader allocate
/// sets from. Created with the free-descriptor-set flag so retired sets
/// can be returned individually by the garbage collector.
pub struct DescriptorAllocator {
    pool: vk::DescriptorPool,
    uniform_layout: vk::DescriptorSetLayout,

    device: Arc<gpu::Device>,
}

impl DescriptorAllocator {
    pub fn new(
        device: Arc<gpu::Device>,
        max_sets: u32,
        pool_ratio: &[PoolSizeRatio],
    ) -> RenderResult<Self> {
        let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::with_capacity(pool_ratio.len());
        for ratio in pool_ratio.iter() {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: ratio.descriptor_type,
                descriptor_count: (ratio.ratio * max_sets as f32) as u32,
            });
        }

        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.handle.create_descriptor_pool(&pool_ci, None)? };

        let uniform_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .build(&device, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;

        Ok(Self {
            pool,
            uniform_layout,
            device,
        })
    }

    pub fn uniform_layout(&self) -> vk::DescriptorSetLayout {
        self.uniform_layout
    }

    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        let allocation_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: 1,
            p_set_layouts: &layout,
            ..Default::default()
        };
        let mut sets = unsafe { self.device.handle.allocate_descriptor_sets(&allocation_info)? };
        Ok(sets.remove(0))
    }

    /// Allocates a dynamic-uniform set bound to `buffer` over `range`
    /// bytes from offset zero.
    pub fn allocate_uniform_set(
        &self,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> RenderResult<vk::DescriptorSet> {
        let set = self.allocate(self.uniform_layout)?;

        let buffer_info = vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            dst_array_element: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            p_buffer_info: &buffer_info,
            ..Default::default()
        };
        unsafe { self.device.handle.update_descriptor_sets(&[write], &[]) };

        Ok(set)
    }

    /// Returns retired sets to the pool. Called by garbage collection once
    /// the owning slot's fence has proven them unreferenced.
    pub fn free(&self, sets: &[vk::DescriptorSet]) {
        if sets.is_empty() {
            return;
        }
        let _ = unsafe { self.device.handle.free_descriptor_sets(self.pool, sets) };
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle
                .destroy_descriptor_set_layout(self.uniform_layout, None);
            self.device.handle.destroy_descriptor_pool(self.pool, None);
        }
    }
}
