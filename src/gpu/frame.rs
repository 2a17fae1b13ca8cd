use crate::error::RenderResult;
use crate::gpu;
use ash::vk;
use std::sync::{Arc, Mutex};

/// Default size of each slot's frame heap. Heaps grow on demand, so this
/// only sets the floor.
pub const DEFAULT_FRAME_HEAP_SIZE: vk::DeviceSize = 1 << 16;

/// Advances the in-flight slot ring.
pub fn next_slot(current: usize, num_slots: usize) -> usize {
    (current + 1) % num_slots
}

/// Everything one in-flight frame owns: its synchronization primitives,
/// its command pool and buffer, and its transient allocation heap. Slots
/// are recycled round-robin; a slot is only reused after its fence proves
/// the GPU finished the frame that last used it.
pub struct FrameSlot {
    pub sync: gpu::FrameSync,
    pub pool: gpu::CommandPool,
    pub command_buffer: gpu::CommandBuffer,
    pub heap: gpu::FrameHeap,
}

impl FrameSlot {
    pub fn new(
        device: Arc<gpu::Device>,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
        descriptors: &gpu::DescriptorAllocator,
    ) -> RenderResult<Self> {
        let sync = gpu::FrameSync::new(device.clone())?;
        let pool = gpu::CommandPool::new(
            vk::CommandPoolCreateFlags::TRANSIENT,
            device.graphics_family,
            device.clone(),
        )?;
        let command_buffer =
            gpu::CommandBuffer::new(&pool, vk::CommandBufferLevel::PRIMARY, &device)?;
        let heap = gpu::FrameHeap::new(DEFAULT_FRAME_HEAP_SIZE, device, allocator, descriptors)?;
        Ok(FrameSlot {
            sync,
            pool,
            command_buffer,
            heap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_ring_wraps_in_order() {
        let mut slot = 0;
        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.push(slot);
            slot = next_slot(slot, gpu::NUM_IN_FLIGHT_FRAMES);
        }
        for (i, &s) in seen.iter().enumerate() {
            assert_eq!(s, i % gpu::NUM_IN_FLIGHT_FRAMES);
        }
    }

    #[test]
    fn slot_ring_never_leaves_range() {
        let mut slot = 2;
        for _ in 0..50 {
            slot = next_slot(slot, gpu::NUM_IN_FLIGHT_FRAMES);
            assert!(slot < gpu::NUM_IN_FLIGHT_FRAMES);
        }
    }
}
