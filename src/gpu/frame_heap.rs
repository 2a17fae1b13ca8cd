use crate::error::{RenderError, RenderResult};
use crate::gpu;
use ash::vk;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

pub fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Bump bookkeeping for one frame heap: an offset cursor that only ever
/// advances, reset wholesale once per frame. The cursor is plain host
/// state; the buffer it indexes lives in [`FrameHeap`].
#[derive(Clone, Copy, Debug)]
pub struct HeapCursor {
    offset: vk::DeviceSize,
    capacity: vk::DeviceSize,
    alignment: vk::DeviceSize,
}

impl HeapCursor {
    pub fn new(capacity: vk::DeviceSize, alignment: vk::DeviceSize) -> Self {
        HeapCursor {
            offset: 0,
            capacity,
            alignment,
        }
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }

    pub fn alignment(&self) -> vk::DeviceSize {
        self.alignment
    }

    pub fn has_space(&self, size: vk::DeviceSize) -> bool {
        self.offset + size <= self.capacity
    }

    /// Advances the cursor by `size` rounded up to the heap alignment and
    /// returns the offset the allocation starts at. Callers must have
    /// guaranteed space via `has_space`/`reserve` first; violating that is
    /// a programming error.
    pub fn bump(&mut self, size: vk::DeviceSize) -> vk::DeviceSize {
        assert!(
            self.has_space(size),
            "frame heap allocation without a prior reserve"
        );
        let offset = self.offset;
        self.offset += align_up(size, self.alignment);
        offset
    }

    /// Capacity a replacement heap needs so that everything allocated this
    /// frame plus `size` fits with room to spare.
    pub fn grown_capacity(&self, size: vk::DeviceSize) -> vk::DeviceSize {
        align_up(self.offset + size, self.alignment) * 2
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

/// One sub-allocation out of a frame heap: where to write and how to bind.
pub struct FrameAllocation {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub uniform_set: vk::DescriptorSet,
    ptr: NonNull<u8>,
    size: usize,
}

impl FrameAllocation {
    /// The mapped bytes of this allocation. Valid until the owning slot's
    /// heap is reset at the start of that slot's next frame.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// Copies one plain-old-data value into the allocation.
    pub fn write<T: Copy>(&mut self, value: &T) {
        let size = std::mem::size_of::<T>();
        debug_assert!(size <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(value as *const T as *const u8, self.ptr.as_ptr(), size);
        }
    }
}

/// Linear sub-allocator over a persistently mapped host-visible buffer,
/// one per in-flight frame slot. Transient uniform and vertex data for a
/// frame is bump-allocated here and freed collectively by `reset`.
pub struct FrameHeap {
    cursor: HeapCursor,
    buffer: vk::Buffer,
    allocation: Option<gpu_allocator::vulkan::Allocation>,
    data: NonNull<u8>,
    uniform_set: vk::DescriptorSet,

    device: Arc<gpu::Device>,
    allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
}

impl FrameHeap {
    pub fn new(
        size: vk::DeviceSize,
        device: Arc<gpu::Device>,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
        descriptors: &gpu::DescriptorAllocator,
    ) -> RenderResult<Self> {
        let alignment = device.physical().uniform_buffer_alignment().max(1);
        let size = align_up(size, alignment);

        let buffer_ci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { device.handle.create_buffer(&buffer_ci, None)? };
        let requirements = unsafe { device.handle.get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator_lock = allocator.lock().unwrap();
            let allocation = match allocator_lock.allocate(
                &gpu_allocator::vulkan::AllocationCreateDesc {
                    name: "frame heap",
                    requirements,
                    location: gpu_allocator::MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
                },
            ) {
                Ok(allocation) => allocation,
                Err(gpu_allocator::AllocationError::OutOfMemory) => {
                    unsafe { device.handle.destroy_buffer(buffer, None) };
                    return Err(RenderError::NoFrameMemory);
                }
                Err(e) => {
                    unsafe { device.handle.destroy_buffer(buffer, None) };
                    return Err(e.into());
                }
            };
            unsafe {
                device
                    .handle
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?
            };
            allocation
        };

        let data = allocation
            .mapped_ptr()
            .map(|p| p.cast::<u8>())
            .ok_or(RenderError::NoFrameMemory)?;

        let uniform_set = descriptors.allocate_uniform_set(buffer, size)?;

        log::debug!("created frame heap of {} bytes", size);

        Ok(FrameHeap {
            cursor: HeapCursor::new(size, alignment),
            buffer,
            allocation: Some(allocation),
            data,
            uniform_set,
            device,
            allocator,
        })
    }

    pub fn cursor(&self) -> &HeapCursor {
        &self.cursor
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn uniform_set(&self) -> vk::DescriptorSet {
        self.uniform_set
    }

    pub fn has_space(&self, size: vk::DeviceSize) -> bool {
        self.cursor.has_space(size)
    }

    /// Replaces this heap with a grown one when `size` does not fit,
    /// returning the retired backing store. The cursor carries over
    /// unchanged, so allocations already made this frame stay valid in the
    /// old store until the garbage collector reclaims it; new allocations
    /// land in the fresh store.
    ///
    /// Returns `None` when the current store already has room.
    pub fn reserve(
        &mut self,
        size: vk::DeviceSize,
        descriptors: &gpu::DescriptorAllocator,
    ) -> RenderResult<Option<gpu::GarbageItem>> {
        if self.cursor.has_space(size) {
            return Ok(None);
        }

        let new_size = self.cursor.grown_capacity(size);
        let mut replacement = FrameHeap::new(
            new_size,
            self.device.clone(),
            self.allocator.clone(),
            descriptors,
        )?;
        // Growth keeps the cursor so offsets handed out earlier this frame
        // are never reissued.
        replacement.cursor.offset = self.cursor.offset;

        let retired = std::mem::replace(self, replacement);
        log::debug!(
            "frame heap grew to {} bytes, retiring old store",
            new_size
        );
        Ok(Some(retired.into_garbage()))
    }

    /// Bumps the cursor and returns the mapped window. `reserve` must have
    /// guaranteed space; this panics otherwise.
    pub fn allocate(&mut self, size: vk::DeviceSize) -> FrameAllocation {
        let offset = self.cursor.bump(size);
        let ptr = unsafe { NonNull::new_unchecked(self.data.as_ptr().add(offset as usize)) };
        FrameAllocation {
            buffer: self.buffer,
            offset,
            uniform_set: self.uniform_set,
            ptr,
            size: size as usize,
        }
    }

    /// Individual release is a no-op under the bump model; the heap is
    /// freed collectively by `reset`. Exposed for symmetry with manual
    /// allocators.
    pub fn free(&mut self, _allocation: FrameAllocation) {}

    /// Rewinds the cursor. Only called for the slot about to be reused,
    /// once its prior GPU work is known complete.
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    /// Disassembles the heap into a deferred-destruction record without
    /// touching the device. Consumes the heap; the garbage collector owns
    /// the handles from here.
    pub fn into_garbage(mut self) -> gpu::GarbageItem {
        gpu::GarbageItem {
            buffer: self.buffer,
            allocation: self.allocation.take(),
            descriptor_sets: vec![self.uniform_set],
        }
    }
}

impl Drop for FrameHeap {
    fn drop(&mut self) {
        // Retired heaps are consumed by into_garbage and skip this path.
        if let Some(allocation) = self.allocation.take() {
            unsafe {
                self.device.handle.destroy_buffer(self.buffer, None);
            }
            let mut allocator = self.allocator.lock().unwrap();
            let _ = allocator.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_alignment() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 64), 320);
    }

    #[test]
    fn offsets_are_monotonic_and_within_capacity() {
        let mut cursor = HeapCursor::new(4096, 256);
        let mut last = 0;
        for size in [16, 300, 256, 1, 128] {
            assert!(cursor.has_space(size));
            let offset = cursor.bump(size);
            assert!(offset >= last);
            assert!(offset + size <= cursor.capacity());
            last = offset;
        }
    }

    #[test]
    fn bump_returns_aligned_offsets() {
        let mut cursor = HeapCursor::new(4096, 256);
        cursor.bump(10);
        assert_eq!(cursor.bump(10), 256);
        assert_eq!(cursor.bump(10), 512);
    }

    #[test]
    fn growth_reaches_twice_the_aligned_requirement() {
        // Request 2048 out of a 1024-byte heap: one growth must land at or
        // above 4096 and the follow-up allocation at offset 0.
        let mut cursor = HeapCursor::new(1024, 256);
        assert!(!cursor.has_space(2048));
        let new_capacity = cursor.grown_capacity(2048);
        assert!(new_capacity >= 4096);

        let mut grown = HeapCursor::new(new_capacity, 256);
        grown.offset = cursor.offset;
        assert_eq!(grown.bump(2048), 0);
    }

    #[test]
    fn growth_preserves_cursor_position() {
        let mut cursor = HeapCursor::new(1024, 256);
        cursor.bump(512);
        assert!(!cursor.has_space(1024));

        let mut grown = HeapCursor::new(cursor.grown_capacity(1024), 256);
        grown.offset = cursor.offset;
        // Allocations after growth continue past what this frame already
        // handed out.
        let offset = grown.bump(1024);
        assert_eq!(offset, 512);
        assert!(offset + 1024 <= grown.capacity());
    }

    #[test]
    #[should_panic(expected = "without a prior reserve")]
    fn bump_without_space_is_a_contract_violation() {
        let mut cursor = HeapCursor::new(1024, 256);
        cursor.bump(2048);
    }

    #[test]
    fn reset_rewinds_to_zero() {
        let mut cursor = HeapCursor::new(1024, 256);
        cursor.bump(512);
        cursor.reset();
        assert_eq!(cursor.offset(), 0);
        assert_eq!(cursor.bump(16), 0);
    }
}
