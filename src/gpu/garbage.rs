use crate::error::{RenderError, RenderResult};
use crate::gpu;
use ash::vk;
use std::sync::{Arc, Mutex};

/// A retired frame-heap backing store: handles only, no destructor. The
/// ring owns these until the fence of the slot that retired them proves
/// the GPU can no longer read the old store.
pub struct GarbageItem {
    pub buffer: vk::Buffer,
    pub allocation: Option<gpu_allocator::vulkan::Allocation>,
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

impl GarbageItem {
    fn destroy(
        mut self,
        device: &gpu::Device,
        allocator: &Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
        descriptors: &gpu::DescriptorAllocator,
    ) {
        descriptors.free(&self.descriptor_sets);
        unsafe {
            device.handle.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = allocator.lock().unwrap();
            let _ = allocator.free(allocation);
        }
    }
}

/// Ring of deferred-destruction lists, one per frame slot. Items retired
/// while slot S was recording are destroyed only when S's fence has been
/// observed signaled again, bounding their lifetime to one full slot
/// rotation.
pub struct GarbageRing<T = GarbageItem> {
    bins: Vec<Vec<T>>,
}

impl<T> GarbageRing<T> {
    pub fn new(num_slots: usize) -> Self {
        GarbageRing {
            bins: (0..num_slots).map(|_| Vec::new()).collect(),
        }
    }

    /// Appends to the deferred list owned by `slot`. Each bin holds at
    /// most [`gpu::MAX_GARBAGE_ITEMS`]; overflow surfaces as an
    /// exhaustion error rather than silently dropping the item.
    pub fn add(&mut self, slot: usize, item: T) -> RenderResult<()> {
        let bin = &mut self.bins[slot];
        if bin.len() >= gpu::MAX_GARBAGE_ITEMS {
            return Err(RenderError::NoSpace("garbage ring"));
        }
        bin.push(item);
        Ok(())
    }

    /// Removes the most recently added item, undoing an `add` when the
    /// operation that retired the resource failed midway.
    pub fn pop(&mut self, slot: usize) -> Option<T> {
        self.bins[slot].pop()
    }

    /// Takes every item deferred under `slot`. Callers destroy them; the
    /// items leave the list at this moment, so nothing can be destroyed
    /// twice.
    pub fn drain(&mut self, slot: usize) -> Vec<T> {
        std::mem::take(&mut self.bins[slot])
    }

    pub fn len(&self, slot: usize) -> usize {
        self.bins[slot].len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(|bin| bin.is_empty())
    }
}

impl GarbageRing<GarbageItem> {
    /// Physically destroys everything deferred under `slot`. Only call
    /// right after `slot`'s fence has been observed signaled: that fence
    /// is the proof no in-flight work still references the old stores.
    pub fn collect(
        &mut self,
        slot: usize,
        device: &gpu::Device,
        allocator: &Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
        descriptors: &gpu::DescriptorAllocator,
    ) {
        let items = self.drain(slot);
        if items.is_empty() {
            return;
        }
        log::debug!("collecting {} retired stores for slot {}", items.len(), slot);
        for item in items {
            item.destroy(device, allocator, descriptors);
        }
    }

    /// Teardown path: destroys every bin. The caller must have idled the
    /// device first.
    pub fn collect_all(
        &mut self,
        device: &gpu::Device,
        allocator: &Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
        descriptors: &gpu::DescriptorAllocator,
    ) {
        for slot in 0..self.bins.len() {
            self.collect(slot, device, allocator, descriptors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Host-side model of a frame fence: Pending work keeps garbage alive,
    // observing the signal permits collection.
    #[derive(Clone, Copy, PartialEq, Debug)]
    enum FenceState {
        Signaled,
        Pending,
    }

    #[test]
    fn items_survive_until_owning_slot_fence_signals_again() {
        let num_slots = 3;
        let mut ring: GarbageRing<u32> = GarbageRing::new(num_slots);
        let mut fences = [FenceState::Signaled; 3];
        let mut destroyed: Vec<u32> = Vec::new();

        // Frame on slot 0 retires item 7: its fence goes pending at submit.
        ring.add(0, 7).unwrap();
        fences[0] = FenceState::Pending;

        // Slots 1 and 2 run full frames; nothing owned by slot 0 may die.
        for slot in [1, 2] {
            assert_eq!(fences[slot], FenceState::Signaled);
            destroyed.extend(ring.drain(slot));
            fences[slot] = FenceState::Pending;
        }
        assert!(destroyed.is_empty());
        assert_eq!(ring.len(0), 1);

        // Slot 0 comes around: the wait observes signaled -> unsignaled ->
        // signaled on its fence, and only then is the item reclaimed.
        fences[0] = FenceState::Signaled;
        destroyed.extend(ring.drain(0));
        assert_eq!(destroyed, vec![7]);
        assert_eq!(ring.len(0), 0);
    }

    #[test]
    fn drain_empties_the_bin_exactly_once() {
        let mut ring: GarbageRing<u32> = GarbageRing::new(2);
        ring.add(1, 1).unwrap();
        ring.add(1, 2).unwrap();
        assert_eq!(ring.drain(1), vec![1, 2]);
        // A second drain finds nothing: no double destruction possible.
        assert!(ring.drain(1).is_empty());
        assert!(ring.is_empty());
    }

    #[test]
    fn pop_undoes_the_latest_add() {
        let mut ring: GarbageRing<u32> = GarbageRing::new(1);
        ring.add(0, 10).unwrap();
        ring.add(0, 11).unwrap();
        assert_eq!(ring.pop(0), Some(11));
        assert_eq!(ring.drain(0), vec![10]);
    }

    #[test]
    fn bin_overflow_reports_exhaustion() {
        let mut ring: GarbageRing<u32> = GarbageRing::new(1);
        for i in 0..gpu::MAX_GARBAGE_ITEMS as u32 {
            ring.add(0, i).unwrap();
        }
        assert!(matches!(
            ring.add(0, 99),
            Err(RenderError::NoSpace("garbage ring"))
        ));
        // The failed add left the bin untouched.
        assert_eq!(ring.len(0), gpu::MAX_GARBAGE_ITEMS);
    }

    #[test]
    fn slots_keep_independent_bins() {
        let mut ring: GarbageRing<u32> = GarbageRing::new(3);
        ring.add(0, 1).unwrap();
        ring.add(2, 3).unwrap();
        assert_eq!(ring.len(0), 1);
        assert_eq!(ring.len(1), 0);
        assert_eq!(ring.len(2), 1);
        assert_eq!(ring.drain(0), vec![1]);
        assert_eq!(ring.len(2), 1);
    }
}
