//! Physical frame allocator
//!
//! A pool of free frame numbers. Allocation takes and returns a frame in
//! one step under the pool lock, so a frame can never reach two allocators
//! without a release in between. The allocator never blocks; an empty pool
//! is reported to the caller, who must evict instead.

use std::collections::VecDeque;

use spin::Mutex as SpinMutex;

/// Pool of free physical frames
pub struct FrameAllocator {
    free: SpinMutex<VecDeque<usize>>,
    total: usize,
}

impl FrameAllocator {
    /// Create a pool holding frames `0..num_frames`.
    pub fn new(num_frames: usize) -> Self {
        Self {
            free: SpinMutex::new((0..num_frames).collect()),
            total: num_frames,
        }
    }

    /// Take a free frame, or `None` if the pool is empty.
    pub fn allocate(&self) -> Option<usize> {
        self.free.lock().pop_front()
    }

    /// Return `frame` to the pool.
    pub fn release(&self, frame: usize) {
        assert!(frame < self.total, "frame {frame} is not managed by this pool");
        let mut free = self.free.lock();
        debug_assert!(!free.contains(&frame), "frame {frame} released twice");
        free.push_back(frame);
    }

    /// Number of free frames
    pub fn size(&self) -> usize {
        self.free.lock().len()
    }

    /// Number of frames managed by the pool
    pub fn total(&self) -> usize {
        self.total
    }
}
