//! The paging kernel context
//!
//! `VmKernel` owns everything shared between processes: physical memory,
//! the free frame pool, the swap area and the inverted page table, plus the
//! two condition variables that page faults block on. Tests build as many
//! independent kernels as they like.
//!
//! Lock order is table lock, then pin lock. The frame pool and swap slot
//! pool are leaf spinlocks.

use std::sync::Arc;

use nos_api::{Pid, Result, nos_debug, nos_info};
use nos_sync::{Alarm, Condition, Lock};

use crate::MemoryInfo;
use crate::address_space::AddressSpace;
use crate::config::VmConfig;
use crate::frame_allocator::FrameAllocator;
use crate::image::ProgramImage;
use crate::ipt::InvertedPageTable;
use crate::page_table::PteFlags;
use crate::physical::{PAGE_SIZE, PhysicalMemory};
use crate::stats::{VmStats, VmStatsSnapshot};
use crate::swap::SwapSpace;

/// Shared demand-paging state
pub struct VmKernel {
    pub(crate) config: VmConfig,
    pub(crate) memory: PhysicalMemory,
    pub(crate) frames: FrameAllocator,
    pub(crate) swap: SwapSpace,
    pub(crate) ipt: InvertedPageTable,
    /// Guards sleeping on `pin_wait`; taken after the table lock.
    pub(crate) pin_lock: Lock<()>,
    /// Signalled whenever a frame is unpinned or returned to the pool.
    pub(crate) pin_wait: Condition,
    /// Attached to the table lock; signalled when a page finishes moving.
    pub(crate) transit: Condition,
    pub(crate) stats: VmStats,
}

impl VmKernel {
    /// Start the pager: allocate physical memory and create the swap file.
    ///
    /// `alarm` backs the timed waits of the kernel's condition variables.
    pub fn new(config: VmConfig, alarm: Arc<Alarm>) -> Result<Self> {
        config.validate()?;
        let swap = SwapSpace::create(&config.swap_file)?;
        let ipt = InvertedPageTable::new(config.num_frames);
        let pin_lock = Lock::new(());
        let pin_wait = Condition::new(&pin_lock, Arc::clone(&alarm));
        let transit = Condition::with_raw(Arc::clone(ipt.raw_lock()), alarm);

        nos_info!(
            "vm: {} frames of {} bytes, swap at {}",
            config.num_frames,
            PAGE_SIZE,
            config.swap_file.display()
        );
        Ok(Self {
            memory: PhysicalMemory::new(config.num_frames),
            frames: FrameAllocator::new(config.num_frames),
            swap,
            ipt,
            pin_lock,
            pin_wait,
            transit,
            stats: VmStats::default(),
            config,
        })
    }

    /// The configuration the kernel was started with
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Physical memory, for inspection
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// The inverted page table
    pub fn ipt(&self) -> &InvertedPageTable {
        &self.ipt
    }

    /// Number of frames in the free pool
    pub fn free_frames(&self) -> usize {
        self.frames.size()
    }

    /// Create an address space for `image` with the configured stack size.
    pub fn new_address_space(
        &self,
        pid: Pid,
        image: Arc<dyn ProgramImage>,
    ) -> Result<Arc<AddressSpace>> {
        let space = AddressSpace::new(pid, image, self.config.stack_pages)?;
        nos_debug!("vm: {} sized at {} pages", pid, space.num_pages());
        Ok(space)
    }

    /// Release every frame and swap slot held by `space`.
    ///
    /// Waits for pages of `space` that are still moving. The caller must
    /// not have transfers of `space` in flight.
    pub fn unload(&self, space: &Arc<AddressSpace>) {
        let mut table = self.ipt.lock();
        while space.any_in_transit() {
            self.transit.sleep();
        }

        let frames = table.unbind_space(space);
        let mut slots = Vec::new();
        for vpn in 0..space.num_pages() {
            space.update(vpn, |e| {
                if let Some(slot) = e.swap_slot.take() {
                    slots.push(slot);
                }
                e.ppn = None;
                e.flags = PteFlags::empty();
            });
        }
        for &frame in &frames {
            debug_assert_eq!(self.ipt.pin_count(frame), 0, "unloading a pinned frame");
            self.frames.release(frame);
        }
        drop(table);

        for &slot in &slots {
            self.swap.free_slot(slot);
        }
        self.signal_unpinned();
        nos_debug!(
            "vm: unloaded {}, freed {} frames and {} swap slots",
            space.pid(),
            frames.len(),
            slots.len()
        );
    }

    /// Frame and swap usage
    pub fn memory_info(&self) -> MemoryInfo {
        let resident_frames = self.ipt.lock().resident_count();
        MemoryInfo {
            page_size: PAGE_SIZE,
            total_frames: self.frames.total(),
            free_frames: self.frames.size(),
            resident_frames,
            swap_slots_in_use: self.swap.slots_in_use(),
            swap_extent: self.swap.extent(),
        }
    }

    /// Paging counters
    pub fn stats(&self) -> VmStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the pager and remove the swap file.
    pub fn shutdown(self) -> Result<()> {
        let stats = self.stats.snapshot();
        nos_info!(
            "vm: shutting down after {} faults, {} evictions, {} swap writes",
            stats.faults,
            stats.evictions,
            stats.swap_writes
        );
        self.swap.close()
    }

    /// Wake evictors waiting for a frame to become available.
    pub(crate) fn signal_unpinned(&self) {
        let _pin = self.pin_lock.acquire();
        self.pin_wait.wake_all();
    }
}
