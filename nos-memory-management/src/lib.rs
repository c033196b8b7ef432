//! NOS Memory Management
//!
//! Demand paging for user address spaces: a pool of physical frames, an
//! inverted page table swept by a second-chance clock, a swap file for
//! evicted dirty pages, and the page-fault path that ties them together.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use nos_api::Pid;
//! use nos_memory_management::{MemoryImage, VmConfig, VmKernel};
//! use nos_sync::{Alarm, Timer, DEFAULT_TICKS_PER_INTERRUPT};
//!
//! # fn main() -> nos_api::Result<()> {
//! let timer = Timer::new(DEFAULT_TICKS_PER_INTERRUPT);
//! let vm = VmKernel::new(VmConfig::default().with_num_frames(4), Alarm::new(&timer))?;
//!
//! let image = Arc::new(MemoryImage::new().with_section(".data", b"hi\0".to_vec(), false));
//! let space = vm.new_address_space(Pid::new(1), image)?;
//! assert_eq!(vm.read_string(&space, 0, 8)?.as_deref(), Some("hi"));
//!
//! vm.unload(&space);
//! vm.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address_space;
pub mod config;
pub mod fault;
pub mod frame_allocator;
pub mod image;
pub mod ipt;
pub mod kernel;
pub mod page_table;
pub mod physical;
pub mod stats;
pub mod swap;
pub mod transfer;
pub mod virtual_mem;

// Re-export commonly used types
pub use address_space::AddressSpace;
pub use config::VmConfig;
pub use fault::PinnedPage;
pub use frame_allocator::FrameAllocator;
#[cfg(any(test, feature = "mock"))]
pub use image::MockProgramImage;
pub use image::{MemoryImage, ProgramImage, Section};
pub use ipt::InvertedPageTable;
pub use kernel::VmKernel;
pub use page_table::{PageTableEntry, PteFlags};
pub use physical::{PAGE_SHIFT, PAGE_SIZE, PhysicalMemory};
pub use stats::VmStatsSnapshot;
pub use swap::SwapSpace;
pub use virtual_mem::VirtAddr;

/// Memory management information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Page size
    pub page_size: usize,
    /// Physical frames managed by the pager
    pub total_frames: usize,
    /// Frames in the free pool
    pub free_frames: usize,
    /// Frames holding a resident page
    pub resident_frames: usize,
    /// Swap slots holding an evicted page
    pub swap_slots_in_use: usize,
    /// Pages the swap file has grown to
    pub swap_extent: usize,
}
