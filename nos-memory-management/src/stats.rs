//! Paging statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Live paging counters
#[derive(Debug, Default)]
pub struct VmStats {
    faults: AtomicU64,
    free_frame_hits: AtomicU64,
    evictions: AtomicU64,
    swap_writes: AtomicU64,
    swap_reads: AtomicU64,
    section_loads: AtomicU64,
    zero_fills: AtomicU64,
    clean_discards: AtomicU64,
}

/// Point-in-time copy of [`VmStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStatsSnapshot {
    /// Faults that had to bring a page in
    pub faults: u64,
    /// Faults served from the free frame pool
    pub free_frame_hits: u64,
    /// Frames taken from a resident page
    pub evictions: u64,
    /// Evicted pages written to swap
    pub swap_writes: u64,
    /// Pages read back from swap
    pub swap_reads: u64,
    /// Pages loaded from an image section
    pub section_loads: u64,
    /// Pages zero-filled
    pub zero_fills: u64,
    /// Evicted pages dropped without a write
    pub clean_discards: u64,
}

macro_rules! counters {
    ($($name:ident => $bump:ident),* $(,)?) => {
        impl VmStats {
            $(
                pub(crate) fn $bump(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Copy the current counter values.
            pub fn snapshot(&self) -> VmStatsSnapshot {
                VmStatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    faults => count_fault,
    free_frame_hits => count_free_frame_hit,
    evictions => count_eviction,
    swap_writes => count_swap_write,
    swap_reads => count_swap_read,
    section_loads => count_section_load,
    zero_fills => count_zero_fill,
    clean_discards => count_clean_discard,
}
