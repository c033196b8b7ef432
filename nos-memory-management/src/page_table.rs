//! Per-process page table entries

bitflags::bitflags! {
    /// State bits of a page table entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PteFlags: u8 {
        /// Resident and mapped to `ppn`
        const VALID = 0b0000_0001;
        /// Modified since it was loaded
        const DIRTY = 0b0000_0010;
        /// Referenced since the last clock sweep passed it
        const USED = 0b0000_0100;
        /// Backed by a read-only image section
        const READ_ONLY = 0b0000_1000;
        /// Being loaded into or evicted from a frame
        const IN_TRANSIT = 0b0001_0000;
    }
}

/// One virtual page of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Virtual page number
    pub vpn: usize,
    /// Frame holding the page while it is valid
    pub ppn: Option<usize>,
    /// Swap slot holding the page while it is evicted
    pub swap_slot: Option<u32>,
    /// State bits
    pub flags: PteFlags,
}

impl PageTableEntry {
    /// An unresolved entry for `vpn`
    pub const fn new(vpn: usize) -> Self {
        Self {
            vpn,
            ppn: None,
            swap_slot: None,
            flags: PteFlags::empty(),
        }
    }

    /// Returns true if the page is resident.
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }

    /// Returns true if the page was modified since it was loaded.
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(PteFlags::DIRTY)
    }

    /// Returns true if the page was referenced since the last sweep.
    pub fn is_used(&self) -> bool {
        self.flags.contains(PteFlags::USED)
    }

    /// Returns true if the page may not be written.
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(PteFlags::READ_ONLY)
    }

    /// Returns true if the page is moving between a frame and its backing
    /// store.
    pub fn is_in_transit(&self) -> bool {
        self.flags.contains(PteFlags::IN_TRANSIT)
    }
}
