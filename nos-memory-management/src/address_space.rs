//! Process address spaces
//!
//! An address space is the page table of one process plus the program
//! image backing it. The layout is fixed when the space is created:
//!
//! ```text
//!  vpn 0                                                      num_pages
//!  +---------------------------+-------------------+----------+
//!  | image sections (in order) |   stack pages     | argument |
//!  +---------------------------+-------------------+----------+
//! ```
//!
//! Entries start unresolved and are filled in by page faults.

use std::fmt;
use std::sync::Arc;

use nos_api::{Error, Pid, Result};
use spin::Mutex as SpinMutex;

use crate::image::{ProgramImage, Section};
use crate::page_table::{PageTableEntry, PteFlags};

/// Page table and backing image of one process
pub struct AddressSpace {
    pid: Pid,
    image: Arc<dyn ProgramImage>,
    sections: Vec<Section>,
    image_pages: usize,
    entries: Box<[SpinMutex<PageTableEntry>]>,
}

impl AddressSpace {
    /// Size an address space for `image` with `stack_pages` of stack and
    /// one argument page.
    ///
    /// Fails if the image's sections do not cover vpns `0..n` contiguously
    /// and in order.
    pub fn new(pid: Pid, image: Arc<dyn ProgramImage>, stack_pages: usize) -> Result<Arc<Self>> {
        let sections = image.sections();
        let mut image_pages = 0usize;
        for section in &sections {
            if section.first_vpn != image_pages {
                return Err(Error::InvalidImage(format!(
                    "fragmented image: section {} starts at vpn {}, expected {}",
                    section.name, section.first_vpn, image_pages
                )));
            }
            image_pages = image_pages
                .checked_add(section.num_pages)
                .ok_or_else(|| Error::InvalidImage("image too large".into()))?;
        }
        let num_pages = image_pages
            .checked_add(stack_pages)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| Error::InvalidImage("address space too large".into()))?;

        let entries = (0..num_pages)
            .map(|vpn| SpinMutex::new(PageTableEntry::new(vpn)))
            .collect();
        Ok(Arc::new(Self {
            pid,
            image,
            sections,
            image_pages,
            entries,
        }))
    }

    /// Owning process
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Number of virtual pages
    pub fn num_pages(&self) -> usize {
        self.entries.len()
    }

    /// Sections of the backing image
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// First stack page
    pub fn stack_start(&self) -> usize {
        self.image_pages
    }

    /// The page holding program arguments
    pub fn argument_vpn(&self) -> usize {
        self.entries.len() - 1
    }

    /// The section containing `vpn`, with its index
    pub fn section_for(&self, vpn: usize) -> Option<(usize, &Section)> {
        if vpn >= self.image_pages {
            return None;
        }
        self.sections.iter().enumerate().find(|(_, s)| s.contains(vpn))
    }

    /// Returns true if `vpn` lies in a read-only section.
    pub fn is_read_only(&self, vpn: usize) -> bool {
        self.section_for(vpn).is_some_and(|(_, s)| s.read_only)
    }

    /// A copy of the entry for `vpn`
    pub fn entry(&self, vpn: usize) -> Option<PageTableEntry> {
        self.entries.get(vpn).map(|e| *e.lock())
    }

    /// Snapshot of every entry
    pub fn entries(&self) -> Vec<PageTableEntry> {
        self.entries.iter().map(|e| *e.lock()).collect()
    }

    pub(crate) fn image(&self) -> &dyn ProgramImage {
        self.image.as_ref()
    }

    /// Apply `f` to the entry for `vpn`. Panics if `vpn` is out of range.
    pub(crate) fn update<R>(&self, vpn: usize, f: impl FnOnce(&mut PageTableEntry) -> R) -> R {
        f(&mut self.entries[vpn].lock())
    }

    pub(crate) fn mark(&self, vpn: usize, flags: PteFlags) {
        self.update(vpn, |e| e.flags.insert(flags));
    }

    pub(crate) fn any_in_transit(&self) -> bool {
        self.entries.iter().any(|e| e.lock().is_in_transit())
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pid", &self.pid)
            .field("num_pages", &self.entries.len())
            .field("sections", &self.sections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemoryImage;
    use crate::physical::PAGE_SIZE;

    fn image() -> Arc<MemoryImage> {
        Arc::new(
            MemoryImage::new()
                .with_section(".text", vec![0u8; 2 * PAGE_SIZE], true)
                .with_section(".data", vec![0u8; 10], false),
        )
    }

    #[test]
    fn test_layout() {
        let space = AddressSpace::new(Pid::new(1), image(), 8).unwrap();
        assert_eq!(space.num_pages(), 3 + 8 + 1);
        assert_eq!(space.stack_start(), 3);
        assert_eq!(space.argument_vpn(), 11);
        assert_eq!(space.section_for(1).map(|(i, _)| i), Some(0));
        assert_eq!(space.section_for(2).map(|(i, _)| i), Some(1));
        assert!(space.section_for(3).is_none());
        assert!(space.is_read_only(0));
        assert!(!space.is_read_only(2));
        assert!(!space.is_read_only(11));
        assert!(space.entries().iter().all(|e| !e.is_valid() && e.ppn.is_none()));
        assert!(space.entry(12).is_none());
    }

    #[test]
    fn test_fragmented_image_rejected() {
        let image = Arc::new(
            MemoryImage::new()
                .with_section(".text", vec![0u8; 4], true)
                .with_section_at(".data", 5, vec![0u8; 4], false),
        );
        let err = AddressSpace::new(Pid::new(2), image, 8).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(msg) if msg.contains("fragmented")));
    }

    #[test]
    fn test_update_and_transit_tracking() {
        let space = AddressSpace::new(Pid::new(3), image(), 1).unwrap();
        assert!(!space.any_in_transit());
        space.mark(4, PteFlags::IN_TRANSIT);
        assert!(space.any_in_transit());
        space.update(4, |e| e.flags.remove(PteFlags::IN_TRANSIT));
        assert!(!space.any_in_transit());
    }
}
