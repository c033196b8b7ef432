//! Page fault handling
//!
//! A fault moves a page into a frame in three steps:
//!
//! 1. Claim, under the table lock: take a free frame, or run the clock to
//!    pick a victim. The faulting entry and the victim entry are marked
//!    `IN_TRANSIT`, the victim's record is cleared from the inverted page
//!    table and the frame is reserved (pinned, no occupant). If every
//!    resident frame is pinned the fault sleeps on the pin-wait condition.
//! 2. Move, with no lock held: write a dirty victim to swap, then fill the
//!    frame from swap, the image section or zeros.
//! 3. Publish, under the table lock: update both entries, bind the frame
//!    and wake faults waiting on either page.
//!
//! The frame comes back from [`VmKernel::fault_in`] still pinned, so the
//! caller can copy through it before releasing it.

use std::sync::Arc;

use nos_api::{Error, Result, nos_debug, nos_trace, nos_warn};

use crate::address_space::AddressSpace;
use crate::ipt::TableGuard;
use crate::kernel::VmKernel;
use crate::page_table::PteFlags;
use crate::physical::{PAGE_SIZE, Page};

/// A resident page of another space chosen for eviction
struct Eviction {
    space: Arc<AddressSpace>,
    vpn: usize,
    write_back: bool,
}

/// Where a faulting page's contents come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Swap(u32),
    Section { index: usize, page: usize },
    Zero,
}

impl VmKernel {
    /// Make page `vpn` of `space` resident.
    ///
    /// Panics if `vpn` is beyond the page table. On error the faulting
    /// process must be terminated.
    pub fn handle_fault(&self, space: &Arc<AddressSpace>, vpn: usize) -> Result<()> {
        let frame = self.fault_in(space, vpn)?;
        self.unpin(frame);
        Ok(())
    }

    /// Make page `vpn` of `space` resident and keep it pinned until the
    /// returned guard is dropped.
    pub fn pin_page(&self, space: &Arc<AddressSpace>, vpn: usize) -> Result<PinnedPage<'_>> {
        let frame = self.fault_in(space, vpn)?;
        Ok(PinnedPage {
            kernel: self,
            space: Arc::clone(space),
            vpn,
            frame,
        })
    }

    /// Drop one pin of `frame` and wake evictors waiting for it.
    pub(crate) fn unpin(&self, frame: usize) {
        self.ipt.unpin(frame);
        self.signal_unpinned();
    }

    /// Make page `vpn` of `space` resident and return its frame, pinned.
    pub(crate) fn fault_in(&self, space: &Arc<AddressSpace>, vpn: usize) -> Result<usize> {
        assert!(
            vpn < space.num_pages(),
            "{} faulted on vpn {} beyond its {} pages",
            space.pid(),
            vpn,
            space.num_pages()
        );

        let mut table = self.ipt.lock();
        let (frame, eviction) = loop {
            let entry = space.update(vpn, |e| *e);
            if let (true, Some(frame)) = (entry.is_valid(), entry.ppn) {
                table.pin(frame);
                space.mark(vpn, PteFlags::USED);
                return Ok(frame);
            }
            if entry.is_in_transit() {
                self.transit.sleep();
                continue;
            }

            if let Some(frame) = self.frames.allocate() {
                table.reserve(frame);
                self.stats.count_free_frame_hit();
                break (frame, None);
            }
            if let Some(frame) = table.find_victim() {
                let eviction = self.claim_victim(&mut table, frame);
                break (frame, eviction);
            }

            let pin = self.pin_lock.acquire();
            // Rechecked under the pin lock so an unpin cannot slip between
            // the check and the sleep.
            if table.all_pinned() {
                nos_trace!("vm: {} vpn {} waiting for an unpinned frame", space.pid(), vpn);
                drop(table);
                self.pin_wait.sleep();
                drop(pin);
                table = self.ipt.lock();
            }
        };
        space.mark(vpn, PteFlags::IN_TRANSIT);
        drop(table);

        self.stats.count_fault();
        self.move_in(space, vpn, frame, eviction)
    }

    /// Take `frame` from its occupant. Called with the table lock held.
    fn claim_victim(&self, table: &mut TableGuard<'_>, frame: usize) -> Option<Eviction> {
        let occupant = table.unbind(frame);
        table.reserve(frame);
        self.stats.count_eviction();

        // An orphaned frame has nothing to save.
        let occupant = occupant?;
        let space = occupant.space.upgrade()?;
        let write_back = space.update(occupant.vpn, |e| {
            e.flags.remove(PteFlags::VALID);
            e.flags.insert(PteFlags::IN_TRANSIT);
            e.is_dirty() && !e.is_read_only()
        });
        nos_debug!(
            "vm: evicting {} vpn {} from frame {} ({})",
            space.pid(),
            occupant.vpn,
            frame,
            if write_back { "dirty" } else { "clean" }
        );
        Some(Eviction {
            space,
            vpn: occupant.vpn,
            write_back,
        })
    }

    /// Steps 2 and 3: move data with no lock held, then publish.
    fn move_in(
        &self,
        space: &Arc<AddressSpace>,
        vpn: usize,
        frame: usize,
        eviction: Option<Eviction>,
    ) -> Result<usize> {
        let mut page: Page = [0u8; PAGE_SIZE];

        let victim_slot = match &eviction {
            Some(victim) if victim.write_back => {
                self.memory.read_page(frame, &mut page);
                let slot = self.swap.allocate_slot();
                if let Err(err) = self.swap.write_page(slot, &page) {
                    self.swap.free_slot(slot);
                    self.restore_victim(frame, eviction.as_ref());
                    return Err(self.abort_fault(space, vpn, frame, false, err));
                }
                self.stats.count_swap_write();
                Some(slot)
            }
            Some(_) => {
                self.stats.count_clean_discard();
                None
            }
            None => None,
        };

        let entry = space.update(vpn, |e| *e);
        let section = space.section_for(vpn).map(|(index, s)| (index, s.first_vpn, s.read_only));
        let source = match (entry.swap_slot, section) {
            (Some(slot), _) => Source::Swap(slot),
            (None, Some((index, first_vpn, _))) => Source::Section {
                index,
                page: vpn - first_vpn,
            },
            (None, None) => Source::Zero,
        };
        let read_only = section.is_some_and(|(_, _, ro)| ro);

        let loaded = match source {
            Source::Swap(slot) => self.swap.read_page(slot, &mut page).map(|_| {
                self.stats.count_swap_read();
            }),
            Source::Section { index, page: index_in_section } => space
                .image()
                .load_page(index, index_in_section, &mut page)
                .map(|_| {
                    self.stats.count_section_load();
                }),
            Source::Zero => {
                page.fill(0);
                self.stats.count_zero_fill();
                Ok(())
            }
        };
        if let Err(err) = loaded {
            let table = self.ipt.lock();
            self.publish_victim(eviction.as_ref(), victim_slot);
            drop(table);
            return Err(self.abort_fault(space, vpn, frame, true, err));
        }
        self.memory.write_page(frame, &page);

        let mut table = self.ipt.lock();
        self.publish_victim(eviction.as_ref(), victim_slot);
        space.update(vpn, |e| {
            e.ppn = Some(frame);
            e.flags.remove(PteFlags::IN_TRANSIT);
            e.flags.insert(PteFlags::VALID | PteFlags::USED);
            e.flags.set(PteFlags::READ_ONLY, read_only);
            // The only copy of a page read back from swap is now in memory.
            e.flags.set(PteFlags::DIRTY, matches!(source, Source::Swap(_)));
            if matches!(source, Source::Swap(_)) {
                e.swap_slot = None;
            }
        });
        table.bind(frame, space, vpn);
        self.transit.wake_all();
        drop(table);

        if let Source::Swap(slot) = source {
            self.swap.free_slot(slot);
        }
        nos_debug!(
            "vm: {} vpn {} -> frame {} from {:?}",
            space.pid(),
            vpn,
            frame,
            source
        );
        Ok(frame)
    }

    /// Finish the eviction: the victim now lives in swap or nowhere.
    fn publish_victim(&self, eviction: Option<&Eviction>, slot: Option<u32>) {
        if let Some(victim) = eviction {
            victim.space.update(victim.vpn, |e| {
                e.ppn = None;
                e.flags.remove(PteFlags::IN_TRANSIT | PteFlags::DIRTY | PteFlags::USED);
                if slot.is_some() {
                    e.swap_slot = slot;
                }
            });
        }
    }

    /// Put a victim whose write-back failed back into its frame.
    fn restore_victim(&self, frame: usize, eviction: Option<&Eviction>) {
        if let Some(victim) = eviction {
            let mut table = self.ipt.lock();
            victim.space.update(victim.vpn, |e| {
                e.flags.remove(PteFlags::IN_TRANSIT);
                e.flags.insert(PteFlags::VALID);
            });
            table.bind(frame, &victim.space, victim.vpn);
            self.transit.wake_all();
        }
    }

    /// Undo a fault that could not load its page.
    ///
    /// With `release_frame` the reserved frame goes back to the pool;
    /// otherwise it has been handed back to the victim and only the
    /// reservation pin is dropped.
    fn abort_fault(
        &self,
        space: &Arc<AddressSpace>,
        vpn: usize,
        frame: usize,
        release_frame: bool,
        cause: Error,
    ) -> Error {
        {
            let _table = self.ipt.lock();
            space.update(vpn, |e| e.flags.remove(PteFlags::IN_TRANSIT));
            self.ipt.unpin(frame);
            if release_frame {
                self.frames.release(frame);
            }
            self.transit.wake_all();
        }
        self.signal_unpinned();

        nos_warn!("vm: unrecoverable fault in {} at vpn {}: {}", space.pid(), vpn, cause);
        Error::UnrecoverableFault {
            pid: space.pid(),
            vpn,
            reason: cause.to_string(),
        }
    }
}

/// A resident page pinned against eviction
///
/// Dropping the guard unpins the frame.
pub struct PinnedPage<'k> {
    kernel: &'k VmKernel,
    space: Arc<AddressSpace>,
    vpn: usize,
    frame: usize,
}

impl PinnedPage<'_> {
    /// The pinned frame
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// The virtual page held in the frame
    pub fn vpn(&self) -> usize {
        self.vpn
    }

    /// Copy bytes out of the page starting at `offset`.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.kernel.memory.read(self.frame, offset, buf)
    }

    /// Copy bytes into the page starting at `offset`, marking it dirty.
    ///
    /// Returns 0 for a read-only page.
    pub fn write(&self, offset: usize, data: &[u8]) -> usize {
        if self.space.is_read_only(self.vpn) {
            return 0;
        }
        let written = self.kernel.memory.write(self.frame, offset, data);
        self.space.mark(self.vpn, PteFlags::USED | PteFlags::DIRTY);
        written
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        self.kernel.unpin(self.frame);
    }
}
