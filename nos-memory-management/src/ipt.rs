//! Inverted page table
//!
//! One record per physical frame naming the page that occupies it, plus a
//! pin count. The occupant records and the clock hand live behind the
//! table lock; pin counts are atomics so a finished transfer can unpin
//! without taking the lock. New pins are only ever taken through a
//! [`TableGuard`], so while the lock is held the set of pinned frames can
//! only shrink.
//!
//! A frame is in exactly one of these states:
//!
//! | state     | occupant | pins | how it gets there                    |
//! |-----------|----------|------|--------------------------------------|
//! | free      | none     | 0    | in the frame allocator's pool        |
//! | reserved  | none     | >= 1 | claimed by a fault, page in transit  |
//! | resident  | some     | any  | bound to a valid page table entry    |

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use nos_sync::{Lock, LockGuard, RawLock};

use crate::address_space::AddressSpace;
use crate::page_table::PteFlags;

/// The page occupying a frame
#[derive(Debug, Clone)]
pub struct Occupant {
    /// Owning address space
    pub space: Weak<AddressSpace>,
    /// Virtual page within that space
    pub vpn: usize,
}

struct FrameTable {
    occupants: Vec<Option<Occupant>>,
    hand: usize,
}

/// Frame-indexed table of resident pages
pub struct InvertedPageTable {
    table: Lock<FrameTable>,
    pins: Box<[AtomicU32]>,
}

impl InvertedPageTable {
    /// Create a table for `num_frames` frames, all unoccupied.
    pub fn new(num_frames: usize) -> Self {
        Self {
            table: Lock::new(FrameTable {
                occupants: vec![None; num_frames],
                hand: 0,
            }),
            pins: (0..num_frames).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Number of frames
    pub fn num_frames(&self) -> usize {
        self.pins.len()
    }

    /// Acquire the table lock.
    pub fn lock(&self) -> TableGuard<'_> {
        TableGuard {
            table: self.table.acquire(),
            pins: &self.pins,
        }
    }

    /// The table lock, for attaching condition variables
    pub fn raw_lock(&self) -> &Arc<RawLock> {
        self.table.raw()
    }

    /// Drop one pin of `frame`. Panics if it is not pinned.
    pub fn unpin(&self, frame: usize) {
        let prev = self.pins[frame].fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "frame {frame} unpinned while not pinned");
    }

    /// Current pin count of `frame`
    pub fn pin_count(&self, frame: usize) -> u32 {
        self.pins[frame].load(Ordering::Acquire)
    }
}

/// Exclusive access to the occupant records and the clock hand
pub struct TableGuard<'a> {
    table: LockGuard<'a, FrameTable>,
    pins: &'a [AtomicU32],
}

impl TableGuard<'_> {
    /// Record that `frame` now holds page `vpn` of `space`.
    ///
    /// Any previous occupant record is overwritten without being consulted.
    pub fn bind(&mut self, frame: usize, space: &Arc<AddressSpace>, vpn: usize) {
        self.table.occupants[frame] = Some(Occupant {
            space: Arc::downgrade(space),
            vpn,
        });
    }

    /// Clear and return the occupant record of `frame`.
    pub fn unbind(&mut self, frame: usize) -> Option<Occupant> {
        self.table.occupants[frame].take()
    }

    /// The occupant record of `frame`
    pub fn occupant(&self, frame: usize) -> Option<&Occupant> {
        self.table.occupants[frame].as_ref()
    }

    /// Pin `frame` against eviction.
    pub fn pin(&mut self, frame: usize) {
        self.pins[frame].fetch_add(1, Ordering::AcqRel);
    }

    /// Pin an unoccupied frame for a page about to move into it.
    pub fn reserve(&mut self, frame: usize) {
        debug_assert!(self.table.occupants[frame].is_none());
        self.pin(frame);
    }

    /// Returns true if `frame` has at least one pin.
    pub fn is_pinned(&self, frame: usize) -> bool {
        self.pins[frame].load(Ordering::Acquire) > 0
    }

    /// Current position of the clock hand
    pub fn hand(&self) -> usize {
        self.table.hand
    }

    /// Number of frames with an occupant
    pub fn resident_count(&self) -> usize {
        self.table.occupants.iter().filter(|o| o.is_some()).count()
    }

    /// Returns true if no frame is both resident and unpinned.
    pub fn all_pinned(&self) -> bool {
        !self
            .table
            .occupants
            .iter()
            .enumerate()
            .any(|(frame, occupant)| occupant.is_some() && !self.is_pinned(frame))
    }

    /// Second-chance sweep for an eviction victim.
    ///
    /// Starting at the clock hand, frames that are unoccupied or pinned are
    /// passed over, and resident frames whose page was used since the last
    /// pass have the used bit cleared and are passed over. The hand stops on
    /// the first resident, unpinned, unused frame, which is returned. A frame
    /// whose address space is gone is taken immediately.
    ///
    /// Returns `None` only if every resident frame is pinned.
    pub fn find_victim(&mut self) -> Option<usize> {
        let num_frames = self.table.occupants.len();
        // One pass clears every used bit that can stop the hand, so the
        // second pass must stop unless nothing is evictable.
        for _ in 0..=2 * num_frames {
            let frame = self.table.hand;
            if !self.is_pinned(frame) {
                if let Some(occupant) = &self.table.occupants[frame] {
                    let Some(space) = occupant.space.upgrade() else {
                        return Some(frame);
                    };
                    let was_used = space.update(occupant.vpn, |e| {
                        let used = e.is_used();
                        e.flags.remove(PteFlags::USED);
                        used
                    });
                    if !was_used {
                        return Some(frame);
                    }
                }
            }
            self.table.hand = (frame + 1) % num_frames;
        }
        None
    }

    /// Clear every occupant record of `space`, returning the frames freed.
    pub fn unbind_space(&mut self, space: &Arc<AddressSpace>) -> Vec<usize> {
        let target = Arc::downgrade(space);
        self.table
            .occupants
            .iter_mut()
            .enumerate()
            .filter_map(|(frame, occupant)| {
                let owned = occupant
                    .as_ref()
                    .is_some_and(|o| Weak::ptr_eq(&o.space, &target));
                if owned {
                    *occupant = None;
                    Some(frame)
                } else {
                    None
                }
            })
            .collect()
    }
}
