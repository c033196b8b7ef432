//! Swap space
//!
//! Evicted dirty pages live in a single backing file, one page per slot at
//! offset `slot * PAGE_SIZE`. The file is created empty when the kernel
//! starts and removed when it shuts down. Freed slots are reused before the
//! file is extended.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nos_api::{Result, nos_info, nos_trace, nos_warn};
use nos_sync::Lock;
use spin::Mutex as SpinMutex;

use crate::physical::{PAGE_SIZE, Page};

struct SlotPool {
    free: VecDeque<u32>,
    // Slots ever handed out; the file never holds more than this many pages.
    extent: u32,
}

/// Disk-backed swap area
pub struct SwapSpace {
    path: PathBuf,
    file: Lock<File>,
    slots: SpinMutex<SlotPool>,
    removed: bool,
}

impl SwapSpace {
    /// Create (or truncate) the swap file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        nos_info!("swap: created {}", path.display());
        Ok(Self {
            path,
            file: Lock::new(file),
            slots: SpinMutex::new(SlotPool {
                free: VecDeque::new(),
                extent: 0,
            }),
            removed: false,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserve a slot, reusing a freed one if possible.
    pub fn allocate_slot(&self) -> u32 {
        let mut slots = self.slots.lock();
        match slots.free.pop_front() {
            Some(slot) => slot,
            None => {
                let slot = slots.extent;
                slots.extent += 1;
                slot
            }
        }
    }

    /// Return `slot` to the free set.
    pub fn free_slot(&self, slot: u32) {
        let mut slots = self.slots.lock();
        assert!(slot < slots.extent, "swap slot {slot} was never allocated");
        debug_assert!(!slots.free.contains(&slot), "swap slot {slot} freed twice");
        slots.free.push_back(slot);
    }

    /// Number of slots currently allocated
    pub fn slots_in_use(&self) -> usize {
        let slots = self.slots.lock();
        slots.extent as usize - slots.free.len()
    }

    /// Number of page slots the backing store has grown to
    pub fn extent(&self) -> usize {
        self.slots.lock().extent as usize
    }

    /// Write one page into `slot`.
    pub fn write_page(&self, slot: u32, page: &Page) -> Result<()> {
        let mut file = self.file.acquire();
        file.seek(SeekFrom::Start(Self::offset(slot)))?;
        file.write_all(page)?;
        nos_trace!("swap: wrote slot {}", slot);
        Ok(())
    }

    /// Read one page from `slot`.
    pub fn read_page(&self, slot: u32, page: &mut Page) -> Result<()> {
        let mut file = self.file.acquire();
        file.seek(SeekFrom::Start(Self::offset(slot)))?;
        file.read_exact(page)?;
        nos_trace!("swap: read slot {}", slot);
        Ok(())
    }

    /// Remove the backing file.
    pub fn close(mut self) -> Result<()> {
        self.removed = true;
        fs::remove_file(&self.path)?;
        nos_info!("swap: removed {}", self.path.display());
        Ok(())
    }

    fn offset(slot: u32) -> u64 {
        u64::from(slot) * PAGE_SIZE as u64
    }
}

impl Drop for SwapSpace {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(err) = fs::remove_file(&self.path) {
                nos_warn!("swap: failed to remove {}: {}", self.path.display(), err);
            }
        }
    }
}
