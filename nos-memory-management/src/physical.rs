//! Physical memory module
//!
//! Main memory is an array of page-sized frames. Each frame sits behind its
//! own short-held spinlock so copies into different frames never contend;
//! whether a frame may be touched at all is decided by the frame allocator
//! and the pin counts of the inverted page table, not here.

use spin::Mutex as SpinMutex;
use static_assertions::const_assert;

/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 10;
/// Page size (1KB)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

const_assert!(PAGE_SIZE.is_power_of_two());

/// Contents of one page
pub type Page = [u8; PAGE_SIZE];

/// Align address down to page boundary
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Align address up to page boundary
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Number of pages needed to hold `bytes` bytes
#[inline]
pub const fn pages_spanned(bytes: usize) -> usize {
    page_round_up(bytes) >> PAGE_SHIFT
}

/// Simulated physical memory
pub struct PhysicalMemory {
    frames: Box<[SpinMutex<Box<Page>>]>,
}

impl PhysicalMemory {
    /// Allocate `num_frames` zeroed frames.
    pub fn new(num_frames: usize) -> Self {
        let frames = (0..num_frames)
            .map(|_| SpinMutex::new(Box::new([0u8; PAGE_SIZE])))
            .collect();
        Self { frames }
    }

    /// Number of frames
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Total size in bytes
    pub fn size(&self) -> usize {
        self.frames.len() * PAGE_SIZE
    }

    /// Copy bytes out of `frame` starting at `offset`.
    ///
    /// Copies up to the end of the frame and returns the byte count.
    pub fn read(&self, frame: usize, offset: usize, buf: &mut [u8]) -> usize {
        let page = self.frames[frame].lock();
        let src = &page[offset.min(PAGE_SIZE)..];
        let len = src.len().min(buf.len());
        buf[..len].copy_from_slice(&src[..len]);
        len
    }

    /// Copy bytes into `frame` starting at `offset`.
    ///
    /// Copies up to the end of the frame and returns the byte count.
    pub fn write(&self, frame: usize, offset: usize, data: &[u8]) -> usize {
        let mut page = self.frames[frame].lock();
        let dst = &mut page[offset.min(PAGE_SIZE)..];
        let len = dst.len().min(data.len());
        dst[..len].copy_from_slice(&data[..len]);
        len
    }

    /// Copy a whole frame out.
    pub fn read_page(&self, frame: usize, page: &mut Page) {
        page.copy_from_slice(&self.frames[frame].lock()[..]);
    }

    /// Overwrite a whole frame.
    pub fn write_page(&self, frame: usize, page: &Page) {
        self.frames[frame].lock().copy_from_slice(page);
    }

    /// Fill a whole frame with `byte`.
    pub fn fill(&self, frame: usize, byte: u8) {
        self.frames[frame].lock().fill(byte);
    }

    /// Returns a copy of a frame's contents.
    pub fn snapshot(&self, frame: usize) -> Box<Page> {
        self.frames[frame].lock().clone()
    }
}
