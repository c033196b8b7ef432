//! Copies between kernel buffers and a process's virtual memory
//!
//! Each touched page is faulted in and pinned for the duration of its part
//! of the copy. A transfer stops early, with a short count, at the first
//! address outside the address space (and, for writes, at the first
//! read-only page).

use std::sync::Arc;

use nos_api::Result;

use crate::address_space::AddressSpace;
use crate::kernel::VmKernel;
use crate::page_table::PteFlags;
use crate::virtual_mem::VirtAddr;

impl VmKernel {
    /// Copy from `space` at `vaddr` into `buf`.
    ///
    /// Returns the number of bytes copied.
    pub fn read_memory(
        &self,
        space: &Arc<AddressSpace>,
        vaddr: usize,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let Some(va) = VirtAddr::new(vaddr).checked_add(done) else {
                break;
            };
            let vpn = va.page_number();
            if vpn >= space.num_pages() {
                break;
            }
            let frame = self.fault_in(space, vpn)?;
            let copied = self.memory.read(frame, va.page_offset(), &mut buf[done..]);
            space.mark(vpn, PteFlags::USED);
            self.unpin(frame);
            done += copied;
        }
        Ok(done)
    }

    /// Copy `data` into `space` at `vaddr`.
    ///
    /// Returns the number of bytes copied.
    pub fn write_memory(&self, space: &Arc<AddressSpace>, vaddr: usize, data: &[u8]) -> Result<usize> {
        let mut done = 0;
        while done < data.len() {
            let Some(va) = VirtAddr::new(vaddr).checked_add(done) else {
                break;
            };
            let vpn = va.page_number();
            if vpn >= space.num_pages() || space.is_read_only(vpn) {
                break;
            }
            let frame = self.fault_in(space, vpn)?;
            let copied = self.memory.write(frame, va.page_offset(), &data[done..]);
            space.mark(vpn, PteFlags::USED | PteFlags::DIRTY);
            self.unpin(frame);
            done += copied;
        }
        Ok(done)
    }

    /// Read up to `len` bytes from `space` at `vaddr`.
    pub fn read_vec(&self, space: &Arc<AddressSpace>, vaddr: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let copied = self.read_memory(space, vaddr, &mut buf)?;
        buf.truncate(copied);
        Ok(buf)
    }

    /// Read a NUL-terminated string of at most `max_len` bytes.
    ///
    /// Returns `None` if no terminator is found within `max_len + 1` bytes
    /// or before the end of the address space.
    pub fn read_string(
        &self,
        space: &Arc<AddressSpace>,
        vaddr: usize,
        max_len: usize,
    ) -> Result<Option<String>> {
        let bytes = self.read_vec(space, vaddr, max_len.saturating_add(1))?;
        Ok(bytes
            .iter()
            .position(|&b| b == 0)
            .map(|end| String::from_utf8_lossy(&bytes[..end]).into_owned()))
    }
}
