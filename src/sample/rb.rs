//! The kernel-shared sample ring buffer and the cursor that walks its
//! records.

use std::mem::size_of;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::ffi::bindings::{perf_event_header, perf_event_mmap_page};
use crate::ffi::syscall::{mmap, munmap};
use crate::ffi::PAGE_SIZE;

/// The mapped ring buffer: the metadata page at offset 0, record data from
/// page 1 onwards. The kernel is the sole producer; this crate consumes in
/// a single pass and never advances `data_tail`.
pub(crate) struct RingBuffer {
    ptr: NonNull<u8>,
    pages: usize,
}

impl RingBuffer {
    /// Maps `pages x 4096` bytes of the perf fd read-only and shared.
    pub fn new(fd: RawFd, pages: usize) -> Result<Self> {
        let len = pages * PAGE_SIZE;
        let ptr = unsafe { mmap::<u8>(len, libc::PROT_READ, libc::MAP_SHARED, fd, 0) }
            .map_err(Error::BufferAllocationFailure)?;
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::BufferAllocationFailure(std::io::Error::other("mmap returned null"))
        })?;
        Ok(Self { ptr, pages })
    }

    fn page(&self) -> *const perf_event_mmap_page {
        self.ptr.as_ptr() as _
    }

    /// A cursor over the records currently in the buffer.
    pub fn records(&self) -> Records<'_> {
        let page = self.page();
        // Pairs with the kernel's store-release of data_head.
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/ring_buffer.c#L99
        let data_head =
            unsafe { AtomicU64::from_ptr(std::ptr::addr_of!((*page).data_head) as *mut u64) }
                .load(Ordering::Acquire);
        let data_tail = unsafe { std::ptr::addr_of!((*page).data_tail).read() };

        Records::new(
            self.ptr.as_ptr(),
            self.pages * PAGE_SIZE,
            data_head,
            data_tail,
        )
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        let _ = unsafe { munmap(self.ptr.as_ptr(), self.pages * PAGE_SIZE) };
    }
}

/// Forward walk over `{type, misc, size}`-framed records, from page 1 up to
/// `data_head`. The cursor advances by each record's advertised size, never
/// reads past `data_head`, and yields nothing when the buffer is empty
/// (`data_tail >= data_head`).
pub(crate) struct Records<'a> {
    base: *const u8,
    offset: usize,
    end: usize,
    _buffer: std::marker::PhantomData<&'a ()>,
}

impl Records<'_> {
    pub(crate) fn new(base: *const u8, total_len: usize, data_head: u64, data_tail: u64) -> Self {
        let end = if data_tail >= data_head {
            0
        } else {
            // data_head counts bytes written since the mapping was created;
            // the walk is bounded by the mapping itself.
            (PAGE_SIZE + data_head as usize).min(total_len)
        };

        Self {
            base,
            offset: PAGE_SIZE,
            end,
            _buffer: std::marker::PhantomData,
        }
    }
}

impl Iterator for Records<'_> {
    /// The record header and a pointer to its payload.
    type Item = (perf_event_header, *const u8);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + size_of::<perf_event_header>() > self.end {
            return None;
        }

        let header = unsafe { (self.base.add(self.offset) as *const perf_event_header).read() };
        if (header.size as usize) < size_of::<perf_event_header>()
            || self.offset + header.size as usize > self.end
        {
            // A malformed or truncated record would desynchronize the walk.
            return None;
        }

        let payload = unsafe { self.base.add(self.offset + size_of::<perf_event_header>()) };
        self.offset += header.size as usize;

        Some((header, payload))
    }
}
