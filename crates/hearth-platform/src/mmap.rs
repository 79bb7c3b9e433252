//! POSIX virtual memory through `mmap`.
//!
//! Reserving maps anonymous `PROT_NONE` pages; committing flips a range
//! to read/write; decommitting drops the pages and protects them again.

use std::io;
use std::ptr::{self, NonNull};

use hearth_core::{MemoryError, MemoryStats, VirtualMemory};

/// [`VirtualMemory`] over `mmap`/`mprotect`/`munmap`.
///
/// On POSIX the allocation granularity equals the page size.
#[derive(Clone, Copy, Debug)]
pub struct MmapMemory {
    page_size: usize,
}

impl MmapMemory {
    /// Query the page size once and build the backend.
    pub fn new() -> Self {
        Self {
            page_size: page_size(),
        }
    }
}

impl Default for MmapMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(unsafe_code)]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(raw).ok().filter(|p| *p > 0).unwrap_or(4096)
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn physical_pages() -> (usize, usize) {
    // SAFETY: sysconf has no preconditions.
    let (total, avail) = unsafe {
        (
            libc::sysconf(libc::_SC_PHYS_PAGES),
            libc::sysconf(libc::_SC_AVPHYS_PAGES),
        )
    };
    match (usize::try_from(total), usize::try_from(avail)) {
        (Ok(total), Ok(avail)) => (total, avail),
        _ => (0, 0),
    }
}

#[cfg(not(target_os = "linux"))]
fn physical_pages() -> (usize, usize) {
    (0, 0)
}

fn os_reason() -> String {
    io::Error::last_os_error().to_string()
}

impl VirtualMemory for MmapMemory {
    #[allow(unsafe_code)]
    fn reserve(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        if size == 0 {
            return Err(MemoryError::Unsupported {
                operation: "reserve of zero bytes",
            });
        }
        // SAFETY: anonymous private mapping at a kernel-chosen address;
        // no existing memory is touched.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let reason = os_reason();
            tracing::error!(size, %reason, "mmap(reserve) failed");
            return Err(MemoryError::Reserve { size, reason });
        }
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| MemoryError::Reserve {
            size,
            reason: "mmap returned null".into(),
        })
    }

    #[allow(unsafe_code)]
    fn commit(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        // SAFETY: the caller passes a page-aligned range inside a live
        // reservation; mprotect validates the rest and reports errors.
        let rc = unsafe {
            libc::mprotect(
                ptr.as_ptr().cast(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            let reason = os_reason();
            tracing::error!(size, %reason, "mprotect(commit) failed");
            return Err(MemoryError::Commit { size, reason });
        }
        Ok(())
    }

    #[allow(unsafe_code)]
    fn decommit(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: as for commit; the range's contents are discarded,
            // which is the point of decommitting.
            let rc = unsafe { libc::madvise(ptr.as_ptr().cast(), size, libc::MADV_DONTNEED) };
            if rc != 0 {
                let reason = os_reason();
                tracing::error!(size, %reason, "madvise(decommit) failed");
                return Err(MemoryError::Decommit { size, reason });
            }
        }
        // SAFETY: as for commit.
        let rc = unsafe { libc::mprotect(ptr.as_ptr().cast(), size, libc::PROT_NONE) };
        if rc != 0 {
            let reason = os_reason();
            tracing::error!(size, %reason, "mprotect(decommit) failed");
            return Err(MemoryError::Decommit { size, reason });
        }
        Ok(())
    }

    #[allow(unsafe_code)]
    fn release(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        // SAFETY: `ptr`/`size` describe a whole reservation made by
        // `reserve`; nothing references it after this call.
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast(), size) };
        if rc != 0 {
            let reason = os_reason();
            tracing::error!(size, %reason, "munmap failed");
            return Err(MemoryError::Release { size, reason });
        }
        Ok(())
    }

    fn stats(&self) -> MemoryStats {
        let (total_pages, avail_pages) = physical_pages();
        MemoryStats {
            page_size: self.page_size,
            allocation_granularity: self.page_size,
            total_physical: total_pages.saturating_mul(self.page_size),
            available_physical: avail_pages.saturating_mul(self.page_size),
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    #[test]
    fn stats_report_page_granularity() {
        let mem = MmapMemory::new();
        let stats = mem.stats();
        assert!(stats.page_size.is_power_of_two());
        assert_eq!(stats.allocation_granularity, stats.page_size);
    }

    #[test]
    fn committed_memory_is_writable_and_zeroed() {
        let mut mem = MmapMemory::new();
        let page = mem.stats().page_size;
        let base = mem.reserve(16 * page).unwrap();
        mem.commit(base, 2 * page).unwrap();
        // SAFETY: the first two pages were just committed read/write.
        let bytes = unsafe { std::slice::from_raw_parts_mut(base.as_ptr(), 2 * page) };
        assert!(bytes.iter().all(|b| *b == 0));
        bytes[0] = 0xAB;
        bytes[2 * page - 1] = 0xCD;
        assert_eq!(bytes[0], 0xAB);

        mem.decommit(base, 2 * page).unwrap();
        mem.commit(base, page).unwrap();
        #[cfg(target_os = "linux")]
        {
            // SAFETY: recommitted above.
            let first = unsafe { base.as_ptr().read() };
            assert_eq!(first, 0, "decommit discards contents");
        }
        mem.release(base, 16 * page).unwrap();
    }

    #[test]
    fn zero_reserve_is_unsupported() {
        let mut mem = MmapMemory::new();
        assert!(matches!(
            mem.reserve(0),
            Err(MemoryError::Unsupported { .. })
        ));
    }

    #[test]
    fn commit_of_unaligned_range_fails() {
        let mut mem = MmapMemory::new();
        let page = mem.stats().page_size;
        let base = mem.reserve(4 * page).unwrap();
        let odd = NonNull::new(base.as_ptr().wrapping_add(1)).unwrap();
        assert!(matches!(
            mem.commit(odd, page),
            Err(MemoryError::Commit { .. })
        ));
        mem.release(base, 4 * page).unwrap();
    }
}
