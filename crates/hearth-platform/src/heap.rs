//! Reserve/commit emulated on the global allocator.
//!
//! For targets without virtual memory. A reservation is a real, zeroed
//! heap allocation made up front, so commit and decommit have nothing to
//! do beyond checking that the range belongs to a live reservation.

use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::ptr::NonNull;

use hearth_core::{MemoryError, MemoryStats, VirtualMemory, KIB};

/// Page size reported by the emulated backend.
pub const HEAP_PAGE_SIZE: usize = 64 * KIB;

/// [`VirtualMemory`] backed by `std::alloc`.
///
/// Reservations are aligned to [`HEAP_PAGE_SIZE`]. Releasing an address
/// this backend did not hand out is reported as an error rather than
/// passed to the allocator.
#[derive(Debug, Default)]
pub struct HeapMemory {
    /// Live reservations by base address.
    live: BTreeMap<usize, (NonNull<u8>, Layout)>,
}

impl HeapMemory {
    /// Create a backend with no reservations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held across all live reservations.
    pub fn reserved_bytes(&self) -> usize {
        self.live.values().map(|(_, layout)| layout.size()).sum()
    }

    fn check_range(&self, ptr: NonNull<u8>, size: usize) -> bool {
        let addr = ptr.as_ptr() as usize;
        self.live
            .range(..=addr)
            .next_back()
            .is_some_and(|(base, (_, layout))| {
                addr.checked_add(size)
                    .is_some_and(|end| end <= base + layout.size())
            })
    }
}

impl VirtualMemory for HeapMemory {
    #[allow(unsafe_code)]
    fn reserve(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        if size == 0 {
            return Err(MemoryError::Unsupported {
                operation: "reserve of zero bytes",
            });
        }
        let layout =
            Layout::from_size_align(size, HEAP_PAGE_SIZE).map_err(|e| MemoryError::Reserve {
                size,
                reason: e.to_string(),
            })?;
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            tracing::error!(size, "Heap reservation failed");
            return Err(MemoryError::Reserve {
                size,
                reason: "allocator returned null".into(),
            });
        };
        self.live.insert(ptr.as_ptr() as usize, (ptr, layout));
        Ok(ptr)
    }

    fn commit(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        if self.check_range(ptr, size) {
            Ok(())
        } else {
            Err(MemoryError::Commit {
                size,
                reason: "range outside any reservation".into(),
            })
        }
    }

    fn decommit(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        if self.check_range(ptr, size) {
            Ok(())
        } else {
            Err(MemoryError::Decommit {
                size,
                reason: "range outside any reservation".into(),
            })
        }
    }

    #[allow(unsafe_code)]
    fn release(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        let addr = ptr.as_ptr() as usize;
        match self.live.get(&addr) {
            Some(&(base, layout)) if layout.size() == size => {
                self.live.remove(&addr);
                // SAFETY: `base` came from `alloc_zeroed` with `layout` and
                // is removed from the live set, so it is freed once.
                unsafe { alloc::dealloc(base.as_ptr(), layout) };
                Ok(())
            }
            Some((_, layout)) => Err(MemoryError::Release {
                size,
                reason: format!("reservation is {} bytes", layout.size()),
            }),
            None => Err(MemoryError::Release {
                size,
                reason: "not a reservation base".into(),
            }),
        }
    }

    fn stats(&self) -> MemoryStats {
        MemoryStats {
            page_size: HEAP_PAGE_SIZE,
            allocation_granularity: HEAP_PAGE_SIZE,
            total_physical: 0,
            available_physical: 0,
        }
    }
}

impl Drop for HeapMemory {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        for (addr, (ptr, layout)) in std::mem::take(&mut self.live) {
            tracing::warn!(addr, size = layout.size(), "Heap reservation leaked until drop");
            // SAFETY: every live entry is an unreleased `alloc_zeroed`
            // result with its layout.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_are_page_aligned() {
        let mut mem = HeapMemory::new();
        let base = mem.reserve(100).unwrap();
        assert_eq!(base.as_ptr() as usize % HEAP_PAGE_SIZE, 0);
        assert_eq!(mem.reserved_bytes(), 100);
        mem.release(base, 100).unwrap();
        assert_eq!(mem.reserved_bytes(), 0);
    }

    #[test]
    fn commit_checks_bounds() {
        let mut mem = HeapMemory::new();
        let base = mem.reserve(HEAP_PAGE_SIZE).unwrap();
        assert!(mem.commit(base, HEAP_PAGE_SIZE).is_ok());
        assert!(mem.commit(base, HEAP_PAGE_SIZE + 1).is_err());
        assert!(mem.decommit(base, 1).is_ok());
        mem.release(base, HEAP_PAGE_SIZE).unwrap();
        assert!(mem.commit(base, 1).is_err());
    }

    #[test]
    fn release_rejects_mismatched_size_and_double_free() {
        let mut mem = HeapMemory::new();
        let base = mem.reserve(4096).unwrap();
        assert!(mem.release(base, 8192).is_err());
        assert!(mem.release(base, 4096).is_ok());
        assert!(mem.release(base, 4096).is_err());
    }

    #[test]
    fn reports_64k_pages() {
        let stats = HeapMemory::new().stats();
        assert_eq!(stats.page_size, 65536);
        assert_eq!(stats.allocation_granularity, 65536);
    }
}
