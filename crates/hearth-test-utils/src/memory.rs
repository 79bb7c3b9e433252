//! A fake virtual-memory backend for arena tests.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::ptr::NonNull;
use std::rc::Rc;

use hearth_core::{MemoryError, MemoryStats, VirtualMemory};

/// First fake address handed out.
const FIRST_ADDR: usize = 0x1000_0000;

/// Call counters shared between a [`RecordingMemory`] and its observers.
///
/// Clones see the same counts, so a test can keep one after the memory
/// has been moved into (and dropped with) an arena forest.
#[derive(Clone, Debug, Default)]
pub struct MemoryLog {
    reserve: Rc<Cell<usize>>,
    commit: Rc<Cell<usize>>,
    decommit: Rc<Cell<usize>>,
    release: Rc<Cell<usize>>,
}

impl MemoryLog {
    pub fn reserve_calls(&self) -> usize {
        self.reserve.get()
    }

    pub fn commit_calls(&self) -> usize {
        self.commit.get()
    }

    pub fn decommit_calls(&self) -> usize {
        self.decommit.get()
    }

    pub fn release_calls(&self) -> usize {
        self.release.get()
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

struct Reservation {
    size: usize,
    /// Indices of committed pages, relative to the reservation base.
    pages: BTreeSet<usize>,
}

/// [`VirtualMemory`] over fake addresses.
///
/// Nothing is ever mapped: returned pointers carry no provenance and must
/// not be dereferenced. Reservations are laid out at granularity-aligned
/// addresses with a guard gap between them. Commit, decommit and release
/// are checked against the live reservations and fail with a descriptive
/// error when the caller breaks the contract.
pub struct RecordingMemory {
    page_size: usize,
    granularity: usize,
    next_addr: usize,
    reservations: BTreeMap<usize, Reservation>,
    log: MemoryLog,
    fail_reserve: bool,
    fail_commit: bool,
}

impl RecordingMemory {
    /// 4 KiB pages, 64 KiB granularity.
    pub fn new() -> Self {
        Self::with_units(4096, 65536)
    }

    /// Custom page size and allocation granularity (both powers of two,
    /// granularity a multiple of the page size).
    pub fn with_units(page_size: usize, granularity: usize) -> Self {
        Self {
            page_size,
            granularity,
            next_addr: FIRST_ADDR,
            reservations: BTreeMap::new(),
            log: MemoryLog::default(),
            fail_reserve: false,
            fail_commit: false,
        }
    }

    /// Make the next `reserve` fail.
    pub fn fail_next_reserve(&mut self) {
        self.fail_reserve = true;
    }

    /// Make the next `commit` fail.
    pub fn fail_next_commit(&mut self) {
        self.fail_commit = true;
    }

    /// A handle on the call counters that outlives this backend.
    pub fn counters(&self) -> MemoryLog {
        self.log.clone()
    }

    pub fn reserve_calls(&self) -> usize {
        self.log.reserve_calls()
    }

    pub fn commit_calls(&self) -> usize {
        self.log.commit_calls()
    }

    pub fn decommit_calls(&self) -> usize {
        self.log.decommit_calls()
    }

    pub fn release_calls(&self) -> usize {
        self.log.release_calls()
    }

    /// Bytes currently committed across all reservations.
    pub fn committed_bytes(&self) -> usize {
        self.reservations
            .values()
            .map(|r| r.pages.len() * self.page_size)
            .sum()
    }

    /// `(base, size)` of every live reservation, lowest address first.
    pub fn live_reservations(&self) -> Vec<(usize, usize)> {
        self.reservations
            .iter()
            .map(|(base, r)| (*base, r.size))
            .collect()
    }

    /// Find the reservation holding `[addr, addr + size)` and return its
    /// base plus the page range the request covers.
    fn locate(&self, addr: usize, size: usize) -> Option<(usize, std::ops::Range<usize>)> {
        if size == 0 || addr % self.page_size != 0 {
            return None;
        }
        let (base, reservation) = self.reservations.range(..=addr).next_back()?;
        let end = addr.checked_add(size)?;
        if end > base + reservation.size {
            return None;
        }
        let first = (addr - base) / self.page_size;
        let last = (end - base).div_ceil(self.page_size);
        Some((*base, first..last))
    }
}

impl Default for RecordingMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMemory for RecordingMemory {
    fn reserve(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        bump(&self.log.reserve);
        if std::mem::take(&mut self.fail_reserve) {
            return Err(MemoryError::Reserve {
                size,
                reason: "injected failure".into(),
            });
        }
        let span = size
            .checked_next_multiple_of(self.granularity)
            .and_then(|s| s.checked_add(self.granularity));
        let (Some(span), Some(ptr)) = (
            span,
            NonNull::new(std::ptr::without_provenance_mut::<u8>(self.next_addr)),
        ) else {
            return Err(MemoryError::Reserve {
                size,
                reason: "fake address space exhausted".into(),
            });
        };
        self.reservations.insert(
            self.next_addr,
            Reservation {
                size,
                pages: BTreeSet::new(),
            },
        );
        self.next_addr += span;
        Ok(ptr)
    }

    fn commit(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        bump(&self.log.commit);
        if std::mem::take(&mut self.fail_commit) {
            return Err(MemoryError::Commit {
                size,
                reason: "injected failure".into(),
            });
        }
        let Some((base, pages)) = self.locate(ptr.as_ptr() as usize, size) else {
            return Err(MemoryError::Commit {
                size,
                reason: "range outside any reservation".into(),
            });
        };
        if let Some(reservation) = self.reservations.get_mut(&base) {
            reservation.pages.extend(pages);
        }
        Ok(())
    }

    fn decommit(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        bump(&self.log.decommit);
        let Some((base, pages)) = self.locate(ptr.as_ptr() as usize, size) else {
            return Err(MemoryError::Decommit {
                size,
                reason: "range outside any reservation".into(),
            });
        };
        if let Some(reservation) = self.reservations.get_mut(&base) {
            for page in pages {
                reservation.pages.remove(&page);
            }
        }
        Ok(())
    }

    fn release(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        bump(&self.log.release);
        let base = ptr.as_ptr() as usize;
        match self.reservations.get(&base) {
            Some(reservation) if reservation.size == size => {
                self.reservations.remove(&base);
                Ok(())
            }
            Some(reservation) => Err(MemoryError::Release {
                size,
                reason: format!("reservation is {} bytes", reservation.size),
            }),
            None => Err(MemoryError::Release {
                size,
                reason: "not a reservation base".into(),
            }),
        }
    }

    fn stats(&self) -> MemoryStats {
        MemoryStats {
            page_size: self.page_size,
            allocation_granularity: self.granularity,
            total_physical: 1 << 30,
            available_physical: 1 << 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_are_granularity_aligned_and_disjoint() {
        let mut mem = RecordingMemory::new();
        let a = mem.reserve(100).unwrap().as_ptr() as usize;
        let b = mem.reserve(65536).unwrap().as_ptr() as usize;
        assert_eq!(a % 65536, 0);
        assert_eq!(b % 65536, 0);
        assert!(b >= a + 65536);
        assert_eq!(mem.live_reservations(), vec![(a, 100), (b, 65536)]);
    }

    #[test]
    fn commit_tracks_pages() {
        let mut mem = RecordingMemory::new();
        let base = mem.reserve(65536).unwrap();
        mem.commit(base, 5000).unwrap();
        assert_eq!(mem.committed_bytes(), 8192);
        mem.decommit(base, 4096).unwrap();
        assert_eq!(mem.committed_bytes(), 4096);
        assert_eq!(mem.commit_calls(), 1);
        assert_eq!(mem.decommit_calls(), 1);
    }

    #[test]
    fn commit_outside_reservation_fails() {
        let mut mem = RecordingMemory::new();
        let base = mem.reserve(4096).unwrap();
        assert!(mem.commit(base, 8192).is_err());
        let stray = NonNull::new(std::ptr::without_provenance_mut::<u8>(0x10)).unwrap();
        assert!(mem.commit(stray, 4096).is_err());
    }

    #[test]
    fn release_requires_matching_size() {
        let mut mem = RecordingMemory::new();
        let base = mem.reserve(4096).unwrap();
        assert!(mem.release(base, 8192).is_err());
        mem.release(base, 4096).unwrap();
        assert!(mem.live_reservations().is_empty());
        assert!(mem.release(base, 4096).is_err());
        assert_eq!(mem.release_calls(), 3);
    }

    #[test]
    fn injected_failures_fire_once() {
        let mut mem = RecordingMemory::new();
        mem.fail_next_reserve();
        assert!(mem.reserve(4096).is_err());
        let base = mem.reserve(4096).unwrap();
        mem.fail_next_commit();
        assert!(mem.commit(base, 4096).is_err());
        assert!(mem.commit(base, 4096).is_ok());
    }

    #[test]
    fn counters_outlive_backend() {
        let mem = RecordingMemory::new();
        let log = mem.counters();
        let mut mem = mem;
        mem.reserve(1).unwrap();
        drop(mem);
        assert_eq!(log.reserve_calls(), 1);
    }
}
