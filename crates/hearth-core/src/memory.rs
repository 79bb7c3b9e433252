//! The virtual-memory contract consumed by the arena system.
//!
//! A [`VirtualMemory`] backend hands out address space in two steps:
//! [`reserve`](VirtualMemory::reserve) claims a range with no physical
//! backing, and [`commit`](VirtualMemory::commit) backs a sub-range with
//! readable/writable memory. Only the root arena talks to a backend;
//! every other arena is carved out of memory the root already owns.

use std::error::Error;
use std::fmt;
use std::ptr::NonNull;

/// Page and physical-memory information reported by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryStats {
    /// OS page size in bytes (commit unit).
    pub page_size: usize,
    /// Allocation granularity in bytes (reserve unit).
    pub allocation_granularity: usize,
    /// Total physical memory in bytes, or 0 if unknown.
    pub total_physical: usize,
    /// Currently available physical memory in bytes, or 0 if unknown.
    pub available_physical: usize,
}

/// Errors reported by a [`VirtualMemory`] backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryError {
    /// Address space could not be reserved.
    Reserve {
        /// Bytes requested.
        size: usize,
        /// OS-provided description.
        reason: String,
    },
    /// A reserved range could not be committed.
    Commit {
        /// Bytes requested.
        size: usize,
        /// OS-provided description.
        reason: String,
    },
    /// A committed range could not be decommitted.
    Decommit {
        /// Bytes requested.
        size: usize,
        /// OS-provided description.
        reason: String,
    },
    /// A reservation could not be released.
    Release {
        /// Bytes in the reservation.
        size: usize,
        /// OS-provided description.
        reason: String,
    },
    /// The backend does not support the requested operation or range.
    Unsupported {
        /// What was attempted.
        operation: &'static str,
    },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reserve { size, reason } => {
                write!(f, "failed to reserve {size} bytes: {reason}")
            }
            Self::Commit { size, reason } => {
                write!(f, "failed to commit {size} bytes: {reason}")
            }
            Self::Decommit { size, reason } => {
                write!(f, "failed to decommit {size} bytes: {reason}")
            }
            Self::Release { size, reason } => {
                write!(f, "failed to release {size} bytes: {reason}")
            }
            Self::Unsupported { operation } => {
                write!(f, "memory operation not supported: {operation}")
            }
        }
    }
}

impl Error for MemoryError {}

/// Reserve/commit virtual memory primitives of the host OS.
///
/// # Contract
///
/// - `reserve(size)` returns the base of `size` bytes of address space.
///   Nothing in the range is accessible until committed.
/// - `commit(ptr, size)` makes `[ptr, ptr + size)` readable and writable.
///   The range must lie inside a live reservation.
/// - `decommit(ptr, size)` drops the physical backing but keeps the
///   reservation valid for a later commit.
/// - `release(ptr, size)` ends the reservation; `ptr` must be a base
///   previously returned by `reserve` with the same `size`.
///
/// Backends are used from a single thread; methods take `&mut self`.
pub trait VirtualMemory {
    /// Reserve `size` bytes of address space.
    fn reserve(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError>;

    /// Back `[ptr, ptr + size)` with physical memory.
    fn commit(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError>;

    /// Drop the physical backing of `[ptr, ptr + size)`.
    fn decommit(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError>;

    /// Release a whole reservation.
    fn release(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError>;

    /// Page size, granularity and physical memory totals.
    fn stats(&self) -> MemoryStats;
}
