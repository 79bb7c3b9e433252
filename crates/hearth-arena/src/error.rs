//! Arena-specific error types.

use std::error::Error;
use std::fmt;

use hearth_core::MemoryError;

use crate::id::ArenaId;
use crate::node::Discipline;

/// Errors that can occur during arena operations.
///
/// Every error leaves the forest exactly as it was before the call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The id does not refer to a live arena (never valid, or destroyed).
    UnknownArena {
        /// The unresolvable id.
        id: ArenaId,
    },
    /// A zero-byte allocation or arena was requested.
    ZeroSize,
    /// Alignment is zero or not a power of two.
    InvalidAlignment {
        /// The rejected alignment.
        alignment: usize,
    },
    /// Size arithmetic overflowed the address space.
    SizeOverflow,
    /// A root reservation cannot hold even its own header.
    TooSmall {
        /// Bytes requested (after rounding).
        requested: usize,
        /// Smallest acceptable size.
        minimum: usize,
    },
    /// A bump or stack arena has no room for the request.
    OutOfMemory {
        /// The exhausted arena.
        id: ArenaId,
        /// Its discipline.
        discipline: Discipline,
        /// Offset the allocation would have ended at.
        requested_end: usize,
        /// Usable size of the arena.
        capacity: usize,
    },
    /// A root's reservation has no room for the request.
    OutOfAddressSpace {
        /// The exhausted root.
        id: ArenaId,
        /// Offset the allocation would have ended at.
        requested_end: usize,
        /// Usable size of the reservation.
        capacity: usize,
    },
    /// The memory backend failed.
    Memory(MemoryError),
    /// The discipline is declared but has no implementation.
    NotImplemented {
        /// The unimplemented discipline.
        discipline: Discipline,
    },
    /// The operation is not defined for the arena's discipline.
    WrongDiscipline {
        /// What was attempted.
        operation: &'static str,
        /// The arena's discipline.
        discipline: Discipline,
    },
    /// A virtual root cannot be reset; it is only ever destroyed.
    RootReset {
        /// The root.
        id: ArenaId,
    },
    /// The marker was taken from a different arena.
    ForeignMarker {
        /// Arena the marker belongs to.
        marker_arena: ArenaId,
        /// Arena it was applied to.
        arena: ArenaId,
    },
    /// The marker lies beyond the arena's current offset.
    FutureMarker {
        /// Offset recorded in the marker.
        marker_offset: usize,
        /// The arena's current offset.
        current_offset: usize,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownArena { id } => write!(f, "unknown arena: {id}"),
            Self::ZeroSize => write!(f, "zero-byte request"),
            Self::InvalidAlignment { alignment } => {
                write!(f, "alignment {alignment} is not a power of two")
            }
            Self::SizeOverflow => write!(f, "size arithmetic overflowed"),
            Self::TooSmall { requested, minimum } => {
                write!(f, "{requested} bytes is too small, minimum {minimum} bytes")
            }
            Self::OutOfMemory {
                id,
                discipline,
                requested_end,
                capacity,
            } => write!(
                f,
                "{discipline} {id} out of memory ({requested_end} / {capacity} bytes)"
            ),
            Self::OutOfAddressSpace {
                id,
                requested_end,
                capacity,
            } => write!(
                f,
                "virtual root {id} out of address space ({requested_end} / {capacity} bytes)"
            ),
            Self::Memory(e) => write!(f, "memory backend: {e}"),
            Self::NotImplemented { discipline } => {
                write!(f, "{discipline} arenas are not implemented")
            }
            Self::WrongDiscipline {
                operation,
                discipline,
            } => write!(f, "{operation} is not supported on {discipline} arenas"),
            Self::RootReset { id } => {
                write!(f, "cannot reset virtual root {id}; roots are only destroyed")
            }
            Self::ForeignMarker {
                marker_arena,
                arena,
            } => write!(f, "marker from {marker_arena} applied to {arena}"),
            Self::FutureMarker {
                marker_offset,
                current_offset,
            } => write!(
                f,
                "marker offset {marker_offset} is ahead of current offset {current_offset}"
            ),
        }
    }
}

impl Error for ArenaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Memory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MemoryError> for ArenaError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}
