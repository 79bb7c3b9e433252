//! Arena identifiers and rewind markers.

use std::fmt;

use hearth_core::ArenaHandle;

/// Generation-checked reference to an arena in an
/// [`ArenaForest`](crate::ArenaForest).
///
/// Destroying an arena bumps its slot's generation, so an id held past
/// destruction resolves to nothing instead of to whatever arena reuses
/// the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ArenaId {
    /// Slot index within the forest.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at creation.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl From<ArenaId> for ArenaHandle {
    fn from(id: ArenaId) -> Self {
        ArenaHandle {
            index: id.index,
            generation: id.generation,
        }
    }
}

/// A handle from module code names an arena only if its generation
/// still matches; the null handle never does.
impl From<ArenaHandle> for ArenaId {
    fn from(handle: ArenaHandle) -> Self {
        Self {
            index: handle.index,
            generation: handle.generation,
        }
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena#{}.{}", self.index, self.generation)
    }
}

/// Snapshot of an arena's offset, used to rewind it.
///
/// Taken by [`ArenaForest::mark`](crate::ArenaForest::mark) on stack
/// arenas, or internally by temp scopes on bump arenas. Only valid for
/// the arena it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct ArenaMarker {
    pub(crate) arena: ArenaId,
    pub(crate) offset: usize,
}

impl ArenaMarker {
    /// Rebuild a marker from an offset recorded earlier, e.g. one that
    /// crossed the module ABI. The forest validates it on use.
    pub fn new(arena: ArenaId, offset: usize) -> Self {
        Self { arena, offset }
    }

    /// The arena this marker belongs to.
    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    /// Recorded offset in bytes from the arena's base.
    pub fn offset(&self) -> usize {
        self.offset
    }
}
