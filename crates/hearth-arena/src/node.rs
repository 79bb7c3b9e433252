//! Arena nodes: discipline tags, per-discipline cursors and stats.

use std::fmt;
use std::ptr::NonNull;

use smallvec::SmallVec;

use crate::id::ArenaId;

/// Allocation discipline of an arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Discipline {
    /// OS-backed root with reserve/commit growth.
    VirtualRoot,
    /// Linear, append-only; reclaimed by reset.
    Bump,
    /// Linear with mark/pop rewind.
    Stack,
    /// Fixed-size block pool. Not implemented.
    BlockPool,
    /// Size-class pool. Not implemented.
    MultiPool,
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VirtualRoot => "virtual root",
            Self::Bump => "bump",
            Self::Stack => "stack",
            Self::BlockPool => "block pool",
            Self::MultiPool => "multi pool",
        })
    }
}

/// Reserve/commit bookkeeping of a virtual root.
///
/// `committed` is measured from the raw reservation base, so it includes
/// the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RootCursor {
    pub(crate) offset: usize,
    pub(crate) reserve_bytes: usize,
    pub(crate) committed: usize,
    pub(crate) granularity: usize,
}

/// Discipline-specific allocation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Cursor {
    Root(RootCursor),
    Bump { offset: usize },
    Stack { offset: usize, stack_peak: usize },
}

impl Cursor {
    pub(crate) fn discipline(&self) -> Discipline {
        match self {
            Self::Root(_) => Discipline::VirtualRoot,
            Self::Bump { .. } => Discipline::Bump,
            Self::Stack { .. } => Discipline::Stack,
        }
    }

    /// Bytes consumed from the usable region, padding included.
    pub(crate) fn offset(&self) -> usize {
        match self {
            Self::Root(root) => root.offset,
            Self::Bump { offset } | Self::Stack { offset, .. } => *offset,
        }
    }
}

/// One arena in the forest.
///
/// Addresses are kept as `raw_base` plus offsets so the arena never needs
/// to turn an integer back into a pointer.
pub(crate) struct ArenaNode {
    pub(crate) cursor: Cursor,
    /// Start of the block holding header and usable region.
    pub(crate) raw_base: NonNull<u8>,
    /// Distance from `raw_base` to the aligned usable base.
    pub(crate) base_offset: usize,
    /// Where this arena's block starts inside the parent's usable region.
    pub(crate) block_offset: usize,
    pub(crate) size: usize,
    pub(crate) used: usize,
    pub(crate) peak_used: usize,
    pub(crate) alignment: usize,
    pub(crate) parent: Option<ArenaId>,
    pub(crate) children: SmallVec<[ArenaId; 4]>,
    pub(crate) debug_name: Option<String>,
}

impl ArenaNode {
    pub(crate) fn discipline(&self) -> Discipline {
        self.cursor.discipline()
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        offset_ptr(self.raw_base, self.base_offset)
    }

    /// Absolute address of the usable region at `offset`.
    pub(crate) fn addr_at(&self, offset: usize) -> usize {
        self.raw_base.as_ptr() as usize + self.base_offset + offset
    }

    /// Record a new offset, keeping `used` and both peaks in step.
    pub(crate) fn advance_to(&mut self, offset: usize) {
        match &mut self.cursor {
            Cursor::Root(root) => root.offset = offset,
            Cursor::Bump { offset: cur } => *cur = offset,
            Cursor::Stack {
                offset: cur,
                stack_peak,
            } => {
                *cur = offset;
                *stack_peak = (*stack_peak).max(offset);
            }
        }
        self.used = offset;
        self.peak_used = self.peak_used.max(offset);
    }

    /// Move the offset back. Peaks are left alone.
    pub(crate) fn rewind_to(&mut self, offset: usize) {
        match &mut self.cursor {
            Cursor::Root(root) => root.offset = offset,
            Cursor::Bump { offset: cur } | Cursor::Stack { offset: cur, .. } => *cur = offset,
        }
        self.used = offset;
    }

    pub(crate) fn stats(&self, id: ArenaId) -> ArenaStats {
        let (stack_peak, committed) = match &self.cursor {
            Cursor::Root(root) => (None, Some(root.committed)),
            Cursor::Stack { stack_peak, .. } => (Some(*stack_peak), None),
            Cursor::Bump { .. } => (None, None),
        };
        ArenaStats {
            id,
            discipline: self.discipline(),
            base: self.base(),
            size: self.size,
            used: self.used,
            peak_used: self.peak_used,
            alignment: self.alignment,
            stack_peak,
            committed,
            children: self.children.len(),
            parent: self.parent,
            debug_name: self.debug_name.clone(),
        }
    }
}

/// Offset a pointer without leaving its allocation's provenance.
pub(crate) fn offset_ptr(ptr: NonNull<u8>, offset: usize) -> NonNull<u8> {
    NonNull::new(ptr.as_ptr().wrapping_add(offset)).unwrap_or(ptr)
}

/// Point-in-time snapshot of one arena.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaStats {
    /// The arena described.
    pub id: ArenaId,
    /// Its discipline.
    pub discipline: Discipline,
    /// Aligned base of the usable region.
    pub base: NonNull<u8>,
    /// Usable size in bytes.
    pub size: usize,
    /// Bytes consumed, alignment padding included.
    pub used: usize,
    /// High-water mark of `used`. Survives reset.
    pub peak_used: usize,
    /// Default alignment for [`ArenaForest::alloc`](crate::ArenaForest::alloc).
    pub alignment: usize,
    /// Stack arenas only: high-water mark of the stack offset.
    pub stack_peak: Option<usize>,
    /// Virtual roots only: bytes committed, header included.
    pub committed: Option<usize>,
    /// Number of direct children.
    pub children: usize,
    /// Parent arena, `None` for roots.
    pub parent: Option<ArenaId>,
    /// Diagnostic name, if set.
    pub debug_name: Option<String>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn bump_node(size: usize) -> ArenaNode {
        ArenaNode {
            cursor: Cursor::Bump { offset: 0 },
            raw_base: NonNull::dangling(),
            base_offset: 0,
            block_offset: 0,
            size,
            used: 0,
            peak_used: 0,
            alignment: 1,
            parent: None,
            children: SmallVec::new(),
            debug_name: None,
        }
    }

    #[test]
    fn rewind_keeps_peaks() {
        let mut node = bump_node(64);
        node.cursor = Cursor::Stack {
            offset: 0,
            stack_peak: 0,
        };
        node.advance_to(40);
        node.rewind_to(8);
        assert_eq!(node.used, 8);
        assert_eq!(node.peak_used, 40);
        assert_eq!(
            node.cursor,
            Cursor::Stack {
                offset: 8,
                stack_peak: 40
            }
        );
    }

    #[test]
    fn stats_report_discipline_specific_fields() {
        let node = bump_node(32);
        let id = ArenaId {
            index: 0,
            generation: 0,
        };
        let stats = node.stats(id);
        assert_eq!(stats.discipline, Discipline::Bump);
        assert_eq!(stats.stack_peak, None);
        assert_eq!(stats.committed, None);
        assert_eq!(stats.size, 32);
    }

    #[test]
    fn discipline_display() {
        assert_eq!(Discipline::BlockPool.to_string(), "block pool");
        assert_eq!(Discipline::VirtualRoot.to_string(), "virtual root");
    }
}
