//! The arena forest: creation, allocation, rewind and destruction.

use std::mem;
use std::ptr::NonNull;

use hearth_core::align::DEFAULT_ALIGNMENT;
use hearth_core::{align_up, is_power_of_two, VirtualMemory};
use smallvec::SmallVec;

use crate::config::{RootConfig, HEADER_BYTES};
use crate::error::ArenaError;
use crate::id::{ArenaId, ArenaMarker};
use crate::node::{offset_ptr, ArenaNode, ArenaStats, Cursor, Discipline, RootCursor};
use crate::table::ArenaTable;
use crate::temp::TempArena;

/// Owner of every arena tree backed by one [`VirtualMemory`] backend.
///
/// Arenas are addressed by [`ArenaId`]. Children record their parent by
/// id and parents list their children by id, so destroying a subtree is
/// a walk over ids rather than over raw links.
///
/// Failed operations never change state: allocations that do not fit,
/// rejected markers and bad parameters all return an [`ArenaError`] and
/// leave every arena as it was.
///
/// Dropping the forest destroys every remaining root, releasing its
/// reservation.
pub struct ArenaForest<M: VirtualMemory> {
    memory: M,
    table: ArenaTable,
}

impl<M: VirtualMemory> ArenaForest<M> {
    /// Create an empty forest over `memory`.
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            table: ArenaTable::new(),
        }
    }

    /// The memory backend.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// The memory backend, mutably.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    // ── Creation ────────────────────────────────────────────────

    /// Reserve address space and create a virtual root arena.
    ///
    /// `reserve_bytes` is rounded up to the allocation granularity and
    /// `commit_bytes` (one granularity unit when zero) up to the page
    /// size. The header lives at the start of the reservation, so the
    /// usable size is the rounded reservation minus [`HEADER_BYTES`].
    ///
    /// If the initial commit fails the reservation is released before
    /// the error is returned.
    pub fn create_virtual(&mut self, config: &RootConfig) -> Result<ArenaId, ArenaError> {
        if config.reserve_bytes == 0 {
            return Err(ArenaError::ZeroSize);
        }
        let stats = self.memory.stats();
        let granularity = stats.allocation_granularity;
        let page_size = stats.page_size;

        let reserve_bytes =
            align_up(config.reserve_bytes, granularity).ok_or(ArenaError::SizeOverflow)?;
        if reserve_bytes <= HEADER_BYTES {
            tracing::error!(reserve_bytes, "Root reservation cannot hold its header");
            return Err(ArenaError::TooSmall {
                requested: reserve_bytes,
                minimum: HEADER_BYTES + 1,
            });
        }
        let commit_request = if config.commit_bytes == 0 {
            granularity
        } else {
            config.commit_bytes
        };
        let commit_bytes = align_up(commit_request, page_size)
            .ok_or(ArenaError::SizeOverflow)?
            .min(reserve_bytes);

        let raw_base = self.memory.reserve(reserve_bytes).map_err(|e| {
            tracing::error!(reserve_bytes, error = %e, "Failed to reserve root arena");
            e
        })?;
        if let Err(e) = self.memory.commit(raw_base, commit_bytes) {
            tracing::error!(commit_bytes, error = %e, "Failed to commit root arena");
            if let Err(release) = self.memory.release(raw_base, reserve_bytes) {
                tracing::error!(error = %release, "Failed to release root reservation");
            }
            return Err(e.into());
        }

        let id = self.table.insert(ArenaNode {
            cursor: Cursor::Root(RootCursor {
                offset: 0,
                reserve_bytes,
                committed: commit_bytes,
                granularity,
            }),
            raw_base,
            base_offset: HEADER_BYTES,
            block_offset: 0,
            size: reserve_bytes - HEADER_BYTES,
            used: 0,
            peak_used: 0,
            alignment: DEFAULT_ALIGNMENT,
            parent: None,
            children: SmallVec::new(),
            debug_name: None,
        });
        tracing::info!(
            arena = %id,
            reserve_kib = reserve_bytes / 1024,
            commit_kib = commit_bytes / 1024,
            "Virtual arena created"
        );
        Ok(id)
    }

    /// Create a bump arena of `size` usable bytes inside `parent`.
    pub fn create_bump(
        &mut self,
        parent: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError> {
        self.create_child(parent, Discipline::Bump, size, alignment)
    }

    /// Create a stack arena of `size` usable bytes inside `parent`.
    pub fn create_stack(
        &mut self,
        parent: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError> {
        self.create_child(parent, Discipline::Stack, size, alignment)
    }

    /// Block pools are declared but not implemented.
    ///
    /// Always fails with [`ArenaError::NotImplemented`].
    pub fn create_block(
        &mut self,
        parent: ArenaId,
        block_size: usize,
        block_count: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError> {
        let size = block_size
            .checked_mul(block_count)
            .ok_or(ArenaError::SizeOverflow)?;
        self.create_child(parent, Discipline::BlockPool, size, alignment)
    }

    /// Multi-size-class pools are declared but not implemented.
    ///
    /// Always fails with [`ArenaError::NotImplemented`].
    pub fn create_multi_pool(
        &mut self,
        parent: ArenaId,
        total_size: usize,
    ) -> Result<ArenaId, ArenaError> {
        self.create_child(parent, Discipline::MultiPool, total_size, DEFAULT_ALIGNMENT)
    }

    /// Carve a child arena of `discipline` out of `parent`.
    ///
    /// The child's block is `HEADER_BYTES + size + alignment` bytes,
    /// allocated from the parent with the parent's own algorithm and
    /// default alignment. The usable base is the first `alignment`
    /// boundary after the header.
    ///
    /// Roots cannot be created here; use [`create_virtual`](Self::create_virtual).
    pub fn create_child(
        &mut self,
        parent: ArenaId,
        discipline: Discipline,
        size: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError> {
        let cursor = match discipline {
            Discipline::Bump => Cursor::Bump { offset: 0 },
            Discipline::Stack => Cursor::Stack {
                offset: 0,
                stack_peak: 0,
            },
            Discipline::VirtualRoot => {
                tracing::error!(%parent, "Virtual roots have no parent; use create_virtual");
                return Err(ArenaError::WrongDiscipline {
                    operation: "create_child",
                    discipline,
                });
            }
            Discipline::BlockPool | Discipline::MultiPool => {
                tracing::error!(%discipline, "Arena discipline not implemented");
                return Err(ArenaError::NotImplemented { discipline });
            }
        };
        validate_request(size, alignment)?;
        let parent_alignment = self.node(parent)?.alignment;
        let total = HEADER_BYTES
            .checked_add(size)
            .and_then(|n| n.checked_add(alignment))
            .ok_or(ArenaError::SizeOverflow)?;

        let (block_offset, raw_base) = self
            .place(parent, total, parent_alignment)
            .inspect_err(|e| {
                tracing::error!(%parent, total, error = %e, "Failed to carve child arena");
            })?;
        let raw_addr = raw_base.as_ptr() as usize;
        // `total` reserves `alignment` bytes of slack, so this cannot overflow
        // the block.
        let base_offset = align_up(raw_addr + HEADER_BYTES, alignment)
            .ok_or(ArenaError::SizeOverflow)?
            - raw_addr;

        let id = self.table.insert(ArenaNode {
            cursor,
            raw_base,
            base_offset,
            block_offset,
            size,
            used: 0,
            peak_used: 0,
            alignment,
            parent: Some(parent),
            children: SmallVec::new(),
            debug_name: None,
        });
        if let Some(parent_node) = self.table.get_mut(parent) {
            parent_node.children.insert(0, id);
        }
        tracing::debug!(arena = %id, %parent, %discipline, size, alignment, "Child arena created");
        Ok(id)
    }

    // ── Destruction ─────────────────────────────────────────────

    /// Destroy `id` and every arena below it.
    ///
    /// Children go first, then the arena unlinks from its parent. Only a
    /// virtual root hands memory back to the backend; child memory simply
    /// becomes free space in an ancestor. Returns the number of arenas
    /// destroyed.
    pub fn destroy(&mut self, id: ArenaId) -> Result<usize, ArenaError> {
        let parent = self.node(id)?.parent;
        let destroyed = self.destroy_subtree(id);
        if let Some(parent) = parent.and_then(|p| self.table.get_mut(p)) {
            parent.children.retain(|child| *child != id);
        }
        Ok(destroyed)
    }

    fn destroy_subtree(&mut self, id: ArenaId) -> usize {
        let children = match self.table.get_mut(id) {
            Some(node) => mem::take(&mut node.children),
            None => return 0,
        };
        let mut destroyed = 0;
        for child in children {
            destroyed += self.destroy_subtree(child);
        }
        let Some(node) = self.table.remove(id) else {
            return destroyed;
        };
        if let Cursor::Root(root) = node.cursor {
            match self.memory.release(node.raw_base, root.reserve_bytes) {
                Ok(()) => tracing::info!(arena = %id, "Virtual arena destroyed"),
                Err(e) => {
                    tracing::error!(arena = %id, error = %e, "Failed to release root reservation")
                }
            }
        }
        destroyed + 1
    }

    /// Destroy children whose block starts at or past `offset` in `id`.
    fn reclaim_children_from(&mut self, id: ArenaId, offset: usize) {
        let doomed: SmallVec<[ArenaId; 4]> = match self.table.get(id) {
            Some(node) => node
                .children
                .iter()
                .copied()
                .filter(|child| {
                    self.table
                        .get(*child)
                        .is_some_and(|c| c.block_offset >= offset)
                })
                .collect(),
            None => return,
        };
        for child in doomed {
            tracing::debug!(arena = %child, parent = %id, "Child arena reclaimed by rewind");
            // Child ids were just read from the table.
            let _ = self.destroy(child);
        }
    }

    // ── Allocation ──────────────────────────────────────────────

    /// Allocate `size` bytes at the arena's default alignment.
    pub fn alloc(&mut self, id: ArenaId, size: usize) -> Result<NonNull<u8>, ArenaError> {
        let alignment = self.node(id)?.alignment;
        self.alloc_aligned(id, size, alignment)
    }

    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// Roots commit more pages on demand up to their reservation; bump
    /// and stack arenas fail once their fixed size is exhausted.
    pub fn alloc_aligned(
        &mut self,
        id: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, ArenaError> {
        self.place(id, size, alignment).map(|(_, ptr)| ptr)
    }

    /// Allocate room for one `T`.
    ///
    /// The memory is uninitialised; writing through the pointer is the
    /// caller's business.
    pub fn alloc_type<T>(&mut self, id: ArenaId) -> Result<NonNull<T>, ArenaError> {
        self.alloc_aligned(id, mem::size_of::<T>(), mem::align_of::<T>())
            .map(NonNull::cast)
    }

    /// Allocate room for `count` consecutive `T`s.
    pub fn alloc_array<T>(&mut self, id: ArenaId, count: usize) -> Result<NonNull<T>, ArenaError> {
        let size = mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(ArenaError::SizeOverflow)?;
        self.alloc_aligned(id, size, mem::align_of::<T>())
            .map(NonNull::cast)
    }

    /// Shared placement: returns the allocation's offset in `id`'s usable
    /// region and its address.
    fn place(
        &mut self,
        id: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<(usize, NonNull<u8>), ArenaError> {
        validate_request(size, alignment)?;
        let node = self
            .table
            .get_mut(id)
            .ok_or(ArenaError::UnknownArena { id })?;

        let current = node.cursor.offset();
        let current_addr = node.addr_at(current);
        let aligned_addr = align_up(current_addr, alignment).ok_or(ArenaError::SizeOverflow)?;
        let start = current + (aligned_addr - current_addr);
        let end = start.checked_add(size).ok_or(ArenaError::SizeOverflow)?;
        let discipline = node.discipline();

        match &mut node.cursor {
            Cursor::Root(root) => {
                if end > node.size {
                    tracing::error!(
                        arena = %id,
                        requested_end = end,
                        capacity = node.size,
                        "Virtual arena out of address space"
                    );
                    return Err(ArenaError::OutOfAddressSpace {
                        id,
                        requested_end: end,
                        capacity: node.size,
                    });
                }
                let needed = HEADER_BYTES + end;
                if needed > root.committed {
                    let grow = align_up(needed - root.committed, root.granularity)
                        .ok_or(ArenaError::SizeOverflow)?
                        .min(root.reserve_bytes - root.committed);
                    let at = offset_ptr(node.raw_base, root.committed);
                    self.memory.commit(at, grow).map_err(|e| {
                        tracing::error!(arena = %id, grow, error = %e, "Failed to grow virtual arena");
                        e
                    })?;
                    root.committed += grow;
                    tracing::debug!(
                        arena = %id,
                        grow_kib = grow / 1024,
                        committed = root.committed,
                        "Virtual arena grew"
                    );
                }
            }
            Cursor::Bump { .. } | Cursor::Stack { .. } => {
                if end > node.size {
                    tracing::error!(
                        arena = %id,
                        %discipline,
                        requested_end = end,
                        capacity = node.size,
                        "Arena out of memory"
                    );
                    return Err(ArenaError::OutOfMemory {
                        id,
                        discipline,
                        requested_end: end,
                        capacity: node.size,
                    });
                }
            }
        }

        node.advance_to(end);
        Ok((start, offset_ptr(node.raw_base, node.base_offset + start)))
    }

    // ── Rewind ──────────────────────────────────────────────────

    /// Rewind a bump or stack arena to empty.
    ///
    /// Every outstanding allocation becomes invalid; nothing checks that
    /// callers stop using them. Child arenas carved from this arena are
    /// destroyed. `peak_used` and the stack peak are kept.
    ///
    /// Virtual roots are never reset: the call is refused with
    /// [`ArenaError::RootReset`].
    pub fn reset(&mut self, id: ArenaId) -> Result<(), ArenaError> {
        match self.node(id)?.discipline() {
            Discipline::VirtualRoot => {
                tracing::warn!(arena = %id, "Cannot reset virtual arena; roots are only destroyed");
                Err(ArenaError::RootReset { id })
            }
            Discipline::Bump | Discipline::Stack => {
                self.rewind(id, 0);
                Ok(())
            }
            discipline @ (Discipline::BlockPool | Discipline::MultiPool) => {
                Err(ArenaError::NotImplemented { discipline })
            }
        }
    }

    /// Snapshot a stack arena's offset.
    pub fn mark(&self, id: ArenaId) -> Result<ArenaMarker, ArenaError> {
        let node = self.node(id)?;
        match node.cursor {
            Cursor::Stack { offset, .. } => Ok(ArenaMarker { arena: id, offset }),
            _ => {
                let discipline = node.discipline();
                tracing::error!(arena = %id, %discipline, "mark is only valid on stack arenas");
                Err(ArenaError::WrongDiscipline {
                    operation: "mark",
                    discipline,
                })
            }
        }
    }

    /// Rewind a stack arena to `marker`.
    ///
    /// The marker must come from this arena and must not lie past the
    /// current offset. Child arenas carved after the marker are destroyed.
    pub fn pop_to(&mut self, id: ArenaId, marker: ArenaMarker) -> Result<(), ArenaError> {
        let node = self.node(id)?;
        if marker.arena != id {
            tracing::error!(arena = %id, marker_arena = %marker.arena, "Marker from another arena");
            return Err(ArenaError::ForeignMarker {
                marker_arena: marker.arena,
                arena: id,
            });
        }
        let Cursor::Stack { offset, .. } = node.cursor else {
            let discipline = node.discipline();
            tracing::error!(arena = %id, %discipline, "pop_to is only valid on stack arenas");
            return Err(ArenaError::WrongDiscipline {
                operation: "pop_to",
                discipline,
            });
        };
        if marker.offset > offset {
            tracing::error!(
                arena = %id,
                marker_offset = marker.offset,
                current_offset = offset,
                "Invalid marker: trying to pop to future offset"
            );
            return Err(ArenaError::FutureMarker {
                marker_offset: marker.offset,
                current_offset: offset,
            });
        }
        self.rewind(id, marker.offset);
        Ok(())
    }

    /// Open a temp scope on a bump or stack arena.
    ///
    /// The returned guard dereferences to this forest; when it drops,
    /// the arena is rewound to where it was when the scope opened.
    pub fn begin_temp(&mut self, id: ArenaId) -> Result<TempArena<'_, M>, ArenaError> {
        let marker = self.temp_marker(id)?;
        Ok(TempArena::new(self, marker))
    }

    /// Open a temp scope without a guard.
    ///
    /// The caller closes it with [`end_temp`](Self::end_temp). Used where
    /// the scope cannot borrow the forest, such as across the module ABI.
    pub fn temp_marker(&self, id: ArenaId) -> Result<ArenaMarker, ArenaError> {
        let node = self.node(id)?;
        match node.cursor {
            Cursor::Stack { .. } => self.mark(id),
            Cursor::Bump { offset } => Ok(ArenaMarker { arena: id, offset }),
            Cursor::Root(_) => {
                tracing::error!(arena = %id, "Temp scopes need a bump or stack arena");
                Err(ArenaError::WrongDiscipline {
                    operation: "begin_temp",
                    discipline: Discipline::VirtualRoot,
                })
            }
        }
    }

    /// Run `f` inside a temp scope on `id`.
    ///
    /// The rewind happens however `f` exits, unwinding included.
    pub fn with_temp<R>(
        &mut self,
        id: ArenaId,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ArenaError> {
        let mut temp = self.begin_temp(id)?;
        Ok(f(&mut temp))
    }

    /// Close a temp scope. [`TempArena`]'s drop calls this once per
    /// scope; scopes from [`temp_marker`](Self::temp_marker) call it
    /// themselves.
    ///
    /// A scope whose arena was destroyed, or rewound further than the
    /// marker, has nothing left to undo.
    pub fn end_temp(&mut self, marker: ArenaMarker) {
        let Some(node) = self.table.get(marker.arena) else {
            tracing::debug!(arena = %marker.arena, "Temp scope outlived its arena");
            return;
        };
        let cursor = node.cursor;
        match cursor {
            Cursor::Bump { offset } | Cursor::Stack { offset, .. } if marker.offset <= offset => {
                self.rewind(marker.arena, marker.offset);
            }
            _ => {}
        }
    }

    fn rewind(&mut self, id: ArenaId, offset: usize) {
        self.reclaim_children_from(id, offset);
        if let Some(node) = self.table.get_mut(id) {
            node.rewind_to(offset);
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    fn node(&self, id: ArenaId) -> Result<&ArenaNode, ArenaError> {
        self.table.get(id).ok_or(ArenaError::UnknownArena { id })
    }

    /// Whether `id` refers to a live arena.
    pub fn contains(&self, id: ArenaId) -> bool {
        self.table.get(id).is_some()
    }

    /// Number of live arenas across all trees.
    pub fn live_count(&self) -> usize {
        self.table.len()
    }

    /// Every live root.
    pub fn roots(&self) -> Vec<ArenaId> {
        self.table.roots()
    }

    /// Discipline of `id`.
    pub fn discipline(&self, id: ArenaId) -> Option<Discipline> {
        self.table.get(id).map(ArenaNode::discipline)
    }

    /// Bytes consumed in `id`, alignment padding included.
    pub fn used(&self, id: ArenaId) -> Option<usize> {
        self.table.get(id).map(|n| n.used)
    }

    /// High-water mark of [`used`](Self::used).
    pub fn peak_used(&self, id: ArenaId) -> Option<usize> {
        self.table.get(id).map(|n| n.peak_used)
    }

    /// Usable size of `id`.
    pub fn capacity(&self, id: ArenaId) -> Option<usize> {
        self.table.get(id).map(|n| n.size)
    }

    /// Aligned base address of `id`'s usable region.
    pub fn base(&self, id: ArenaId) -> Option<NonNull<u8>> {
        self.table.get(id).map(ArenaNode::base)
    }

    /// Parent of `id`; `None` for roots and unknown ids.
    pub fn parent(&self, id: ArenaId) -> Option<ArenaId> {
        self.table.get(id).and_then(|n| n.parent)
    }

    /// Direct children of `id`, most recent first.
    pub fn children(&self, id: ArenaId) -> Option<&[ArenaId]> {
        self.table.get(id).map(|n| n.children.as_slice())
    }

    /// Snapshot of `id`.
    pub fn stats(&self, id: ArenaId) -> Option<ArenaStats> {
        self.table.get(id).map(|n| n.stats(id))
    }

    /// Attach a diagnostic name to `id`.
    pub fn set_debug_name(
        &mut self,
        id: ArenaId,
        name: impl Into<String>,
    ) -> Result<(), ArenaError> {
        let node = self
            .table
            .get_mut(id)
            .ok_or(ArenaError::UnknownArena { id })?;
        node.debug_name = Some(name.into());
        Ok(())
    }
}

impl<M: VirtualMemory> Drop for ArenaForest<M> {
    fn drop(&mut self) {
        for root in self.table.roots() {
            self.destroy_subtree(root);
        }
    }
}

fn validate_request(size: usize, alignment: usize) -> Result<(), ArenaError> {
    if size == 0 {
        return Err(ArenaError::ZeroSize);
    }
    if !is_power_of_two(alignment) {
        return Err(ArenaError::InvalidAlignment { alignment });
    }
    Ok(())
}
