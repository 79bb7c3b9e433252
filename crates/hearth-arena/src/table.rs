//! Slot + generation storage for arena nodes.
//!
//! Destroyed arenas leave their slot with a bumped generation, so stale
//! [`ArenaId`]s resolve to `None` rather than to a newer arena that
//! happens to reuse the slot.

use crate::id::ArenaId;
use crate::node::ArenaNode;

struct Slot {
    generation: u32,
    node: Option<ArenaNode>,
}

/// Flat table of arena nodes with a free list.
pub(crate) struct ArenaTable {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
}

impl ArenaTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    pub(crate) fn insert(&mut self, node: ArenaNode) -> ArenaId {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            ArenaId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            ArenaId {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn get(&self, id: ArenaId) -> Option<&ArenaNode> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: ArenaId) -> Option<&mut ArenaNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// Remove the node behind `id`.
    ///
    /// A slot whose generation wraps back to 0 is retired instead of
    /// recycled, so ids from its first epoch can never match again.
    pub(crate) fn remove(&mut self, id: ArenaId) -> Option<ArenaNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        self.live -= 1;
        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation != 0 {
            self.free_list.push(id.index);
        }
        Some(node)
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Ids of every live node without a parent.
    pub(crate) fn roots(&self) -> Vec<ArenaId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let node = slot.node.as_ref()?;
                node.parent.is_none().then_some(ArenaId {
                    index: index as u32,
                    generation: slot.generation,
                })
            })
            .collect()
    }
}
