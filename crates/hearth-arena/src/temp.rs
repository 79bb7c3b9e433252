//! Scoped temporary allocation.

use std::ops::{Deref, DerefMut};

use hearth_core::VirtualMemory;

use crate::forest::ArenaForest;
use crate::id::ArenaMarker;

/// A temp scope over one bump or stack arena.
///
/// Created by [`ArenaForest::begin_temp`]. While the guard lives it
/// stands in for the forest, so allocations go through it as usual.
/// Dropping the guard rewinds the arena to where it was when the scope
/// opened, on every exit path including early returns and unwinding.
///
/// ```ignore
/// let mut temp = forest.begin_temp(frame)?;
/// let scratch = temp.alloc(frame, 4096)?;
/// // ... use scratch ...
/// drop(temp); // frame is back to its previous offset
/// ```
pub struct TempArena<'a, M: VirtualMemory> {
    forest: &'a mut ArenaForest<M>,
    marker: ArenaMarker,
}

impl<'a, M: VirtualMemory> TempArena<'a, M> {
    pub(crate) fn new(forest: &'a mut ArenaForest<M>, marker: ArenaMarker) -> Self {
        Self { forest, marker }
    }

    /// The rewind point captured when the scope opened.
    pub fn marker(&self) -> ArenaMarker {
        self.marker
    }
}

impl<M: VirtualMemory> Deref for TempArena<'_, M> {
    type Target = ArenaForest<M>;

    fn deref(&self) -> &Self::Target {
        self.forest
    }
}

impl<M: VirtualMemory> DerefMut for TempArena<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.forest
    }
}

impl<M: VirtualMemory> Drop for TempArena<'_, M> {
    fn drop(&mut self) {
        self.forest.end_temp(self.marker);
    }
}

#[cfg(test)]
mod tests {
    use crate::{ArenaForest, RootConfig};
    use hearth_test_utils::RecordingMemory;

    #[test]
    fn marker_records_scope_entry() {
        let mut forest = ArenaForest::new(RecordingMemory::new());
        let root = forest.create_virtual(&RootConfig::default()).unwrap();
        let bump = forest.create_bump(root, 128, 8).unwrap();
        forest.alloc(bump, 24).unwrap();
        let temp = forest.begin_temp(bump).unwrap();
        assert_eq!(temp.marker().arena(), bump);
        assert_eq!(temp.marker().offset(), 24);
    }

    #[test]
    fn explicit_drop_rewinds() {
        let mut forest = ArenaForest::new(RecordingMemory::new());
        let root = forest.create_virtual(&RootConfig::default()).unwrap();
        let stack = forest.create_stack(root, 128, 8).unwrap();
        let mut temp = forest.begin_temp(stack).unwrap();
        temp.alloc(stack, 100).unwrap();
        drop(temp);
        assert_eq!(forest.used(stack), Some(0));
        assert_eq!(forest.peak_used(stack), Some(100));
    }
}
