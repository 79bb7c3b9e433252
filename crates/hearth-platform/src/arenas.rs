//! Arena services handed to modules.
//!
//! Module code reaches the host's [`ArenaForest`] through the
//! `extern "C"` callbacks in [`ArenaServices`]. The table carries a host
//! id rather than a pointer: callbacks resolve the id in a per-thread
//! registry, so a table used after its forest is gone, or from another
//! thread, fails the call instead of touching freed memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use hearth_arena::{ArenaError, ArenaForest, ArenaId, ArenaMarker};
use hearth_core::abi::{ArenaHandle, ArenaServices, INVALID_MARK};
use hearth_core::align::DEFAULT_ALIGNMENT;
use hearth_core::VirtualMemory;

/// The forest operations the callbacks need, independent of the
/// memory backend.
trait HostedForest {
    fn contains(&self, id: ArenaId) -> bool;
    fn create_bump(
        &mut self,
        parent: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError>;
    fn create_stack(
        &mut self,
        parent: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError>;
    fn create_block(
        &mut self,
        parent: ArenaId,
        block_size: usize,
        block_count: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError>;
    fn create_multi_pool(
        &mut self,
        parent: ArenaId,
        total_size: usize,
    ) -> Result<ArenaId, ArenaError>;
    fn destroy(&mut self, id: ArenaId) -> Result<usize, ArenaError>;
    fn alloc_aligned(
        &mut self,
        id: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, ArenaError>;
    fn reset(&mut self, id: ArenaId) -> Result<(), ArenaError>;
    fn used(&self, id: ArenaId) -> Option<usize>;
    fn peak_used(&self, id: ArenaId) -> Option<usize>;
    fn capacity(&self, id: ArenaId) -> Option<usize>;
    fn set_debug_name(&mut self, id: ArenaId, name: String) -> Result<(), ArenaError>;
    fn mark(&self, id: ArenaId) -> Result<ArenaMarker, ArenaError>;
    fn pop_to(&mut self, id: ArenaId, marker: ArenaMarker) -> Result<(), ArenaError>;
    fn temp_marker(&self, id: ArenaId) -> Result<ArenaMarker, ArenaError>;
    fn end_temp(&mut self, marker: ArenaMarker);
}

impl<M: VirtualMemory> HostedForest for ArenaForest<M> {
    fn contains(&self, id: ArenaId) -> bool {
        ArenaForest::contains(self, id)
    }

    fn create_bump(
        &mut self,
        parent: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError> {
        ArenaForest::create_bump(self, parent, size, alignment)
    }

    fn create_stack(
        &mut self,
        parent: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError> {
        ArenaForest::create_stack(self, parent, size, alignment)
    }

    fn create_block(
        &mut self,
        parent: ArenaId,
        block_size: usize,
        block_count: usize,
        alignment: usize,
    ) -> Result<ArenaId, ArenaError> {
        ArenaForest::create_block(self, parent, block_size, block_count, alignment)
    }

    fn create_multi_pool(
        &mut self,
        parent: ArenaId,
        total_size: usize,
    ) -> Result<ArenaId, ArenaError> {
        ArenaForest::create_multi_pool(self, parent, total_size)
    }

    fn destroy(&mut self, id: ArenaId) -> Result<usize, ArenaError> {
        ArenaForest::destroy(self, id)
    }

    fn alloc_aligned(
        &mut self,
        id: ArenaId,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, ArenaError> {
        ArenaForest::alloc_aligned(self, id, size, alignment)
    }

    fn reset(&mut self, id: ArenaId) -> Result<(), ArenaError> {
        ArenaForest::reset(self, id)
    }

    fn used(&self, id: ArenaId) -> Option<usize> {
        ArenaForest::used(self, id)
    }

    fn peak_used(&self, id: ArenaId) -> Option<usize> {
        ArenaForest::peak_used(self, id)
    }

    fn capacity(&self, id: ArenaId) -> Option<usize> {
        ArenaForest::capacity(self, id)
    }

    fn set_debug_name(&mut self, id: ArenaId, name: String) -> Result<(), ArenaError> {
        ArenaForest::set_debug_name(self, id, name)
    }

    fn mark(&self, id: ArenaId) -> Result<ArenaMarker, ArenaError> {
        ArenaForest::mark(self, id)
    }

    fn pop_to(&mut self, id: ArenaId, marker: ArenaMarker) -> Result<(), ArenaError> {
        ArenaForest::pop_to(self, id, marker)
    }

    fn temp_marker(&self, id: ArenaId) -> Result<ArenaMarker, ArenaError> {
        ArenaForest::temp_marker(self, id)
    }

    fn end_temp(&mut self, marker: ArenaMarker) {
        ArenaForest::end_temp(self, marker);
    }
}

struct Host {
    forest: Weak<RefCell<dyn HostedForest>>,
    root: ArenaId,
}

thread_local! {
    static HOSTS: RefCell<HashMap<u64, Host>> = RefCell::new(HashMap::new());
}

// 0 is the detached table's id.
static NEXT_HOST: AtomicU64 = AtomicU64::new(1);

/// Registration of a forest with the arena services.
///
/// Tables from [`services`](Self::services) work on the thread that
/// attached the forest, for as long as the binding lives and the forest
/// is not borrowed elsewhere. Dropping the binding detaches the forest.
pub struct ArenaBinding {
    host: u64,
    root: ArenaId,
    // The registry is per thread.
    _thread: PhantomData<*const ()>,
}

impl ArenaBinding {
    /// Register `forest`; module arenas are carved from `root`.
    pub fn attach<M: VirtualMemory + 'static>(
        forest: &Rc<RefCell<ArenaForest<M>>>,
        root: ArenaId,
    ) -> Self {
        let host = NEXT_HOST.fetch_add(1, Ordering::Relaxed);
        let shared: Rc<RefCell<dyn HostedForest>> = forest.clone();
        HOSTS.with(|hosts| {
            hosts.borrow_mut().insert(
                host,
                Host {
                    forest: Rc::downgrade(&shared),
                    root,
                },
            );
        });
        tracing::debug!(host, %root, "Arena services attached");
        Self {
            host,
            root,
            _thread: PhantomData,
        }
    }

    /// Id the callbacks resolve.
    pub fn host(&self) -> u64 {
        self.host
    }

    /// Root module arenas are carved from.
    pub fn root(&self) -> ArenaId {
        self.root
    }

    /// Service table bound to this forest.
    pub fn services(&self) -> ArenaServices {
        ArenaServices {
            host: self.host,
            root: root_arena,
            create_bump,
            create_stack,
            create_block,
            create_multi_pool,
            destroy,
            alloc,
            alloc_aligned,
            reset,
            used,
            peak_used,
            capacity,
            set_debug_name,
            mark,
            pop_to,
            begin_temp,
            end_temp,
        }
    }
}

impl Drop for ArenaBinding {
    fn drop(&mut self) {
        let removed = HOSTS
            .try_with(|hosts| hosts.borrow_mut().remove(&self.host).is_some())
            .unwrap_or(false);
        if removed {
            tracing::debug!(host = self.host, "Arena services detached");
        }
    }
}

/// Run `f` against the forest registered as `host`.
///
/// `None` when the host is unknown on this thread, its forest is gone,
/// or the forest is already borrowed (a callback re-entered the host).
fn with_forest<R>(
    host: u64,
    f: impl FnOnce(&mut (dyn HostedForest + 'static), ArenaId) -> R,
) -> Option<R> {
    let entry = HOSTS
        .try_with(|hosts| {
            hosts
                .borrow()
                .get(&host)
                .map(|h| (h.forest.upgrade(), h.root))
        })
        .ok()
        .flatten();
    let Some((Some(shared), root)) = entry else {
        tracing::warn!(host, "Arena service called without a live host");
        return None;
    };
    let Ok(mut forest) = shared.try_borrow_mut() else {
        tracing::error!(host, "Arena service called while the forest is borrowed");
        return None;
    };
    Some(f(&mut *forest, root))
}

fn handle_of(result: Option<Result<ArenaId, ArenaError>>) -> ArenaHandle {
    match result {
        Some(Ok(id)) => id.into(),
        _ => ArenaHandle::NULL,
    }
}

fn pointer_of(result: Option<Result<NonNull<u8>, ArenaError>>) -> *mut c_void {
    match result {
        Some(Ok(ptr)) => ptr.as_ptr().cast(),
        _ => ptr::null_mut(),
    }
}

extern "C" fn root_arena(host: u64) -> ArenaHandle {
    with_forest(host, |forest, root| {
        if forest.contains(root) {
            root.into()
        } else {
            ArenaHandle::NULL
        }
    })
    .unwrap_or(ArenaHandle::NULL)
}

extern "C" fn create_bump(
    host: u64,
    parent: ArenaHandle,
    size: usize,
    alignment: usize,
) -> ArenaHandle {
    handle_of(with_forest(host, |forest, _| {
        forest.create_bump(parent.into(), size, alignment)
    }))
}

extern "C" fn create_stack(
    host: u64,
    parent: ArenaHandle,
    size: usize,
    alignment: usize,
) -> ArenaHandle {
    handle_of(with_forest(host, |forest, _| {
        forest.create_stack(parent.into(), size, alignment)
    }))
}

extern "C" fn create_block(
    host: u64,
    parent: ArenaHandle,
    block_size: usize,
    block_count: usize,
    alignment: usize,
) -> ArenaHandle {
    handle_of(with_forest(host, |forest, _| {
        forest.create_block(parent.into(), block_size, block_count, alignment)
    }))
}

extern "C" fn create_multi_pool(host: u64, parent: ArenaHandle, total_size: usize) -> ArenaHandle {
    handle_of(with_forest(host, |forest, _| {
        forest.create_multi_pool(parent.into(), total_size)
    }))
}

extern "C" fn destroy(host: u64, arena: ArenaHandle) -> bool {
    with_forest(host, |forest, _| forest.destroy(arena.into()).is_ok()).unwrap_or(false)
}

extern "C" fn alloc(host: u64, arena: ArenaHandle, size: usize) -> *mut c_void {
    alloc_aligned(host, arena, size, DEFAULT_ALIGNMENT)
}

extern "C" fn alloc_aligned(
    host: u64,
    arena: ArenaHandle,
    size: usize,
    alignment: usize,
) -> *mut c_void {
    pointer_of(with_forest(host, |forest, _| {
        forest.alloc_aligned(arena.into(), size, alignment)
    }))
}

extern "C" fn reset(host: u64, arena: ArenaHandle) -> bool {
    with_forest(host, |forest, _| forest.reset(arena.into()).is_ok()).unwrap_or(false)
}

extern "C" fn used(host: u64, arena: ArenaHandle) -> usize {
    with_forest(host, |forest, _| forest.used(arena.into()))
        .flatten()
        .unwrap_or(0)
}

extern "C" fn peak_used(host: u64, arena: ArenaHandle) -> usize {
    with_forest(host, |forest, _| forest.peak_used(arena.into()))
        .flatten()
        .unwrap_or(0)
}

extern "C" fn capacity(host: u64, arena: ArenaHandle) -> usize {
    with_forest(host, |forest, _| forest.capacity(arena.into()))
        .flatten()
        .unwrap_or(0)
}

#[allow(unsafe_code)]
extern "C" fn set_debug_name(host: u64, arena: ArenaHandle, name: *const c_char) -> bool {
    if name.is_null() {
        return false;
    }
    // SAFETY: the ABI requires `name` to be a NUL-terminated string that
    // stays valid for the duration of the call; it is copied here.
    let name = unsafe { CStr::from_ptr(name) }
        .to_string_lossy()
        .into_owned();
    with_forest(host, |forest, _| {
        forest.set_debug_name(arena.into(), name).is_ok()
    })
    .unwrap_or(false)
}

extern "C" fn mark(host: u64, arena: ArenaHandle) -> usize {
    with_forest(host, |forest, _| forest.mark(arena.into()).map(|m| m.offset()))
        .and_then(Result::ok)
        .unwrap_or(INVALID_MARK)
}

extern "C" fn pop_to(host: u64, arena: ArenaHandle, offset: usize) -> bool {
    with_forest(host, |forest, _| {
        let id = ArenaId::from(arena);
        forest.pop_to(id, ArenaMarker::new(id, offset)).is_ok()
    })
    .unwrap_or(false)
}

extern "C" fn begin_temp(host: u64, arena: ArenaHandle) -> usize {
    with_forest(host, |forest, _| {
        forest.temp_marker(arena.into()).map(|m| m.offset())
    })
    .and_then(Result::ok)
    .unwrap_or(INVALID_MARK)
}

extern "C" fn end_temp(host: u64, arena: ArenaHandle, offset: usize) -> bool {
    with_forest(host, |forest, _| {
        let id = ArenaId::from(arena);
        if !forest.contains(id) {
            return false;
        }
        forest.end_temp(ArenaMarker::new(id, offset));
        true
    })
    .unwrap_or(false)
}
