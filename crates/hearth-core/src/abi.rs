//! C ABI shared between the host and dynamically loaded modules.
//!
//! A native module exports exactly one accessor, named
//! [`ENTRY_SYMBOL`], with the signature [`EntryPointFn`]. The accessor
//! returns a pointer to the module's [`ModuleVTable`], which lives in the
//! module image's static memory and is invalidated as soon as that image
//! is unloaded or reloaded.
//!
//! The host hands each module two service tables on `init` and rewrites
//! the vtable's service pointers after every reload so a freshly mapped
//! image always sees the current process-wide instances.
//!
//! Arenas cross the boundary as [`ArenaHandle`]s through the
//! [`ArenaServices`] table. The table names its host by id rather than
//! by pointer, so a table that outlives its host fails every call.

use std::ffi::{c_char, c_void, CStr};
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::time::Instant;

/// Name of the exported accessor every native module must provide.
pub const ENTRY_SYMBOL: &str = "hearth_module_api";

/// ABI revision reported to modules through [`EngineServices`].
pub const ABI_VERSION: u32 = 2;

/// Severity passed to [`PlatformServices::log`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Unrecoverable failure inside the module.
    Error = 0,
    /// Degraded but running.
    Warn = 1,
    /// Lifecycle milestones.
    Info = 2,
    /// Verbose diagnostics.
    Debug = 3,
}

impl LogLevel {
    /// Decode a raw level received over the ABI.
    ///
    /// Unknown values map to [`LogLevel::Debug`].
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Error,
            1 => Self::Warn,
            2 => Self::Info,
            _ => Self::Debug,
        }
    }
}

/// Log callback: `level` is a [`LogLevel`] discriminant, `message` a
/// NUL-terminated UTF-8 string (or null).
pub type LogFn = extern "C" fn(level: u32, message: *const c_char);

/// Monotonic clock callback returning nanoseconds since host start.
pub type TicksFn = extern "C" fn() -> u64;

/// Reference to a host arena, as seen by module code.
///
/// The host checks the generation on every call, so a handle kept past
/// its arena's destruction is rejected instead of reaching whatever
/// arena reuses the slot.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaHandle {
    /// Slot index in the host's arena table.
    pub index: u32,
    /// Slot generation at creation.
    pub generation: u32,
}

impl ArenaHandle {
    /// Returned by every call that fails to produce an arena.
    pub const NULL: Self = Self {
        index: u32::MAX,
        generation: u32::MAX,
    };

    /// Whether this is [`ArenaHandle::NULL`].
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    fn non_null(self) -> Option<Self> {
        (!self.is_null()).then_some(self)
    }
}

impl Default for ArenaHandle {
    fn default() -> Self {
        Self::NULL
    }
}

/// Offset returned by `mark` and `begin_temp` when the call failed.
pub const INVALID_MARK: usize = usize::MAX;

/// `root(host) -> handle` of the arena modules carve from.
pub type ArenaRootFn = extern "C" fn(host: u64) -> ArenaHandle;

/// `create(host, parent, size, alignment) -> handle`.
pub type ArenaCreateFn =
    extern "C" fn(host: u64, parent: ArenaHandle, size: usize, alignment: usize) -> ArenaHandle;

/// `create_block(host, parent, block_size, block_count, alignment) -> handle`.
pub type ArenaCreateBlockFn = extern "C" fn(
    host: u64,
    parent: ArenaHandle,
    block_size: usize,
    block_count: usize,
    alignment: usize,
) -> ArenaHandle;

/// `create_multi_pool(host, parent, total_size) -> handle`.
pub type ArenaCreateMultiPoolFn =
    extern "C" fn(host: u64, parent: ArenaHandle, total_size: usize) -> ArenaHandle;

/// `op(host, arena) -> success`; destroy and reset.
pub type ArenaOpFn = extern "C" fn(host: u64, arena: ArenaHandle) -> bool;

/// `alloc(host, arena, size) -> pointer or null`.
pub type ArenaAllocFn = extern "C" fn(host: u64, arena: ArenaHandle, size: usize) -> *mut c_void;

/// `alloc_aligned(host, arena, size, alignment) -> pointer or null`.
pub type ArenaAllocAlignedFn =
    extern "C" fn(host: u64, arena: ArenaHandle, size: usize, alignment: usize) -> *mut c_void;

/// `query(host, arena) -> value`; usage queries return 0 on failure,
/// `mark` and `begin_temp` return [`INVALID_MARK`].
pub type ArenaQueryFn = extern "C" fn(host: u64, arena: ArenaHandle) -> usize;

/// `rewind(host, arena, offset) -> success`; `pop_to` and `end_temp`.
pub type ArenaRewindFn = extern "C" fn(host: u64, arena: ArenaHandle, offset: usize) -> bool;

/// `set_debug_name(host, arena, name) -> success`; `name` is a
/// NUL-terminated UTF-8 string copied by the host.
pub type ArenaNameFn = extern "C" fn(host: u64, arena: ArenaHandle, name: *const c_char) -> bool;

/// Arena operations available to modules.
///
/// Every callback takes [`host`](Self::host) as its first argument.
/// Arenas a module creates belong to the host's forest, not to the
/// module's code, so they survive reloads of that code; a module frees
/// them with `destroy`, or they go when the host tears down its root.
///
/// The methods wrap the raw callbacks for Rust modules.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ArenaServices {
    /// Host id; 0 is never attached.
    pub host: u64,
    /// Root every module arena is carved from.
    pub root: ArenaRootFn,
    /// Create a bump arena.
    pub create_bump: ArenaCreateFn,
    /// Create a stack arena.
    pub create_stack: ArenaCreateFn,
    /// Create a block pool. Not implemented by the host; always null.
    pub create_block: ArenaCreateBlockFn,
    /// Create a multi-size pool. Not implemented by the host; always null.
    pub create_multi_pool: ArenaCreateMultiPoolFn,
    /// Destroy an arena and everything carved from it.
    pub destroy: ArenaOpFn,
    /// Allocate with the default alignment.
    pub alloc: ArenaAllocFn,
    /// Allocate with an explicit power-of-two alignment.
    pub alloc_aligned: ArenaAllocAlignedFn,
    /// Reset a bump or stack arena.
    pub reset: ArenaOpFn,
    /// Bytes in use.
    pub used: ArenaQueryFn,
    /// High-water mark of `used`.
    pub peak_used: ArenaQueryFn,
    /// Usable size.
    pub capacity: ArenaQueryFn,
    /// Attach a diagnostic name.
    pub set_debug_name: ArenaNameFn,
    /// Current offset of a stack arena.
    pub mark: ArenaQueryFn,
    /// Rewind a stack arena to an offset from `mark`.
    pub pop_to: ArenaRewindFn,
    /// Open a temp scope on a bump or stack arena.
    pub begin_temp: ArenaQueryFn,
    /// Close a temp scope with the offset from `begin_temp`.
    pub end_temp: ArenaRewindFn,
}

impl ArenaServices {
    /// A table attached to no host. Every call fails.
    pub fn detached() -> Self {
        Self {
            host: 0,
            root: detached_root,
            create_bump: detached_create,
            create_stack: detached_create,
            create_block: detached_create_block,
            create_multi_pool: detached_create_multi_pool,
            destroy: detached_op,
            alloc: detached_alloc,
            alloc_aligned: detached_alloc_aligned,
            reset: detached_op,
            used: detached_query,
            peak_used: detached_query,
            capacity: detached_query,
            set_debug_name: detached_name,
            mark: detached_mark,
            pop_to: detached_rewind,
            begin_temp: detached_mark,
            end_temp: detached_rewind,
        }
    }

    /// Whether a host ever attached this table.
    pub fn is_attached(&self) -> bool {
        self.host != 0
    }

    /// The root module arenas are carved from.
    pub fn root(&self) -> Option<ArenaHandle> {
        (self.root)(self.host).non_null()
    }

    /// Create a bump arena of `size` usable bytes inside `parent`.
    pub fn create_bump(
        &self,
        parent: ArenaHandle,
        size: usize,
        alignment: usize,
    ) -> Option<ArenaHandle> {
        (self.create_bump)(self.host, parent, size, alignment).non_null()
    }

    /// Create a stack arena of `size` usable bytes inside `parent`.
    pub fn create_stack(
        &self,
        parent: ArenaHandle,
        size: usize,
        alignment: usize,
    ) -> Option<ArenaHandle> {
        (self.create_stack)(self.host, parent, size, alignment).non_null()
    }

    /// Destroy `arena` and its subtree.
    pub fn destroy(&self, arena: ArenaHandle) -> bool {
        (self.destroy)(self.host, arena)
    }

    /// Allocate `size` bytes with the default alignment.
    pub fn alloc(&self, arena: ArenaHandle, size: usize) -> Option<NonNull<u8>> {
        NonNull::new((self.alloc)(self.host, arena, size).cast())
    }

    /// Allocate `size` bytes aligned to `alignment`.
    pub fn alloc_aligned(
        &self,
        arena: ArenaHandle,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        NonNull::new((self.alloc_aligned)(self.host, arena, size, alignment).cast())
    }

    /// Reset a bump or stack arena.
    pub fn reset(&self, arena: ArenaHandle) -> bool {
        (self.reset)(self.host, arena)
    }

    /// Bytes in use; 0 for unknown arenas.
    pub fn used(&self, arena: ArenaHandle) -> usize {
        (self.used)(self.host, arena)
    }

    /// High-water mark of [`used`](Self::used).
    pub fn peak_used(&self, arena: ArenaHandle) -> usize {
        (self.peak_used)(self.host, arena)
    }

    /// Usable size; 0 for unknown arenas.
    pub fn capacity(&self, arena: ArenaHandle) -> usize {
        (self.capacity)(self.host, arena)
    }

    /// Attach a diagnostic name.
    pub fn set_debug_name(&self, arena: ArenaHandle, name: &CStr) -> bool {
        (self.set_debug_name)(self.host, arena, name.as_ptr())
    }

    /// Current offset of a stack arena.
    pub fn mark(&self, arena: ArenaHandle) -> Option<usize> {
        let offset = (self.mark)(self.host, arena);
        (offset != INVALID_MARK).then_some(offset)
    }

    /// Rewind a stack arena to `offset`.
    pub fn pop_to(&self, arena: ArenaHandle, offset: usize) -> bool {
        (self.pop_to)(self.host, arena, offset)
    }

    /// Open a temp scope; returns the offset to close it with.
    pub fn begin_temp(&self, arena: ArenaHandle) -> Option<usize> {
        let offset = (self.begin_temp)(self.host, arena);
        (offset != INVALID_MARK).then_some(offset)
    }

    /// Close a temp scope opened at `offset`.
    pub fn end_temp(&self, arena: ArenaHandle, offset: usize) -> bool {
        (self.end_temp)(self.host, arena, offset)
    }
}

extern "C" fn detached_root(_host: u64) -> ArenaHandle {
    ArenaHandle::NULL
}

extern "C" fn detached_create(
    _host: u64,
    _parent: ArenaHandle,
    _size: usize,
    _alignment: usize,
) -> ArenaHandle {
    ArenaHandle::NULL
}

extern "C" fn detached_create_block(
    _host: u64,
    _parent: ArenaHandle,
    _block_size: usize,
    _block_count: usize,
    _alignment: usize,
) -> ArenaHandle {
    ArenaHandle::NULL
}

extern "C" fn detached_create_multi_pool(
    _host: u64,
    _parent: ArenaHandle,
    _total_size: usize,
) -> ArenaHandle {
    ArenaHandle::NULL
}

extern "C" fn detached_op(_host: u64, _arena: ArenaHandle) -> bool {
    false
}

extern "C" fn detached_alloc(_host: u64, _arena: ArenaHandle, _size: usize) -> *mut c_void {
    std::ptr::null_mut()
}

extern "C" fn detached_alloc_aligned(
    _host: u64,
    _arena: ArenaHandle,
    _size: usize,
    _alignment: usize,
) -> *mut c_void {
    std::ptr::null_mut()
}

extern "C" fn detached_query(_host: u64, _arena: ArenaHandle) -> usize {
    0
}

extern "C" fn detached_mark(_host: u64, _arena: ArenaHandle) -> usize {
    INVALID_MARK
}

extern "C" fn detached_rewind(_host: u64, _arena: ArenaHandle, _offset: usize) -> bool {
    false
}

extern "C" fn detached_name(_host: u64, _arena: ArenaHandle, _name: *const c_char) -> bool {
    false
}

/// Platform services available to modules.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PlatformServices {
    /// Write a line to the host log.
    pub log: LogFn,
    /// Monotonic nanosecond clock.
    pub ticks_ns: TicksFn,
    /// Arenas in the host's forest.
    pub arena: ArenaServices,
}

/// Engine services available to modules.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EngineServices {
    /// ABI revision the host was built against.
    pub abi_version: u32,
}

/// `init(out state, platform, engine) -> success`.
pub type InitFn = unsafe extern "C" fn(
    state: *mut *mut c_void,
    platform: *const PlatformServices,
    engine: *const EngineServices,
) -> bool;

/// `update(state, delta_time_seconds)`.
pub type UpdateFn = unsafe extern "C" fn(state: *mut c_void, dt: f32);

/// `render(state)`.
pub type RenderFn = unsafe extern "C" fn(state: *mut c_void);

/// `shutdown(in/out state)`; the module frees its state and may null it.
pub type ShutdownFn = unsafe extern "C" fn(state: *mut *mut c_void);

/// Signature of the [`ENTRY_SYMBOL`] accessor.
pub type EntryPointFn = unsafe extern "C" fn() -> *mut ModuleVTable;

/// Lifecycle vtable exported by a native module.
///
/// Every callback is optional. The `platform` and `engine` pointers are
/// written by the host, never by the module.
#[repr(C)]
#[derive(Debug)]
pub struct ModuleVTable {
    /// Module-defined version number.
    pub version: u32,
    /// NUL-terminated display name.
    pub name: *const c_char,
    /// Allocates the module's opaque state.
    pub init: Option<InitFn>,
    /// Advances the module by one frame.
    pub update: Option<UpdateFn>,
    /// Draws the module.
    pub render: Option<RenderFn>,
    /// Frees the module's opaque state.
    pub shutdown: Option<ShutdownFn>,
    /// Current platform services, rebound after every reload.
    pub platform: *const PlatformServices,
    /// Current engine services, rebound after every reload.
    pub engine: *const EngineServices,
}

/// Both service tables, owned by the host for the lifetime of the
/// module manager.
#[derive(Clone, Copy, Debug)]
pub struct HostServices {
    /// Platform services.
    pub platform: PlatformServices,
    /// Engine services.
    pub engine: EngineServices,
}

impl HostServices {
    /// Build a service table around the given log callback.
    pub fn with_log(log: LogFn) -> Self {
        Self {
            platform: PlatformServices {
                log,
                ticks_ns: monotonic_ns,
                arena: ArenaServices::detached(),
            },
            engine: EngineServices {
                abi_version: ABI_VERSION,
            },
        }
    }
}

impl Default for HostServices {
    /// Services whose log callback discards every message.
    fn default() -> Self {
        Self::with_log(discard_log)
    }
}

extern "C" fn discard_log(_level: u32, _message: *const c_char) {}

/// Nanoseconds since the first call in this process.
pub extern "C" fn monotonic_ns() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_round_trips_known_values() {
        for level in [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug] {
            assert_eq!(LogLevel::from_raw(level as u32), level);
        }
    }

    #[test]
    fn unknown_log_level_is_debug() {
        assert_eq!(LogLevel::from_raw(99), LogLevel::Debug);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(b >= a);
    }

    #[test]
    fn default_services_report_abi_version() {
        let services = HostServices::default();
        assert_eq!(services.engine.abi_version, ABI_VERSION);
    }

    #[test]
    fn detached_arena_services_fail_every_call() {
        let arena = HostServices::default().platform.arena;
        assert!(!arena.is_attached());
        assert_eq!(arena.root(), None);
        let handle = ArenaHandle {
            index: 0,
            generation: 0,
        };
        assert_eq!(arena.create_bump(handle, 64, 8), None);
        assert_eq!(arena.create_stack(handle, 64, 8), None);
        assert!(arena.alloc(handle, 16).is_none());
        assert!(arena.alloc_aligned(handle, 16, 16).is_none());
        assert!(!arena.reset(handle));
        assert!(!arena.destroy(handle));
        assert_eq!(arena.used(handle), 0);
        assert_eq!(arena.capacity(handle), 0);
        assert_eq!(arena.mark(handle), None);
        assert_eq!(arena.begin_temp(handle), None);
        assert!(!arena.pop_to(handle, 0));
        assert!(!arena.set_debug_name(handle, c"scratch"));
    }

    #[test]
    fn null_handle_is_the_default() {
        assert!(ArenaHandle::default().is_null());
        assert!(!ArenaHandle {
            index: 0,
            generation: 0
        }
        .is_null());
    }
}
