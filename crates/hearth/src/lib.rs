//! Hearth: hierarchical arenas and hot-reloadable modules for native
//! game hosts.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Hearth sub-crates. For most hosts, adding `hearth` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use hearth::prelude::*;
//!
//! let mut forest = ArenaForest::new(HeapMemory::new());
//! let root = forest.create_virtual(&RootConfig::new(MIB, 0)).unwrap();
//! let scratch = forest.create_stack(root, 4 * KIB, 16).unwrap();
//!
//! forest.alloc(scratch, 256).unwrap();
//! let marker = forest.mark(scratch).unwrap();
//! forest.alloc(scratch, 1024).unwrap();
//! forest.pop_to(scratch, marker).unwrap();
//! assert_eq!(forest.used(scratch), Some(256));
//!
//! forest.destroy(root).unwrap();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`contracts`] | `hearth-core` | Memory and module contracts, module ABI, alignment helpers |
//! | [`arena`] | `hearth-arena` | The arena forest: roots, bump and stack arenas, temp scopes |
//! | [`platform`] | `hearth-platform` | OS memory backends, native module loading, host services |
//! | [`module`] | `hearth-module` | Module manager and static module registry |
//! | [`engine`] | `hearth-engine` | Host context and frame loop |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Memory and module contracts (`hearth-core`).
///
/// Implement [`contracts::VirtualMemory`] for a new memory backend, or
/// [`contracts::ModuleLoader`] / [`contracts::ModuleImage`] / [`contracts::ModuleApi`]
/// for a new module source.
pub use hearth_core as contracts;

/// The arena forest (`hearth-arena`).
pub use hearth_arena as arena;

/// Host OS backends (`hearth-platform`).
///
/// [`platform::SystemMemory`] is the preferred memory backend for the
/// target; [`platform::NativeLoader`] loads dynamic-library modules.
pub use hearth_platform as platform;

/// Module lifecycle (`hearth-module`).
pub use hearth_module as module;

/// Host context (`hearth-engine`).
pub use hearth_engine as engine;

/// Common imports for typical Hearth usage.
///
/// ```rust
/// use hearth::prelude::*;
/// ```
pub mod prelude {
    // Core contracts
    pub use hearth_core::{
        ArenaHandle, ArenaServices, HostServices, ModuleApi, ModuleLoader, ModuleState,
        VirtualMemory, KIB, MIB,
    };

    // Errors
    pub use hearth_arena::ArenaError;
    pub use hearth_core::{InitError, LoadError, MemoryError};
    pub use hearth_engine::{ConfigError, EngineError};
    pub use hearth_module::ModuleError;

    // Arenas
    pub use hearth_arena::{ArenaForest, ArenaId, ArenaMarker, ArenaStats, Discipline, RootConfig};

    // Platform
    pub use hearth_platform::{
        host_services, ArenaBinding, HeapMemory, NativeLoader, SystemMemory,
    };

    // Modules
    pub use hearth_module::{
        ManagerConfig, ModuleIndex, ModuleInfo, ModuleManager, ModulePhase, ReloadReport,
        StaticLoader,
    };

    // Engine
    pub use hearth_engine::{Engine, EngineConfig, FrameMetrics};
}
