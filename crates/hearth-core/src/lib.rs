//! Core contracts for the Hearth runtime.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! interfaces the arena system and the module manager consume from the
//! host operating system, plus the C ABI shared with dynamically loaded
//! modules:
//!
//! - [`memory`]: the [`VirtualMemory`] reserve/commit contract.
//! - [`module`]: the [`ModuleLoader`] / [`ModuleImage`] / [`ModuleApi`]
//!   contracts and the opaque [`ModuleState`] token.
//! - [`abi`]: `#[repr(C)]` vtable and service tables crossing the
//!   dynamic-library boundary.
//! - [`align`]: alignment arithmetic and size constants.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod abi;
pub mod align;
pub mod memory;
pub mod module;
pub mod state;

pub use abi::{
    ArenaHandle, ArenaServices, EngineServices, HostServices, LogLevel, ModuleVTable,
    PlatformServices,
};
pub use align::{align_up, is_power_of_two, KIB, MIB};
pub use memory::{MemoryError, MemoryStats, VirtualMemory};
pub use module::{InitError, LoadError, ModuleApi, ModuleImage, ModuleLoader, ReloadOutcome};
pub use state::ModuleState;
