//! Host OS backends for the Hearth runtime.
//!
//! - [`MmapMemory`]: POSIX reserve/commit through `mmap`/`mprotect`.
//! - [`HeapMemory`]: reserve/commit emulated on the global allocator,
//!   for targets without virtual memory.
//! - [`NativeLoader`]: dynamic libraries loaded from private copies so
//!   the original file can be rebuilt while the module runs.
//! - [`host_services`]: the default service table handed to modules,
//!   forwarding module log lines into `tracing`.
//! - [`ArenaBinding`]: exposes an arena forest to modules through the
//!   `extern "C"` arena services.
//!
//! This crate is the only one in the workspace that contains `unsafe`
//! code. It is confined to the functions that call into the OS or across
//! the module ABI, each marked `#[allow(unsafe_code)]`.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arenas;
pub mod heap;
pub mod loader;
#[cfg(unix)]
pub mod mmap;
pub mod native;
pub mod services;

pub use arenas::ArenaBinding;
pub use heap::HeapMemory;
pub use loader::{NativeImage, NativeLoader};
#[cfg(unix)]
pub use mmap::MmapMemory;
pub use native::{NativeModuleApi, NativeState};
pub use services::host_services;

/// The platform's preferred [`VirtualMemory`](hearth_core::VirtualMemory)
/// backend.
#[cfg(unix)]
pub type SystemMemory = MmapMemory;

/// The platform's preferred [`VirtualMemory`](hearth_core::VirtualMemory)
/// backend.
#[cfg(not(unix))]
pub type SystemMemory = HeapMemory;
