//! Module lifecycle management for the Hearth runtime.
//!
//! [`ModuleManager`] owns a bounded, append-only table of loaded modules
//! and drives their lifecycle: load, per-frame update and render, hot
//! reload with state preservation, and reverse-order shutdown. Where the
//! code comes from is abstracted behind
//! [`ModuleLoader`](hearth_core::ModuleLoader): native libraries come
//! from `hearth-platform`, statically linked modules from
//! [`StaticLoader`].
//!
//! # Slot lifecycle
//!
//! ```text
//! load ──► Active ──reload ok──► Active
//!            │  └──reload fell back──► Stale ──reload ok──► Active
//!            │                            │
//!            └──unload / reload lost──────┴──► Unloaded
//! ```
//!
//! Slots are never reused; indices stay stable for the manager's life.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod manager;
pub mod static_loader;

pub use config::ManagerConfig;
pub use error::ModuleError;
pub use manager::{ModuleIndex, ModuleInfo, ModuleManager, ModulePhase, ReloadReport};
pub use static_loader::StaticLoader;
