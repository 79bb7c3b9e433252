//! Hierarchical region allocators for the Hearth runtime.
//!
//! An [`ArenaForest`] owns every arena in the process as a node in a
//! generation-checked table. Arenas form trees: a root reserves address
//! space from a [`VirtualMemory`](hearth_core::VirtualMemory) backend and
//! commits it on demand, and every other arena is carved out of its
//! parent's memory.
//!
//! # Architecture
//!
//! ```text
//! ArenaForest<M: VirtualMemory>
//! ├── M (reserve / commit / release, used by roots only)
//! └── ArenaTable (slot + generation → ArenaNode)
//!     └── ArenaNode
//!         ├── Cursor::Root   (reserve/commit, grows on demand)
//!         ├── Cursor::Bump   (linear, reset only)
//!         └── Cursor::Stack  (linear, mark/pop)
//! ```
//!
//! # Disciplines
//!
//! - **VirtualRoot:** created by [`ArenaForest::create_virtual`]; the only
//!   arena that talks to the OS. Never reset, released on destroy.
//! - **Bump:** append-only; [`ArenaForest::reset`] reclaims everything.
//! - **Stack:** bump placement plus [`ArenaForest::mark`] /
//!   [`ArenaForest::pop_to`] for LIFO rewind.
//! - **BlockPool / MultiPool:** declared; creation fails with
//!   [`ArenaError::NotImplemented`].
//!
//! # Threading
//!
//! The forest is neither `Send` nor `Sync`: offset and usage counters are
//! updated without synchronisation. Give each thread its own forest.
//!
//! This crate computes addresses but never dereferences them, so it
//! contains no `unsafe` code.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod forest;
pub mod id;
pub mod node;
mod table;
pub mod temp;

pub use config::{RootConfig, HEADER_BYTES};
pub use error::ArenaError;
pub use forest::ArenaForest;
pub use id::{ArenaId, ArenaMarker};
pub use node::{ArenaStats, Discipline};
pub use temp::TempArena;
