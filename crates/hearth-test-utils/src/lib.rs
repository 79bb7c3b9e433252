//! Test utilities and mock backends for Hearth development.
//!
//! - [`RecordingMemory`]: a [`VirtualMemory`](hearth_core::VirtualMemory)
//!   backend that hands out fake addresses, counts every call, checks the
//!   reserve/commit contract and can be told to fail.
//! - [`MockLoader`]: a [`ModuleLoader`](hearth_core::ModuleLoader) over
//!   in-memory "files" whose modules record their lifecycle into a shared
//!   [`EventLog`].
//! - [`LogCapture`]: a `tracing-subscriber` layer that records events so
//!   tests can assert on log output.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod loader;
mod logs;
mod memory;

pub use loader::{EntryBehavior, Event, EventLog, MockFile, MockLoader, MockModuleSpec, MockState};
pub use logs::{CapturedEvent, LogCapture};
pub use memory::{MemoryLog, RecordingMemory};
