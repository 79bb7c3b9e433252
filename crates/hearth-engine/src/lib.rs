//! Host context for the Hearth runtime.
//!
//! [`Engine`] ties the arena forest and the module manager into one
//! frame loop: a virtual root with persistent and per-frame bump arenas,
//! startup modules loaded from [`EngineConfig::module_paths`], and
//! per-frame reload, update and render dispatch.
//!
//! ```no_run
//! use hearth_engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::default().with_module("target/debug/libgame.so");
//! let mut engine = Engine::native(config)?;
//! for _ in 0..3 {
//!     let metrics = engine.frame(1.0 / 60.0)?;
//!     println!("frame {} took {} us", metrics.frame, metrics.total_us);
//! }
//! engine.shutdown();
//! # Ok::<(), hearth_engine::EngineError>(())
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::EngineError;
pub use metrics::FrameMetrics;
