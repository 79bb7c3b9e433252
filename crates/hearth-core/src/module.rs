//! Contracts between the module manager and loadable module code.
//!
//! Three layers, outermost first:
//!
//! - [`ModuleLoader`] turns a path into a [`ModuleImage`].
//! - [`ModuleImage`] is one mapped unit of code. It resolves the
//!   lifecycle interface, detects changes to its backing file, and swaps
//!   its own code on [`reload`](ModuleImage::reload).
//! - [`ModuleApi`] is the lifecycle interface (the vtable) resolved from
//!   an image.
//!
//! Native dynamic libraries and statically linked Rust modules both
//! implement these traits, so hot-reload and static builds share one
//! call surface.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::abi::HostServices;
use crate::state::ModuleState;

/// Errors produced while mapping module code or resolving its entry point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// The private copy of the module file could not be made.
    Copy {
        /// Original module file.
        from: PathBuf,
        /// Intended private copy.
        to: PathBuf,
        /// OS-provided description.
        reason: String,
    },
    /// The module could not be mapped into the process.
    Open {
        /// File that failed to open.
        path: PathBuf,
        /// Loader-provided description.
        reason: String,
    },
    /// The well-known entry-point symbol is not exported.
    MissingSymbol {
        /// Symbol that was looked up.
        symbol: String,
        /// Loader-provided description.
        reason: String,
    },
    /// The entry point returned a null vtable.
    NullVTable {
        /// Symbol that was called.
        symbol: String,
    },
    /// The image currently has no mapped code.
    NotLoaded {
        /// Original module file.
        path: PathBuf,
    },
    /// No module is registered under this path.
    UnknownModule {
        /// Requested path.
        path: PathBuf,
    },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy { from, to, reason } => write!(
                f,
                "failed to copy {} to {}: {reason}",
                from.display(),
                to.display()
            ),
            Self::Open { path, reason } => {
                write!(f, "failed to open {}: {reason}", path.display())
            }
            Self::MissingSymbol { symbol, reason } => {
                write!(f, "missing entry point '{symbol}': {reason}")
            }
            Self::NullVTable { symbol } => {
                write!(f, "entry point '{symbol}' returned a null vtable")
            }
            Self::NotLoaded { path } => {
                write!(f, "module {} has no mapped code", path.display())
            }
            Self::UnknownModule { path } => {
                write!(f, "no module registered for {}", path.display())
            }
        }
    }
}

impl Error for LoadError {}

impl LoadError {
    /// Whether this error means the entry point could not be resolved
    /// (missing symbol or null vtable).
    pub fn is_entry_point(&self) -> bool {
        matches!(self, Self::MissingSymbol { .. } | Self::NullVTable { .. })
    }
}

/// A module's `init` callback reported failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitError {
    /// Module-provided description.
    pub reason: String,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module init failed: {}", self.reason)
    }
}

impl Error for InitError {}

/// Result of a successful [`ModuleImage::reload`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The fresh code is mapped.
    Upgraded,
    /// The fresh code could not be mapped; the previous code was mapped
    /// again instead.
    FellBack {
        /// Why the upgrade failed.
        reason: LoadError,
    },
}

/// Lifecycle interface of one module's code.
///
/// Every callback except `version`/`name`/`init` has a no-op default,
/// matching a vtable whose slot is empty. Implementations are
/// stateless; per-module data lives in the [`ModuleState`] token that
/// `init` returns.
pub trait ModuleApi {
    /// Module-defined version number.
    fn version(&self) -> u32;

    /// Display name.
    fn name(&self) -> &str;

    /// Allocate and initialise the module's state.
    fn init(&self, services: &HostServices) -> Result<ModuleState, InitError>;

    /// Advance by `dt` seconds.
    fn update(&self, state: &mut ModuleState, dt: f32) {
        let _ = (state, dt);
    }

    /// Draw.
    fn render(&self, state: &mut ModuleState) {
        let _ = state;
    }

    /// Free the state. Ownership passes back to the module.
    fn shutdown(&self, state: ModuleState) {
        drop(state);
    }

    /// Point the module at the current service tables after a reload.
    fn rebind(&self, services: &HostServices) {
        let _ = services;
    }
}

/// One mapped unit of module code.
///
/// An image owns the OS handle; dropping it unloads the code. Any
/// [`ModuleApi`] obtained from [`entry_point`](ModuleImage::entry_point)
/// borrows code from the current mapping and must be dropped before the
/// image is reloaded or dropped.
pub trait ModuleImage {
    /// The original module file (not the private copy).
    fn path(&self) -> &Path;

    /// Resolve `symbol` and obtain the lifecycle interface.
    fn entry_point(&self, symbol: &str) -> Result<Box<dyn ModuleApi>, LoadError>;

    /// Whether the original file changed since the current code was mapped.
    fn needs_reload(&self) -> bool;

    /// Swap in the current contents of the original file.
    ///
    /// `Err` means no code is mapped any more.
    fn reload(&mut self) -> Result<ReloadOutcome, LoadError>;
}

/// Maps module files into [`ModuleImage`]s.
pub trait ModuleLoader {
    /// Load the module at `path`.
    fn load(&mut self, path: &Path) -> Result<Box<dyn ModuleImage>, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    impl ModuleApi for Minimal {
        fn version(&self) -> u32 {
            1
        }

        fn name(&self) -> &str {
            "minimal"
        }

        fn init(&self, _services: &HostServices) -> Result<ModuleState, InitError> {
            Ok(ModuleState::new(0u32))
        }
    }

    #[test]
    fn default_callbacks_leave_state_untouched() {
        let api = Minimal;
        let mut state = api.init(&HostServices::default()).unwrap();
        api.update(&mut state, 0.016);
        api.render(&mut state);
        assert_eq!(state.downcast_ref::<u32>(), Some(&0));
        api.shutdown(state);
    }

    #[test]
    fn entry_point_errors_are_classified() {
        let missing = LoadError::MissingSymbol {
            symbol: "x".into(),
            reason: "undefined".into(),
        };
        let null = LoadError::NullVTable { symbol: "x".into() };
        let open = LoadError::Open {
            path: "a.so".into(),
            reason: "nope".into(),
        };
        assert!(missing.is_entry_point());
        assert!(null.is_entry_point());
        assert!(!open.is_entry_point());
    }
}
