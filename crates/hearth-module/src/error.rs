//! Module manager errors.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use hearth_core::{InitError, LoadError};

/// Errors reported by [`ModuleManager`](crate::ModuleManager).
///
/// A failed `load` never occupies a slot; everything acquired on the way
/// is released before the error is returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleError {
    /// The manager has not been initialised (or has been shut down).
    NotInitialized,
    /// Every slot has been used.
    TableFull {
        /// The configured capacity.
        capacity: usize,
    },
    /// The module path exceeds the configured maximum.
    PathTooLong {
        /// Length of the rejected path in bytes.
        len: usize,
        /// The configured maximum.
        max: usize,
    },
    /// The loader could not map the module.
    LoadFailed {
        /// Requested module path.
        path: PathBuf,
        /// Loader error.
        source: LoadError,
    },
    /// The module does not export a usable entry point.
    MissingEntryPoint {
        /// Requested module path.
        path: PathBuf,
        /// Missing symbol or null vtable.
        source: LoadError,
    },
    /// The module's `init` failed.
    InitFailed {
        /// Requested module path.
        path: PathBuf,
        /// Module-reported failure.
        source: InitError,
    },
    /// The index does not name a slot.
    InvalidIndex {
        /// The rejected index.
        index: usize,
    },
    /// The slot holds no loaded module.
    NotActive {
        /// The slot's index.
        index: usize,
    },
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "module manager not initialized"),
            Self::TableFull { capacity } => {
                write!(f, "maximum modules loaded ({capacity})")
            }
            Self::PathTooLong { len, max } => {
                write!(f, "module path is {len} bytes, maximum is {max}")
            }
            Self::LoadFailed { path, source } => {
                write!(f, "failed to load module {}: {source}", path.display())
            }
            Self::MissingEntryPoint { path, source } => {
                write!(f, "module {} has no entry point: {source}", path.display())
            }
            Self::InitFailed { path, source } => {
                write!(f, "module {} failed to initialise: {source}", path.display())
            }
            Self::InvalidIndex { index } => write!(f, "invalid module index: {index}"),
            Self::NotActive { index } => write!(f, "module {index} is not loaded"),
        }
    }
}

impl Error for ModuleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::LoadFailed { source, .. } | Self::MissingEntryPoint { source, .. } => {
                Some(source)
            }
            Self::InitFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failure_exposes_loader_error() {
        let err = ModuleError::LoadFailed {
            path: "game.so".into(),
            source: LoadError::Open {
                path: "game.so.1.0.tmp".into(),
                reason: "invalid ELF header".into(),
            },
        };
        assert!(err.to_string().contains("game.so"));
        assert!(err.source().is_some());
    }

    #[test]
    fn table_full_names_capacity() {
        assert_eq!(
            ModuleError::TableFull { capacity: 32 }.to_string(),
            "maximum modules loaded (32)"
        );
    }
}
