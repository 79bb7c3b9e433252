//! Engine startup and frame errors.

use std::error::Error;
use std::fmt;

use hearth_arena::ArenaError;
use hearth_module::ModuleError;

use crate::config::ConfigError;

/// Errors reported by [`Engine`](crate::Engine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// The configuration failed validation.
    Config(ConfigError),
    /// An engine arena could not be created or reset.
    Arena(ArenaError),
    /// A startup module failed to load.
    Module(ModuleError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Arena(e) => write!(f, "arena: {e}"),
            Self::Module(e) => write!(f, "module: {e}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Arena(e) => Some(e),
            Self::Module(e) => Some(e),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ArenaError> for EngineError {
    fn from(e: ArenaError) -> Self {
        Self::Arena(e)
    }
}

impl From<ModuleError> for EngineError {
    fn from(e: ModuleError) -> Self {
        Self::Module(e)
    }
}
