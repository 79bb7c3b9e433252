//! Engine configuration, validation, and error types.
//!
//! [`EngineConfig`] is the input to [`Engine::new`](crate::Engine::new).
//! [`validate()`](EngineConfig::validate) checks that the arenas fit in
//! the root reservation and that the module list fits the manager before
//! anything is reserved or loaded.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use hearth_arena::{RootConfig, HEADER_BYTES};
use hearth_core::align::DEFAULT_ALIGNMENT;
use hearth_core::{align_up, MIB};
use hearth_module::ManagerConfig;

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`EngineConfig::validate()`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// An engine arena was configured with zero bytes.
    ZeroArena {
        /// Which arena (`"persistent"` or `"frame"`).
        arena: &'static str,
    },
    /// The engine arenas do not fit in the root reservation.
    ArenasExceedReserve {
        /// Bytes the arenas need, headers and padding included.
        required: usize,
        /// Usable bytes of the root reservation.
        reserve: usize,
    },
    /// Arena size arithmetic overflowed.
    SizeOverflow,
    /// The module manager has no slots.
    ZeroCapacity,
    /// More startup modules than manager slots.
    TooManyModules {
        /// Configured module paths.
        count: usize,
        /// Manager capacity.
        capacity: usize,
    },
    /// The entry-point symbol name is empty.
    EmptyEntrySymbol,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroArena { arena } => write!(f, "{arena} arena size must be non-zero"),
            Self::ArenasExceedReserve { required, reserve } => write!(
                f,
                "engine arenas need {required} bytes but the root reserves {reserve}"
            ),
            Self::SizeOverflow => write!(f, "arena sizes overflow the address space"),
            Self::ZeroCapacity => write!(f, "module capacity must be at least 1"),
            Self::TooManyModules { count, capacity } => {
                write!(f, "{count} startup modules exceed capacity {capacity}")
            }
            Self::EmptyEntrySymbol => write!(f, "entry symbol must not be empty"),
        }
    }
}

impl Error for ConfigError {}

// ── EngineConfig ───────────────────────────────────────────────────

/// Everything needed to bring up an [`Engine`](crate::Engine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root arena sizing.
    pub root: RootConfig,
    /// Usable bytes of the persistent bump arena. Default: 16 MiB.
    pub persistent_arena_bytes: usize,
    /// Usable bytes of the per-frame bump arena, reset every frame.
    /// Default: 4 MiB.
    pub frame_arena_bytes: usize,
    /// Modules loaded at startup, in order.
    pub module_paths: Vec<PathBuf>,
    /// Check modules for changes at the start of every frame.
    /// Default: true.
    pub hot_reload: bool,
    /// Module manager settings.
    pub manager: ManagerConfig,
}

impl EngineConfig {
    /// Default persistent arena size: 16 MiB.
    pub const DEFAULT_PERSISTENT_BYTES: usize = 16 * MIB;

    /// Default frame arena size: 4 MiB.
    pub const DEFAULT_FRAME_BYTES: usize = 4 * MIB;

    /// Append a startup module.
    pub fn with_module(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_paths.push(path.into());
        self
    }

    /// Bytes the root must provide for both engine arenas.
    ///
    /// Each child block is its header, its size, and one alignment unit
    /// of padding, rounded to the root's alignment; the root's own header
    /// comes first.
    pub fn required_root_bytes(&self) -> Option<usize> {
        let block = |size: usize| {
            let raw = HEADER_BYTES
                .checked_add(size)?
                .checked_add(DEFAULT_ALIGNMENT)?;
            align_up(raw, DEFAULT_ALIGNMENT)
        };
        block(self.persistent_arena_bytes)?
            .checked_add(block(self.frame_arena_bytes)?)?
            .checked_add(HEADER_BYTES)
    }

    /// Check structural invariants.
    ///
    /// The reservation is compared before backend rounding, so a config
    /// that validates always fits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persistent_arena_bytes == 0 {
            return Err(ConfigError::ZeroArena {
                arena: "persistent",
            });
        }
        if self.frame_arena_bytes == 0 {
            return Err(ConfigError::ZeroArena { arena: "frame" });
        }
        let required = self
            .required_root_bytes()
            .ok_or(ConfigError::SizeOverflow)?;
        if required > self.root.reserve_bytes {
            return Err(ConfigError::ArenasExceedReserve {
                required,
                reserve: self.root.reserve_bytes,
            });
        }
        if self.manager.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.module_paths.len() > self.manager.capacity {
            return Err(ConfigError::TooManyModules {
                count: self.module_paths.len(),
                capacity: self.manager.capacity,
            });
        }
        if self.manager.entry_symbol.is_empty() {
            return Err(ConfigError::EmptyEntrySymbol);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: RootConfig::default(),
            persistent_arena_bytes: Self::DEFAULT_PERSISTENT_BYTES,
            frame_arena_bytes: Self::DEFAULT_FRAME_BYTES,
            module_paths: Vec::new(),
            hot_reload: true,
            manager: ManagerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::KIB;

    #[test]
    fn default_config_validates() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_arenas_rejected() {
        let config = EngineConfig {
            frame_arena_bytes: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroArena { arena: "frame" })
        );
    }

    #[test]
    fn arenas_must_fit_reservation() {
        let config = EngineConfig {
            root: RootConfig::new(64 * KIB, 0),
            persistent_arena_bytes: 32 * KIB,
            frame_arena_bytes: 32 * KIB,
            ..EngineConfig::default()
        };
        let required = 32 * KIB * 2 + 3 * HEADER_BYTES + 2 * DEFAULT_ALIGNMENT;
        assert_eq!(config.required_root_bytes(), Some(required));
        assert_eq!(
            config.validate(),
            Err(ConfigError::ArenasExceedReserve {
                required,
                reserve: 64 * KIB,
            })
        );
    }

    #[test]
    fn overflowing_sizes_rejected() {
        let config = EngineConfig {
            persistent_arena_bytes: usize::MAX,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::SizeOverflow));
    }

    #[test]
    fn module_list_must_fit_capacity() {
        let mut config = EngineConfig {
            manager: ManagerConfig {
                capacity: 1,
                ..ManagerConfig::default()
            },
            ..EngineConfig::default()
        }
        .with_module("a.so");
        assert_eq!(config.validate(), Ok(()));
        config = config.with_module("b.so");
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyModules {
                count: 2,
                capacity: 1,
            })
        );
    }

    #[test]
    fn empty_entry_symbol_rejected() {
        let mut config = EngineConfig::default();
        config.manager.entry_symbol.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyEntrySymbol));
    }
}
