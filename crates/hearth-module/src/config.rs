//! Module manager configuration.

use hearth_core::abi::ENTRY_SYMBOL;

/// Limits and names used by a [`ModuleManager`](crate::ModuleManager).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Maximum number of slots ever used (slots are not reused).
    ///
    /// Default: 32.
    pub capacity: usize,

    /// Longest accepted module path, in bytes.
    ///
    /// Default: 255.
    pub max_path_len: usize,

    /// Exported symbol resolved to obtain a module's lifecycle interface.
    ///
    /// Default: `"hearth_module_api"`.
    pub entry_symbol: String,
}

impl ManagerConfig {
    /// Default slot capacity.
    pub const DEFAULT_CAPACITY: usize = 32;

    /// Default maximum path length.
    pub const DEFAULT_MAX_PATH_LEN: usize = 255;
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            max_path_len: Self::DEFAULT_MAX_PATH_LEN,
            entry_symbol: ENTRY_SYMBOL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_module_table_limits() {
        let config = ManagerConfig::default();
        assert_eq!(config.capacity, 32);
        assert_eq!(config.max_path_len, 255);
        assert_eq!(config.entry_symbol, "hearth_module_api");
    }
}
