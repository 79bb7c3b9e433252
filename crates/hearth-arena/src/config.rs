//! Root arena sizing.

use hearth_core::MIB;

/// Bytes set aside at the start of every arena's block ahead of its
/// usable region.
///
/// The header counts against the parent allocation (or the root's
/// reservation) but never against the arena's own capacity.
pub const HEADER_BYTES: usize = 64;

/// Sizing for a virtual root arena.
///
/// Both values are rounded up by the backend's units at creation:
/// `reserve_bytes` to the allocation granularity, `commit_bytes` to the
/// page size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootConfig {
    /// Address space to reserve.
    ///
    /// Default: 64 MiB.
    pub reserve_bytes: usize,

    /// Memory to commit up front. Zero means one granularity unit.
    ///
    /// Default: 0.
    pub commit_bytes: usize,
}

impl RootConfig {
    /// Default reservation: 64 MiB.
    pub const DEFAULT_RESERVE: usize = 64 * MIB;

    /// Default initial commit (one granularity unit).
    pub const DEFAULT_COMMIT: usize = 0;

    /// Create a root config with explicit sizes.
    pub fn new(reserve_bytes: usize, commit_bytes: usize) -> Self {
        Self {
            reserve_bytes,
            commit_bytes,
        }
    }
}

impl Default for RootConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RESERVE, Self::DEFAULT_COMMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reserve_is_64mb() {
        let config = RootConfig::default();
        assert_eq!(config.reserve_bytes, 64 * 1024 * 1024);
        assert_eq!(config.commit_bytes, 0);
    }
}
