//! Benchmark workloads for the Hearth runtime.
//!
//! Workloads are generated from a seeded ChaCha8 stream so every run
//! measures the same sequence of requests:
//!
//! - [`alloc_workload`]: mixed-size, mixed-alignment allocation requests
//! - [`scratch_forest`]: a root with one bump and one stack arena

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use hearth_arena::{ArenaError, ArenaForest, ArenaId, RootConfig};
use hearth_core::{VirtualMemory, KIB, MIB};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One allocation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocRequest {
    /// Bytes requested, in `1..=max_size`.
    pub size: usize,
    /// Power-of-two alignment, 1 to 64.
    pub alignment: usize,
}

/// Generate `count` requests of at most `max_size` bytes.
pub fn alloc_workload(seed: u64, count: usize, max_size: usize) -> Vec<AllocRequest> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let max_size = max_size.max(1) as u64;
    (0..count)
        .map(|_| AllocRequest {
            size: (rng.next_u64() % max_size) as usize + 1,
            alignment: 1 << (rng.next_u32() % 7),
        })
        .collect()
}

/// Arenas used by the benchmarks.
pub struct ScratchArenas {
    /// The virtual root.
    pub root: ArenaId,
    /// A 1 MiB bump arena.
    pub bump: ArenaId,
    /// A 1 MiB stack arena.
    pub stack: ArenaId,
}

/// Build a forest with a 16 MiB root and two 1 MiB scratch arenas.
pub fn scratch_forest<M: VirtualMemory>(
    memory: M,
) -> Result<(ArenaForest<M>, ScratchArenas), ArenaError> {
    let mut forest = ArenaForest::new(memory);
    let root = forest.create_virtual(&RootConfig::new(16 * MIB, 2 * MIB + 64 * KIB))?;
    let bump = forest.create_bump(root, MIB, 16)?;
    let stack = forest.create_stack(root, MIB, 16)?;
    Ok((forest, ScratchArenas { root, bump, stack }))
}
