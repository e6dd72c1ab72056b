//! Pruning and persistence strategies.
//!
//! Both are plain enum values picked at store construction; the store
//! consults them on every finished block. Disabled pruning keeps every
//! finalized block in memory and is only suitable for small or test
//! scenarios.

/// Decides when the dirty cache must start evicting toward durable storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PruningStrategy {
    /// Never evict; everything stays in memory.
    Disabled,
    /// Evict once the accounted cache bytes exceed the budget.
    MemoryLimit {
        /// Dirty cache memory budget in bytes.
        max_bytes: usize,
    },
}

impl PruningStrategy {
    /// True if the cache must shed its oldest block(s).
    pub fn should_prune(&self, current_memory_bytes: usize, _cache_block_count: usize) -> bool {
        match self {
            PruningStrategy::Disabled => false,
            PruningStrategy::MemoryLimit { max_bytes } => current_memory_bytes > *max_bytes,
        }
    }
}

/// Decides which committed blocks are written to durable storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistenceStrategy {
    /// Persist every block.
    Archive,
    /// Persist every Nth block.
    Interval {
        /// Persist when `block_number % every == 0`.
        every: u64,
    },
    /// Never persist explicitly; durability comes only from forced
    /// capacity eviction.
    NoPersistence,
}

impl PersistenceStrategy {
    /// True if the given block should be written to durable storage.
    pub fn should_persist(&self, block_number: u64) -> bool {
        match self {
            PersistenceStrategy::Archive => true,
            PersistenceStrategy::Interval { every } => {
                *every != 0 && block_number % every == 0
            }
            PersistenceStrategy::NoPersistence => false,
        }
    }
}
