//! # stratadb
//!
//! A layered, diff-based authenticated state store for blockchain nodes.
//!
//! ## Architecture
//!
//! State lives in three layers:
//!
//! 1. **Pending block** - the open mutation set the writer is committing
//! 2. **Dirty cache** - finalized blocks held in memory, exact byte
//!    accounting, shed by pruning/persistence strategies
//! 3. **Durable storage** - content-addressed node store plus per-block
//!    forward/reverse diff layers for time travel and reorg handling
//!
//! ## Modules
//!
//! - `trie` - node model: content-addressed nodes, paths, hashing
//! - `store` - dirty cache, strategies, durable adapter, the trie store
//! - `history` - diff layers and the state-root to block index
//! - `sync` - network recovery of missing nodes

pub mod history;
pub mod store;
pub mod sync;
pub mod trie;

pub use history::{DiffLayer, RootEntry};
pub use store::{
    KeyValueStore, MemoryStore, PersistenceStrategy, PruningStrategy, ReadOnlyTrieStore,
    StoreConfig, StoreError, TreeKind, TrieStore, WritePriority,
};
pub use sync::{HealingConfig, HealingTrieStore, NodeDataPeer, NodePeerPool};
pub use trie::{Node, TriePath, EMPTY_ROOT};
