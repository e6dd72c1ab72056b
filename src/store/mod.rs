//! Storage layer: durable adapter, dirty cache, strategies, trie store.

pub mod dirty_cache;
pub mod kv;
pub mod read_only;
pub mod strategy;
pub mod trie_store;

pub use dirty_cache::{DirtyCache, PendingBlock, StagedNode};
pub use kv::{keys, BatchOp, KeyValueStore, MemoryStore, WritePriority};
pub use read_only::ReadOnlyTrieStore;
pub use strategy::{PersistenceStrategy, PruningStrategy};
pub use trie_store::{ReorgBoundaryCallback, StoreConfig, StoreError, TreeKind, TrieStore};
