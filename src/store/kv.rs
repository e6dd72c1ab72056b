//! Durable storage adapter: a thin key to bytes store.
//!
//! The trie layer never talks to a device directly; everything durable goes
//! through [`KeyValueStore`]. The adapter must support concurrent reads
//! while the writer persists, so all methods take `&self` and
//! implementations use interior locking.

use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use std::sync::Arc;

type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Priority hint forwarded to the adapter on writes.
///
/// Low-priority writes come from background persistence and may be
/// scheduled behind foreground traffic by the adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WritePriority {
    #[default]
    Normal,
    Low,
}

/// A single batched operation: `None` value means removal.
pub type BatchOp = (Vec<u8>, Option<Vec<u8>>);

/// Thin durable key to bytes store.
///
/// Physical deletion policy is owned by the adapter; the trie layer only
/// ever issues the operations below.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Writes a value.
    fn set(&self, key: &[u8], value: Vec<u8>, priority: WritePriority);

    /// Removes a value.
    fn remove(&self, key: &[u8]);

    /// Applies a batch of writes/removals.
    fn write_batch(&self, ops: Vec<BatchOp>, priority: WritePriority) {
        for (key, value) in ops {
            match value {
                Some(v) => self.set(&key, v, priority),
                None => self.remove(&key),
            }
        }
    }

    /// Returns an independent point-in-time copy of the store's contents.
    ///
    /// Read-only views are bound to such snapshots so later writer
    /// activity stays invisible to them.
    fn snapshot(&self) -> Arc<dyn KeyValueStore>;
}

/// In-memory reference adapter backed by a hash map.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<FastHashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    fn set(&self, key: &[u8], value: Vec<u8>, _priority: WritePriority) {
        self.data.write().insert(key.to_vec(), value);
    }

    fn remove(&self, key: &[u8]) {
        self.data.write().remove(key);
    }

    fn snapshot(&self) -> Arc<dyn KeyValueStore> {
        let copy = MemoryStore::default();
        {
            let mut dst = copy.data.write();
            for (k, v) in self.data.read().iter() {
                dst.insert(k.clone(), v.clone());
            }
        }
        Arc::new(copy)
    }
}

/// Key layout for everything the store persists through the adapter.
///
/// Each namespace gets a one-byte prefix so a single adapter can host
/// node content, head state, diff layers and the root index side by side.
pub mod keys {
    use primitive_types::H256;

    use crate::trie::TriePath;

    const NODE: u8 = b'n';
    const HEAD: u8 = b'h';
    const DIFF_FORWARD: u8 = b'f';
    const DIFF_REVERSE: u8 = b'r';
    const ROOT_TO_BLOCK: u8 = b'R';
    const BLOCK_TO_ROOT: u8 = b'B';
    const META: u8 = b'm';

    /// Node content keyed by hash.
    pub fn node(hash: &H256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(NODE);
        key.extend_from_slice(hash.as_bytes());
        key
    }

    /// Current head-state content keyed by path.
    pub fn head(path: &TriePath) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + path.len());
        key.push(HEAD);
        key.extend_from_slice(path.as_bytes());
        key
    }

    /// Forward diff layer for a persisted block.
    pub fn forward_diff(block: u64) -> Vec<u8> {
        let mut key = vec![DIFF_FORWARD];
        key.extend_from_slice(&block.to_be_bytes());
        key
    }

    /// Reverse diff layer for a persisted block.
    pub fn reverse_diff(block: u64) -> Vec<u8> {
        let mut key = vec![DIFF_REVERSE];
        key.extend_from_slice(&block.to_be_bytes());
        key
    }

    /// Root-hash to block-number index entry.
    pub fn root_to_block(root: &H256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(ROOT_TO_BLOCK);
        key.extend_from_slice(root.as_bytes());
        key
    }

    /// Block-number to root-hash index entry.
    pub fn block_to_root(block: u64) -> Vec<u8> {
        let mut key = vec![BLOCK_TO_ROOT];
        key.extend_from_slice(&block.to_be_bytes());
        key
    }

    /// Store metadata: last fully persisted block.
    pub fn meta_persisted_block() -> Vec<u8> {
        vec![META, b'p']
    }

    /// Store metadata: state root at the last persisted block.
    pub fn meta_persisted_root() -> Vec<u8> {
        vec![META, b'r']
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set(b"key", b"value".to_vec(), WritePriority::Normal);
        assert_eq!(store.get(b"key"), Some(b"value".to_vec()));

        store.remove(b"key");
        assert!(store.get(b"key").is_none());
    }

    #[test]
    fn test_write_batch() {
        let store = MemoryStore::new();
        store.set(b"gone", b"x".to_vec(), WritePriority::Normal);

        store.write_batch(
            vec![
                (b"a".to_vec(), Some(b"1".to_vec())),
                (b"b".to_vec(), Some(b"2".to_vec())),
                (b"gone".to_vec(), None),
            ],
            WritePriority::Low,
        );

        assert_eq!(store.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b"), Some(b"2".to_vec()));
        assert!(store.get(b"gone").is_none());
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let store = MemoryStore::new();
        store.set(b"k", b"v1".to_vec(), WritePriority::Normal);

        let snap = store.snapshot();
        store.set(b"k", b"v2".to_vec(), WritePriority::Normal);
        store.set(b"new", b"x".to_vec(), WritePriority::Normal);

        assert_eq!(snap.get(b"k"), Some(b"v1".to_vec()));
        assert!(snap.get(b"new").is_none());
        assert_eq!(store.get(b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_key_namespaces_disjoint() {
        use crate::trie::TriePath;
        use primitive_types::H256;

        let h = H256::repeat_byte(7);
        let p = TriePath::from_bytes(h.as_bytes());
        assert_ne!(keys::node(&h), keys::head(&p));
        assert_ne!(keys::forward_diff(1), keys::reverse_diff(1));
        assert_ne!(keys::root_to_block(&h), keys::node(&h));
    }
}
