//! Read-only point-in-time view over a trie store.

use std::sync::Arc;

use hashbrown::HashMap;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;

use super::dirty_cache::StagedNode;
use super::kv::{keys, KeyValueStore};
use super::trie_store::{Result, StoreError};
use crate::trie::{keccak256, Node, TriePath};

type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// An immutable snapshot view of a [`TrieStore`](super::TrieStore).
///
/// Holds a copy of the then-cached node set plus a frozen durable
/// adapter, so writer activity after creation never shows through. All
/// lookups return owned values; the view is safe to share across threads.
pub struct ReadOnlyTrieStore {
    storage: Arc<dyn KeyValueStore>,
    nodes: FastHashMap<H256, StagedNode>,
    state_root: H256,
}

impl ReadOnlyTrieStore {
    pub(crate) fn new(
        storage: Arc<dyn KeyValueStore>,
        nodes: FastHashMap<H256, StagedNode>,
        state_root: H256,
    ) -> Self {
        Self {
            storage,
            nodes,
            state_root,
        }
    }

    /// The state root the view was taken at.
    pub fn state_root(&self) -> H256 {
        self.state_root
    }

    /// Looks a node up by hash; total miss is [`Node::Unknown`].
    pub fn find(&self, path: &TriePath, hash: &H256) -> Node {
        if let Some(staged) = self.nodes.get(hash) {
            return staged.node.clone();
        }
        if let Some(bytes) = self.storage.get(&keys::node(hash)) {
            if let Ok(node) = Node::decode(&bytes) {
                return node;
            }
        }
        if let Some(bytes) = self.storage.get(&keys::head(path)) {
            // head content must still be what the hash commits to
            if keccak256(&bytes) == *hash {
                if let Ok(node) = Node::decode(&bytes) {
                    return node;
                }
            }
        }
        Node::Unknown
    }

    /// Loads the raw encoding of a node by hash.
    pub fn load_raw(&self, hash: &H256) -> Result<Vec<u8>> {
        if let Some(staged) = self.nodes.get(hash) {
            return Ok(staged.node.encode());
        }
        self.storage
            .get(&keys::node(hash))
            .ok_or(StoreError::NodeNotFound(*hash))
    }

    /// Number of cached nodes carried by the view.
    pub fn cached_nodes(&self) -> usize {
        self.nodes.len()
    }
}
