//! Historical diff store and the state-root to block-number index.
//!
//! Every persisted block leaves behind a forward and a reverse diff layer
//! in the durable adapter, keyed by the persisted block number. Composing
//! consecutive layers yields a single layer spanning any two persisted
//! states, in either time direction.

use std::sync::Arc;

use hashbrown::HashMap;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;
use thiserror::Error;

use super::diff::{DiffCodecError, DiffLayer};
use crate::store::kv::{keys, KeyValueStore, WritePriority};
use crate::trie::{TriePath, EMPTY_ROOT};

/// History layer errors.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("no diff stored for block {0}")]
    MissingDiff(u64),
    #[error("stored diff for block {block} spans {found_from}..{found_to}, expected base {expected_from}")]
    BrokenChain {
        block: u64,
        found_from: u64,
        found_to: u64,
        expected_from: u64,
    },
    #[error("diff codec error: {0}")]
    Codec(#[from] DiffCodecError),
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Result of resolving a state root through the index.
///
/// An unmapped root is a distinct signal from the empty-tree root; the
/// two must never be conflated (an unknown root over non-empty storage
/// indicates corruption, the empty root is simply genesis).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootEntry {
    /// The root commits to the state after this block.
    Block(u64),
    /// The canonical empty-tree root.
    EmptyTree,
    /// The root is not present in the index.
    Missing,
}

/// Durable bidirectional root-hash to block-number index.
pub struct StateRootIndex {
    store: Arc<dyn KeyValueStore>,
}

impl StateRootIndex {
    /// Creates an index over the given adapter.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Resolves a root hash to its block number.
    pub fn lookup(&self, root: &H256) -> RootEntry {
        if *root == EMPTY_ROOT || root.is_zero() {
            return RootEntry::EmptyTree;
        }
        match self.store.get(&keys::root_to_block(root)) {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                RootEntry::Block(u64::from_le_bytes(buf))
            }
            // a present-but-malformed entry reads as missing; the store
            // escalates that during initialization
            Some(_) => RootEntry::Missing,
            None => RootEntry::Missing,
        }
    }

    /// Resolves a block number back to its root hash.
    pub fn root_of_block(&self, block: u64) -> Option<H256> {
        self.store
            .get(&keys::block_to_root(block))
            .filter(|b| b.len() == 32)
            .map(|b| H256::from_slice(&b))
    }

    /// Records both directions of the mapping.
    pub fn record(&self, root: &H256, block: u64) {
        if *root == EMPTY_ROOT || root.is_zero() {
            return;
        }
        self.store.set(
            &keys::root_to_block(root),
            block.to_le_bytes().to_vec(),
            WritePriority::Normal,
        );
        self.store.set(
            &keys::block_to_root(block),
            root.as_bytes().to_vec(),
            WritePriority::Normal,
        );
    }
}

/// Per-block forward/reverse diff layers in durable storage.
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
}

impl HistoryStore {
    /// Creates a history store over the given adapter.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Records the diff pair produced by persisting a block.
    pub fn insert_diff(&self, block: u64, forward: &DiffLayer, reverse: &DiffLayer) {
        self.store.set(
            &keys::forward_diff(block),
            forward.encode(),
            WritePriority::Low,
        );
        self.store.set(
            &keys::reverse_diff(block),
            reverse.encode(),
            WritePriority::Low,
        );
    }

    /// Loads the forward diff persisted for `block`.
    pub fn forward_diff(&self, block: u64) -> Result<DiffLayer> {
        let bytes = self
            .store
            .get(&keys::forward_diff(block))
            .ok_or(HistoryError::MissingDiff(block))?;
        Ok(DiffLayer::decode(&bytes)?)
    }

    /// Loads the reverse diff persisted for `block`.
    pub fn reverse_diff(&self, block: u64) -> Result<DiffLayer> {
        let bytes = self
            .store
            .get(&keys::reverse_diff(block))
            .ok_or(HistoryError::MissingDiff(block))?;
        Ok(DiffLayer::decode(&bytes)?)
    }

    /// Returns one layer spanning `from_block` to `to_block`.
    ///
    /// Direction is inferred from the ordering. Stored single-block
    /// layers are composed in application order; the last write to a
    /// path wins, which matches applying the layers one by one.
    pub fn get_diff(&self, from_block: u64, to_block: u64) -> Result<DiffLayer> {
        let mut composed = DiffLayer::new(from_block, to_block);
        if from_block == to_block {
            return Ok(composed);
        }

        let mut merged: HashMap<TriePath, Option<Vec<u8>>, FxBuildHasher> =
            HashMap::with_hasher(FxBuildHasher);
        let mut order: Vec<TriePath> = Vec::new();

        if from_block < to_block {
            // forward: walk persisted layers upward, chained by their
            // recorded base blocks (persistence may skip block numbers)
            let mut base = from_block;
            while base < to_block {
                let layer = self.forward_diff_above(base, to_block)?;
                let next = layer.to_block;
                for (path, value) in layer.entries {
                    if !merged.contains_key(&path) {
                        order.push(path.clone());
                    }
                    merged.insert(path, value);
                }
                base = next;
            }
        } else {
            // reverse: apply each block's reverse layer from newest down
            let mut at = from_block;
            while at > to_block {
                let layer = self.reverse_diff(at)?;
                if layer.from_block != at || layer.to_block >= at {
                    return Err(HistoryError::BrokenChain {
                        block: at,
                        found_from: layer.from_block,
                        found_to: layer.to_block,
                        expected_from: at,
                    });
                }
                let next = layer.to_block;
                for (path, value) in layer.entries {
                    if !merged.contains_key(&path) {
                        order.push(path.clone());
                    }
                    merged.insert(path, value);
                }
                at = next.max(to_block);
            }
        }

        for path in order {
            if let Some(value) = merged.remove(&path) {
                composed.entries.push((path, value));
            }
        }
        Ok(composed)
    }

    /// Finds the forward layer whose base is `base`, i.e. the diff of the
    /// next persisted block after it.
    fn forward_diff_above(&self, base: u64, limit: u64) -> Result<DiffLayer> {
        // persisted blocks are sparse under interval persistence, so scan
        // upward for the next stored layer; its recorded base must match
        for candidate in (base + 1)..=limit {
            if let Some(bytes) = self.store.get(&keys::forward_diff(candidate)) {
                let layer = DiffLayer::decode(&bytes)?;
                if layer.from_block != base {
                    return Err(HistoryError::BrokenChain {
                        block: candidate,
                        found_from: layer.from_block,
                        found_to: layer.to_block,
                        expected_from: base,
                    });
                }
                return Ok(layer);
            }
        }
        Err(HistoryError::MissingDiff(base + 1))
    }
}
