//! The trie store: block-indexed commit protocol over the dirty cache,
//! durable adapter, and diff history.
//!
//! A single writer drives the store through `commit` / `finish_block`.
//! Mutations stage into one open [`PendingBlock`]; sealing it pushes the
//! block into the dirty cache, from where capacity limits, the pruning
//! strategy and the persistence strategy decide when it reaches durable
//! storage. Persisting a block also records its forward and reverse diff
//! layers, which power `rollback_head` and `move_to_state_root`.

use std::sync::Arc;

use hashbrown::HashMap;
use primitive_types::H256;
use rayon::prelude::*;
use rustc_hash::FxBuildHasher;
use thiserror::Error;
use tracing::debug;

use super::dirty_cache::{DirtyCache, PendingBlock, StagedNode};
use super::kv::{keys, BatchOp, KeyValueStore, MemoryStore, WritePriority};
use super::read_only::ReadOnlyTrieStore;
use super::strategy::{PersistenceStrategy, PruningStrategy};
use crate::history::{DiffLayer, HistoryError, HistoryStore, RootEntry, StateRootIndex};
use crate::trie::{keccak256, Node, TriePath, EMPTY_ROOT};

type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Which trie a `finish_block` call closes.
///
/// Storage tries finish into the same pending block as the state trie;
/// only the state finish seals the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeKind {
    State,
    Storage,
}

/// Trie store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("block {0} was already finalized")]
    DuplicateBlockCommit(u64),
    #[error("node {0:?} not found")]
    NodeNotFound(H256),
    #[error("diff base mismatch: store is at block {expected}, layer starts at {actual}")]
    DiffBaseMismatch { expected: u64, actual: u64 },
    #[error("unknown state root {0:?}")]
    UnknownStateRoot(H256),
    #[error("persisted state root is absent from the root index")]
    CorruptedRootIndex,
    #[error("block {open} is open, got a commit for block {given}")]
    BlockSequence { open: u64, given: u64 },
    #[error("staged node content does not hash to {0:?}")]
    CorruptedNode(H256),
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Callback invoked when a block number falls behind the reorg boundary.
pub type ReorgBoundaryCallback = Box<dyn Fn(u64) + Send + Sync>;

/// Store construction parameters.
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Hard cap on finalized blocks held in the dirty cache.
    pub max_cached_blocks: usize,
    /// When to shed cached blocks under memory pressure.
    pub pruning: PruningStrategy,
    /// Which finished blocks reach durable storage.
    pub persistence: PersistenceStrategy,
    /// Confirmation depth: persisting block N announces boundary N - depth.
    pub reorg_depth: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_cached_blocks: 128,
            pruning: PruningStrategy::Disabled,
            persistence: PersistenceStrategy::Archive,
            reorg_depth: 1,
        }
    }
}

/// Content-addressed trie node store with block-level durability control.
pub struct TrieStore {
    store: Arc<dyn KeyValueStore>,
    config: StoreConfig,
    /// The open mutation set, if any. At most one block is open at a time.
    batch: Option<PendingBlock>,
    cache: DirtyCache,
    history: HistoryStore,
    index: StateRootIndex,
    state_root: H256,
    persisted_block: Option<u64>,
    last_finalized: Option<u64>,
    reorg_callbacks: Vec<ReorgBoundaryCallback>,
}

impl TrieStore {
    /// Opens a store over the given adapter, resuming persisted state.
    ///
    /// A recorded persisted root that the root index cannot resolve is a
    /// fatal inconsistency, not an empty database.
    pub fn new(store: Arc<dyn KeyValueStore>, config: StoreConfig) -> Result<Self> {
        let history = HistoryStore::new(store.clone());
        let index = StateRootIndex::new(store.clone());

        let persisted_block = store
            .get(&keys::meta_persisted_block())
            .filter(|b| b.len() == 8)
            .map(|b| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&b);
                u64::from_le_bytes(buf)
            });
        let state_root = store
            .get(&keys::meta_persisted_root())
            .filter(|b| b.len() == 32)
            .map(|b| H256::from_slice(&b))
            .unwrap_or(EMPTY_ROOT);

        if state_root != EMPTY_ROOT && matches!(index.lookup(&state_root), RootEntry::Missing) {
            return Err(StoreError::CorruptedRootIndex);
        }

        Ok(Self {
            store,
            config,
            batch: None,
            cache: DirtyCache::new(),
            history,
            index,
            state_root,
            persisted_block,
            last_finalized: persisted_block,
            reorg_callbacks: Vec::new(),
        })
    }

    /// Opens a store over a fresh in-memory adapter.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Stages a node under `path` for the given block.
    ///
    /// Opens the pending block on first use; committing for a different
    /// block while one is open is a sequencing error. Returns the node's
    /// content hash.
    pub fn commit(
        &mut self,
        block_number: u64,
        path: TriePath,
        node: Node,
        priority: WritePriority,
    ) -> Result<H256> {
        let batch = self
            .batch
            .get_or_insert_with(|| PendingBlock::new(block_number));
        if batch.block_number() != block_number {
            return Err(StoreError::BlockSequence {
                open: batch.block_number(),
                given: block_number,
            });
        }
        Ok(batch.stage(path, node, priority))
    }

    /// Closes the commit phase of `block_number` for one trie.
    ///
    /// Storage finishes only validate sequencing; the `State` finish seals
    /// the whole block: staged hashes are re-verified, the block enters
    /// the dirty cache, the root index learns `root`, and then capacity,
    /// pruning and persistence rules run.
    pub fn finish_block(
        &mut self,
        tree: TreeKind,
        block_number: u64,
        root: H256,
        _priority: WritePriority,
    ) -> Result<()> {
        if let Some(last) = self.last_finalized {
            if block_number <= last {
                return Err(StoreError::DuplicateBlockCommit(block_number));
            }
        }
        if let Some(open) = &self.batch {
            if open.block_number() != block_number {
                return Err(StoreError::BlockSequence {
                    open: open.block_number(),
                    given: block_number,
                });
            }
        }
        if tree == TreeKind::Storage {
            return Ok(());
        }

        let batch = self
            .batch
            .take()
            .unwrap_or_else(|| PendingBlock::new(block_number));
        Self::verify_sealed(&batch)?;

        debug!(
            block = block_number,
            nodes = batch.len(),
            bytes = batch.memory_used(),
            "finished block"
        );
        self.cache.push(batch);
        self.state_root = root;
        self.index.record(&root, block_number);
        self.last_finalized = Some(block_number);

        self.run_maintenance(block_number)
    }

    /// Checks every staged node still matches the hash it was indexed by.
    fn verify_sealed(batch: &PendingBlock) -> Result<()> {
        let entries: Vec<&StagedNode> = batch.iter().collect();
        if let Some(bad) = entries
            .par_iter()
            .find_any(|staged| staged.node.hash() != staged.hash)
        {
            return Err(StoreError::CorruptedNode(bad.hash));
        }
        Ok(())
    }

    fn run_maintenance(&mut self, block_number: u64) -> Result<()> {
        if self.config.persistence.should_persist(block_number) {
            self.persist_up_to(block_number)?;
        }
        while self.cache.block_count() > self.config.max_cached_blocks {
            // capacity eviction persists unconditionally, the block would
            // otherwise become unreachable
            if let Some(oldest) = self.cache.oldest_block() {
                debug!(block = oldest, "dirty cache at capacity");
                self.persist_up_to(oldest)?;
            }
        }
        while self
            .config
            .pruning
            .should_prune(self.cache.memory_used(), self.cache.block_count())
        {
            let Some(oldest) = self.cache.oldest_block() else {
                break;
            };
            if self.config.persistence.should_persist(oldest) {
                self.persist_up_to(oldest)?;
            } else if let Some(dropped) = self.cache.pop_oldest() {
                debug!(
                    block = dropped.block_number(),
                    bytes = dropped.memory_used(),
                    "pruned unpersisted block"
                );
            }
        }
        Ok(())
    }

    /// Drains every cached block up to `target` into durable storage as a
    /// single persistence event with one forward/reverse diff pair.
    fn persist_up_to(&mut self, target: u64) -> Result<()> {
        let from = self.persisted_block.unwrap_or(0);

        let mut latest: FastHashMap<TriePath, (H256, Node, WritePriority)> =
            FastHashMap::with_hasher(FxBuildHasher);
        let mut to = None;
        while self.cache.oldest_block().is_some_and(|b| b <= target) {
            if let Some(block) = self.cache.pop_oldest() {
                to = Some(block.block_number());
                for staged in block.into_sorted_entries() {
                    latest.insert(staged.path, (staged.hash, staged.node, staged.priority));
                }
            }
        }
        let Some(to) = to else {
            return Ok(());
        };

        let mut entries: Vec<(TriePath, (H256, Node, WritePriority))> =
            latest.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut forward = DiffLayer::new(from, to);
        let mut reverse = DiffLayer::new(to, from);
        let mut normal_ops: Vec<BatchOp> = Vec::new();
        let mut low_ops: Vec<BatchOp> = Vec::new();
        for (path, (hash, node, priority)) in entries {
            let encoded = node.encode();
            reverse
                .entries
                .push((path.clone(), self.store.get(&keys::head(&path))));
            forward.entries.push((path.clone(), Some(encoded.clone())));
            let ops = match priority {
                WritePriority::Normal => &mut normal_ops,
                WritePriority::Low => &mut low_ops,
            };
            ops.push((keys::node(&hash), Some(encoded.clone())));
            ops.push((keys::head(&path), Some(encoded)));
        }
        if !normal_ops.is_empty() {
            self.store.write_batch(normal_ops, WritePriority::Normal);
        }
        if !low_ops.is_empty() {
            self.store.write_batch(low_ops, WritePriority::Low);
        }
        self.history.insert_diff(to, &forward, &reverse);
        self.set_persisted(to);
        debug!(from, to, "persisted dirty blocks");
        self.announce_reorg_boundary(to);
        Ok(())
    }

    fn set_persisted(&mut self, block: u64) {
        self.persisted_block = Some(block);
        self.store.set(
            &keys::meta_persisted_block(),
            block.to_le_bytes().to_vec(),
            WritePriority::Normal,
        );
        let root = self.index.root_of_block(block).unwrap_or(self.state_root);
        self.store.set(
            &keys::meta_persisted_root(),
            root.as_bytes().to_vec(),
            WritePriority::Normal,
        );
    }

    fn announce_reorg_boundary(&self, persisted: u64) {
        let depth = self.config.reorg_depth;
        if persisted >= depth {
            let boundary = persisted - depth;
            debug!(boundary, "reorg boundary reached");
            for callback in &self.reorg_callbacks {
                callback(boundary);
            }
        }
    }

    /// Registers a callback fired when the reorg boundary advances.
    ///
    /// Announcements are point in time; a late subscriber does not see
    /// past boundaries.
    pub fn subscribe_reorg_boundary<F>(&mut self, callback: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.reorg_callbacks.push(Box::new(callback));
    }

    /// Looks a node up by hash: open batch, then cached blocks newest
    /// first, then durable storage, then the head state under `path`.
    ///
    /// A total miss is [`Node::Unknown`], never an error.
    pub fn find(&self, path: &TriePath, hash: &H256) -> Node {
        if let Some(batch) = &self.batch {
            if let Some(staged) = batch.get_by_hash(hash) {
                return staged.node.clone();
            }
        }
        if let Some(staged) = self.cache.find_node(hash) {
            return staged.node.clone();
        }
        if let Some(bytes) = self.store.get(&keys::node(hash)) {
            if let Ok(node) = Node::decode(&bytes) {
                return node;
            }
        }
        // head state moved by diff application may hold content whose
        // hash key was written under an earlier persistence run
        if let Some(bytes) = self.store.get(&keys::head(path)) {
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
        if let Some(batch) = &self.batch {
            if let Some(staged) = batch.get_by_hash(hash) {
                return Ok(staged.node.encode());
            }
        }
        if let Some(staged) = self.cache.find_node(hash) {
            return Ok(staged.node.encode());
        }
        self.store
            .get(&keys::node(hash))
            .ok_or(StoreError::NodeNotFound(*hash))
    }

    /// Writes externally recovered node content under its hash.
    ///
    /// Used by network recovery after a winning response is validated;
    /// node content is append only, so this can never conflict with
    /// writer activity.
    pub fn persist_recovered(&self, hash: &H256, bytes: Vec<u8>) {
        self.store.set(&keys::node(hash), bytes, WritePriority::Normal);
    }

    /// The state root of the latest finalized block.
    pub fn state_root(&self) -> H256 {
        self.state_root
    }

    /// The last block written to durable storage, if any.
    pub fn persisted_block(&self) -> Option<u64> {
        self.persisted_block
    }

    /// Accounted dirty cache bytes, open batch included.
    pub fn memory_used(&self) -> usize {
        self.cache.memory_used() + self.batch.as_ref().map_or(0, |b| b.memory_used())
    }

    /// Discards the newest head block.
    ///
    /// An open batch is dropped first. Otherwise the newest cached block
    /// is popped; with an empty cache the last persisted block is undone
    /// by applying its reverse diff to durable state.
    pub fn rollback_head(&mut self) -> Result<()> {
        if self.batch.take().is_some() {
            debug!("discarded open pending block");
            return Ok(());
        }
        if let Some(block) = self.cache.pop_newest() {
            let popped = block.block_number();
            let head = self.cache.newest_block().or(self.persisted_block);
            self.last_finalized = head;
            self.state_root = head
                .and_then(|b| self.index.root_of_block(b))
                .unwrap_or(EMPTY_ROOT);
            debug!(block = popped, "rolled back cached block");
            return Ok(());
        }
        if let Some(persisted) = self.persisted_block {
            let reverse = self.history.reverse_diff(persisted)?;
            self.apply_layer_to_storage(&reverse);
            self.set_persisted(reverse.to_block);
            self.last_finalized = Some(reverse.to_block);
            self.state_root = self
                .index
                .root_of_block(reverse.to_block)
                .unwrap_or(EMPTY_ROOT);
            self.store.set(
                &keys::meta_persisted_root(),
                self.state_root.as_bytes().to_vec(),
                WritePriority::Normal,
            );
            debug!(block = persisted, "rolled back persisted block");
        }
        Ok(())
    }

    /// Applies a diff layer to durable state.
    ///
    /// The layer must start exactly at the current persisted block;
    /// anything else corrupts the head state.
    pub fn apply_diff(&mut self, layer: &DiffLayer) -> Result<()> {
        let current = self.persisted_block.unwrap_or(0);
        if layer.from_block != current {
            return Err(StoreError::DiffBaseMismatch {
                expected: current,
                actual: layer.from_block,
            });
        }
        self.apply_layer_to_storage(layer);
        self.set_persisted(layer.to_block);
        self.last_finalized = Some(layer.to_block);
        self.state_root = self
            .index
            .root_of_block(layer.to_block)
            .unwrap_or(EMPTY_ROOT);
        self.store.set(
            &keys::meta_persisted_root(),
            self.state_root.as_bytes().to_vec(),
            WritePriority::Normal,
        );
        debug!(from = layer.from_block, to = layer.to_block, "applied diff");
        Ok(())
    }

    fn apply_layer_to_storage(&self, layer: &DiffLayer) {
        let mut ops: Vec<BatchOp> = Vec::with_capacity(layer.entries.len() * 2);
        for (path, value) in &layer.entries {
            match value {
                Some(bytes) => {
                    // node content is append only, head state moves
                    ops.push((keys::node(&keccak256(bytes)), Some(bytes.clone())));
                    ops.push((keys::head(path), Some(bytes.clone())));
                }
                None => ops.push((keys::head(path), None)),
            }
        }
        self.store.write_batch(ops, WritePriority::Normal);
    }

    /// One layer spanning two persisted blocks, in either direction.
    pub fn get_diff(&self, from_block: u64, to_block: u64) -> Result<DiffLayer> {
        Ok(self.history.get_diff(from_block, to_block)?)
    }

    /// Moves durable state to the block committing to `root`.
    ///
    /// Already being at `root`, or targeting the empty tree, is a no-op
    /// with no storage traffic at all.
    pub fn move_to_state_root(&mut self, root: &H256) -> Result<()> {
        if *root == self.state_root || *root == EMPTY_ROOT || root.is_zero() {
            return Ok(());
        }
        let to = match self.index.lookup(root) {
            RootEntry::Block(block) => block,
            RootEntry::EmptyTree => return Ok(()),
            RootEntry::Missing => return Err(StoreError::UnknownStateRoot(*root)),
        };
        let from = self.persisted_block.unwrap_or(0);
        if from == to {
            self.state_root = *root;
            return Ok(());
        }
        debug!(?root, from, to, "moving to state root");
        let layer = self.history.get_diff(from, to)?;
        self.apply_diff(&layer)?;
        self.state_root = *root;
        Ok(())
    }

    /// Creates a read-only view over a point-in-time copy of the store.
    ///
    /// With `store_override` the view reads durable state through the
    /// supplied adapter instead of a snapshot, which lets callers record
    /// or fault-inject the view's storage traffic.
    pub fn as_read_only(
        &self,
        store_override: Option<Arc<dyn KeyValueStore>>,
    ) -> ReadOnlyTrieStore {
        let storage = store_override.unwrap_or_else(|| self.store.snapshot());
        let mut nodes: FastHashMap<H256, StagedNode> = FastHashMap::with_hasher(FxBuildHasher);
        for block in self.cache.iter() {
            for staged in block.iter() {
                nodes.insert(staged.hash, staged.clone());
            }
        }
        if let Some(batch) = &self.batch {
            for staged in batch.iter() {
                nodes.insert(staged.hash, staged.clone());
            }
        }
        ReadOnlyTrieStore::new(storage, nodes, self.state_root)
    }
}
