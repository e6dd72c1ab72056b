//! Dirty cache: pending mutations and finalized-but-not-durable blocks.
//!
//! One [`PendingBlock`] is open at a time, collecting the node mutations
//! proposed for a block. Finalized blocks queue up in the [`DirtyCache`]
//! (oldest first) until eviction or persistence drains them. Accounted
//! memory is the exact sum of staged node sizes; restaging a path within
//! a block replaces the previous entry and adjusts the sum by the delta.

use std::collections::VecDeque;

use hashbrown::HashMap;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;

use super::kv::WritePriority;
use crate::trie::{Node, TriePath};

type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// A node staged under a pending block.
#[derive(Clone, Debug)]
pub struct StagedNode {
    /// Path the node was committed under.
    pub path: TriePath,
    /// The sealed node content.
    pub node: Node,
    /// Write priority to forward when this node is persisted.
    pub priority: WritePriority,
    /// Content hash computed at staging time.
    pub hash: H256,
}

/// The open (or finalized) mutation set for a single block number.
///
/// The primary map is path-keyed: every touched path keeps its own entry
/// even when several paths hold identical node content (identical
/// subtrees share a hash). The hash index is a secondary, multi-valued
/// view for content lookups.
pub struct PendingBlock {
    block_number: u64,
    by_path: FastHashMap<TriePath, StagedNode>,
    by_hash: FastHashMap<H256, Vec<TriePath>>,
    memory: usize,
}

impl PendingBlock {
    /// Creates an empty pending block.
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            by_path: FastHashMap::with_hasher(FxBuildHasher),
            by_hash: FastHashMap::with_hasher(FxBuildHasher),
            memory: 0,
        }
    }

    /// The block number this set belongs to.
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Stages a node under its path; the latest staging for a path wins.
    ///
    /// Returns the node's content hash.
    pub fn stage(&mut self, path: TriePath, node: Node, priority: WritePriority) -> H256 {
        let hash = node.hash();
        self.memory += node.memory_size();
        let staged = StagedNode {
            path: path.clone(),
            node,
            priority,
            hash,
        };
        if let Some(old) = self.by_path.insert(path.clone(), staged) {
            self.memory -= old.node.memory_size();
            if old.hash != hash {
                if let Some(paths) = self.by_hash.get_mut(&old.hash) {
                    paths.retain(|p| p != &path);
                    if paths.is_empty() {
                        self.by_hash.remove(&old.hash);
                    }
                }
            }
        }
        let paths = self.by_hash.entry(hash).or_default();
        if !paths.iter().any(|p| p == &path) {
            paths.push(path);
        }
        hash
    }

    /// Looks up a staged node by content hash.
    ///
    /// When several paths carry the same content, any of them serves; the
    /// content behind the hash is identical by construction.
    pub fn get_by_hash(&self, hash: &H256) -> Option<&StagedNode> {
        self.by_hash
            .get(hash)
            .and_then(|paths| paths.first())
            .and_then(|p| self.by_path.get(p))
    }

    /// Looks up the latest staged node for a path.
    pub fn get_by_path(&self, path: &TriePath) -> Option<&StagedNode> {
        self.by_path.get(path)
    }

    /// Exact accounted bytes of all staged nodes.
    pub fn memory_used(&self) -> usize {
        self.memory
    }

    /// Number of staged paths.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// True if nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Iterates over all staged nodes, one per path.
    pub fn iter(&self) -> impl Iterator<Item = &StagedNode> {
        self.by_path.values()
    }

    /// Consumes the block, yielding its entries ordered by path.
    ///
    /// Path order makes persistence deterministic across runs.
    pub fn into_sorted_entries(self) -> Vec<StagedNode> {
        let mut entries: Vec<StagedNode> = self.by_path.into_values().collect();
        entries.sort_unstable_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}

/// Ordered collection of finalized blocks not yet durable, oldest first.
#[derive(Default)]
pub struct DirtyCache {
    blocks: VecDeque<PendingBlock>,
    memory: usize,
}

impl DirtyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a newly finalized block.
    pub fn push(&mut self, block: PendingBlock) {
        self.memory += block.memory_used();
        self.blocks.push_back(block);
    }

    /// Removes and returns the oldest finalized block.
    pub fn pop_oldest(&mut self) -> Option<PendingBlock> {
        let block = self.blocks.pop_front()?;
        self.memory -= block.memory_used();
        Some(block)
    }

    /// Removes and returns the newest finalized block.
    pub fn pop_newest(&mut self) -> Option<PendingBlock> {
        let block = self.blocks.pop_back()?;
        self.memory -= block.memory_used();
        Some(block)
    }

    /// Block number of the oldest cached block.
    pub fn oldest_block(&self) -> Option<u64> {
        self.blocks.front().map(PendingBlock::block_number)
    }

    /// Block number of the newest cached block.
    pub fn newest_block(&self) -> Option<u64> {
        self.blocks.back().map(PendingBlock::block_number)
    }

    /// Resolves a node by hash, scanning the most recent blocks first.
    pub fn find_node(&self, hash: &H256) -> Option<&StagedNode> {
        self.blocks.iter().rev().find_map(|b| b.get_by_hash(hash))
    }

    /// True if a block with this number is cached.
    pub fn contains_block(&self, block_number: u64) -> bool {
        self.blocks.iter().any(|b| b.block_number() == block_number)
    }

    /// Exact accounted bytes across all cached blocks.
    pub fn memory_used(&self) -> usize {
        self.memory
    }

    /// Number of cached blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Iterates over cached blocks, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingBlock> {
        self.blocks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(val: u8, len: usize) -> Node {
        Node::leaf(vec![val], vec![val; len])
    }

    #[test]
    fn test_stage_accounts_exact_sum() {
        let mut block = PendingBlock::new(1);
        let a = leaf(1, 10);
        let b = leaf(2, 20);
        let expected = a.memory_size() + b.memory_size();

        block.stage(TriePath::from_bytes(&[1]), a, WritePriority::Normal);
        block.stage(TriePath::from_bytes(&[2]), b, WritePriority::Normal);
        assert_eq!(block.memory_used(), expected);
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_restage_same_path_does_not_double_count() {
        let mut block = PendingBlock::new(1);
        let path = TriePath::from_bytes(&[1]);

        block.stage(path.clone(), leaf(1, 100), WritePriority::Normal);
        let replacement = leaf(2, 10);
        let expected = replacement.memory_size();
        block.stage(path.clone(), replacement, WritePriority::Normal);

        assert_eq!(block.memory_used(), expected);
        assert_eq!(block.len(), 1);
    }

    #[test]
    fn test_restage_updates_hash_index() {
        let mut block = PendingBlock::new(1);
        let path = TriePath::from_bytes(&[1]);

        let old_hash = block.stage(path.clone(), leaf(1, 4), WritePriority::Normal);
        let new_hash = block.stage(path.clone(), leaf(2, 4), WritePriority::Normal);

        assert!(block.get_by_hash(&old_hash).is_none());
        assert!(block.get_by_hash(&new_hash).is_some());
        assert_eq!(block.get_by_path(&path).unwrap().node.hash(), new_hash);
    }

    #[test]
    fn test_identical_content_under_two_paths_keeps_both() {
        let mut block = PendingBlock::new(1);
        let node = leaf(7, 12);
        let path_a = TriePath::from_bytes(&[1]);
        let path_b = TriePath::from_bytes(&[2]);

        let hash_a = block.stage(path_a.clone(), node.clone(), WritePriority::Normal);
        let hash_b = block.stage(path_b.clone(), node.clone(), WritePriority::Normal);
        assert_eq!(hash_a, hash_b);

        assert_eq!(block.len(), 2);
        assert_eq!(block.memory_used(), 2 * node.memory_size());
        assert!(block.get_by_path(&path_a).is_some());
        assert!(block.get_by_path(&path_b).is_some());
        assert_eq!(block.get_by_hash(&hash_a).unwrap().node, node);

        let paths: Vec<_> = block
            .into_sorted_entries()
            .into_iter()
            .map(|s| s.path)
            .collect();
        assert_eq!(paths, vec![path_a, path_b]);
    }

    #[test]
    fn test_restage_leaves_shared_hash_resolvable() {
        let mut block = PendingBlock::new(1);
        let shared = leaf(7, 12);
        let path_a = TriePath::from_bytes(&[1]);
        let path_b = TriePath::from_bytes(&[2]);

        let shared_hash = block.stage(path_a.clone(), shared.clone(), WritePriority::Normal);
        block.stage(path_b.clone(), shared.clone(), WritePriority::Normal);

        // path B moves on to new content; A still holds the shared node
        let new_hash = block.stage(path_b.clone(), leaf(9, 4), WritePriority::Normal);
        assert_ne!(shared_hash, new_hash);
        assert_eq!(block.get_by_hash(&shared_hash).unwrap().path, path_a);
        assert_eq!(block.get_by_hash(&new_hash).unwrap().path, path_b);
    }

    #[test]
    fn test_cache_newest_first_lookup() {
        let mut cache = DirtyCache::new();
        let path = TriePath::from_bytes(&[1]);

        let mut b1 = PendingBlock::new(1);
        let h1 = b1.stage(path.clone(), leaf(1, 4), WritePriority::Normal);
        cache.push(b1);

        let mut b2 = PendingBlock::new(2);
        let h2 = b2.stage(path.clone(), leaf(2, 4), WritePriority::Normal);
        cache.push(b2);

        // both hashes resolvable, each from its own block
        assert_eq!(cache.find_node(&h1).unwrap().node.hash(), h1);
        assert_eq!(cache.find_node(&h2).unwrap().node.hash(), h2);
    }

    #[test]
    fn test_cache_memory_follows_pops() {
        let mut cache = DirtyCache::new();
        for n in 1..=3u64 {
            let mut b = PendingBlock::new(n);
            b.stage(TriePath::from_bytes(&[n as u8]), leaf(n as u8, 8), WritePriority::Normal);
            cache.push(b);
        }
        let full = cache.memory_used();

        let oldest = cache.pop_oldest().unwrap();
        assert_eq!(oldest.block_number(), 1);
        assert_eq!(cache.memory_used(), full - oldest.memory_used());

        let newest = cache.pop_newest().unwrap();
        assert_eq!(newest.block_number(), 3);
        assert_eq!(cache.block_count(), 1);
    }
}
