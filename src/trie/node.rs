//! Content-addressed trie node types.
//!
//! A node is an immutable value identified by the Keccak-256 hash of its
//! encoding. Once a hash has been computed the node is sealed: two nodes
//! with equal hash are interchangeable, and nothing in the store ever
//! mutates a node in place.

use std::mem;

use primitive_types::H256;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

/// Hash size (Keccak-256).
pub const HASH_SIZE: usize = 32;

/// Number of child slots in a branch node.
pub const BRANCH_WIDTH: usize = 16;

/// Number of leaf slots under a stem node (wide variant).
pub const STEM_WIDTH: usize = 256;

/// The canonical root hash of the empty tree.
pub const EMPTY_ROOT: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
]);

/// Node kind, used by callers to tell a resolved node from the
/// placeholder returned on a complete lookup miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Placeholder for a node that could not be resolved anywhere.
    Unknown,
    /// Leaf holding a value.
    Leaf,
    /// Extension holding a shared path prefix and one child.
    Extension,
    /// Branch holding up to 16 children and an optional value.
    Branch,
    /// Composite suffix node holding up to 256 leaf slots (wide variant).
    Stem,
}

/// A node in the authenticated tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Placeholder; never staged or persisted.
    Unknown,

    /// Leaf node: the tail of the key past the branching point, plus a value.
    Leaf {
        /// Remaining key bytes below the parent.
        path_tail: Vec<u8>,
        /// The value stored at this leaf.
        value: Vec<u8>,
    },

    /// Extension node: a shared prefix compressing a single-child chain.
    Extension {
        /// Shared prefix bytes.
        prefix: Vec<u8>,
        /// Hash of the single child.
        child: H256,
    },

    /// Branch node: children referenced by content hash, indexed 0..16.
    Branch {
        /// Child hashes, one slot per index.
        children: Box<[Option<H256>; BRANCH_WIDTH]>,
        /// Optional value terminating at this branch.
        value: Option<Vec<u8>>,
    },

    /// Stem node: 31-byte stem plus up to 256 fixed-width leaf slots.
    Stem {
        /// The shared 31-byte key prefix.
        stem: [u8; 31],
        /// Leaf slot values, indexed by the final key byte.
        slots: Box<[Option<[u8; 32]>; STEM_WIDTH]>,
    },
}

/// Node decoding failures. A failed decode of locally stored bytes is a
/// corruption indicator, not a recoverable condition.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NodeCodecError {
    #[error("node encoding truncated")]
    Truncated,
    #[error("invalid node tag: {0}")]
    InvalidTag(u8),
}

const TAG_LEAF: u8 = 1;
const TAG_EXTENSION: u8 = 2;
const TAG_BRANCH: u8 = 3;
const TAG_STEM: u8 = 4;

impl Node {
    /// Creates a leaf node.
    pub fn leaf(path_tail: Vec<u8>, value: Vec<u8>) -> Self {
        Node::Leaf { path_tail, value }
    }

    /// Creates an extension node.
    pub fn extension(prefix: Vec<u8>, child: H256) -> Self {
        Node::Extension { prefix, child }
    }

    /// Creates an empty branch node.
    pub fn branch() -> Self {
        Node::Branch {
            children: Box::new([None; BRANCH_WIDTH]),
            value: None,
        }
    }

    /// Creates an empty stem node for the given 31-byte stem.
    pub fn stem(stem: [u8; 31]) -> Self {
        Node::Stem {
            stem,
            slots: Box::new([None; STEM_WIDTH]),
        }
    }

    /// Returns the node kind.
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Unknown => NodeKind::Unknown,
            Node::Leaf { .. } => NodeKind::Leaf,
            Node::Extension { .. } => NodeKind::Extension,
            Node::Branch { .. } => NodeKind::Branch,
            Node::Stem { .. } => NodeKind::Stem,
        }
    }

    /// True for the unresolved placeholder.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Node::Unknown)
    }

    /// Encodes the node to its canonical byte form.
    ///
    /// The encoding is what gets hashed and what lands in durable storage:
    /// a tag byte followed by length-prefixed fields; branch and stem
    /// children are preceded by an occupancy bitmap.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        match self {
            Node::Unknown => {
                // Unknown is a lookup result, never content; encode as empty.
            }
            Node::Leaf { path_tail, value } => {
                out.push(TAG_LEAF);
                out.push(path_tail.len() as u8);
                out.extend_from_slice(path_tail);
                out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                out.extend_from_slice(value);
            }
            Node::Extension { prefix, child } => {
                out.push(TAG_EXTENSION);
                out.push(prefix.len() as u8);
                out.extend_from_slice(prefix);
                out.extend_from_slice(child.as_bytes());
            }
            Node::Branch { children, value } => {
                out.push(TAG_BRANCH);
                let mut bitmap = 0u16;
                for (i, child) in children.iter().enumerate() {
                    if child.is_some() {
                        bitmap |= 1 << i;
                    }
                }
                out.extend_from_slice(&bitmap.to_le_bytes());
                for child in children.iter().flatten() {
                    out.extend_from_slice(child.as_bytes());
                }
                match value {
                    Some(v) => {
                        out.push(1);
                        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                        out.extend_from_slice(v);
                    }
                    None => out.push(0),
                }
            }
            Node::Stem { stem, slots } => {
                out.push(TAG_STEM);
                out.extend_from_slice(stem);
                let mut bitmap = [0u8; STEM_WIDTH / 8];
                for (i, slot) in slots.iter().enumerate() {
                    if slot.is_some() {
                        bitmap[i / 8] |= 1 << (i % 8);
                    }
                }
                out.extend_from_slice(&bitmap);
                for slot in slots.iter().flatten() {
                    out.extend_from_slice(slot);
                }
            }
        }
        out
    }

    /// Decodes a node from its canonical byte form.
    pub fn decode(data: &[u8]) -> Result<Self, NodeCodecError> {
        let mut r = Reader { data, pos: 0 };
        let tag = r.byte()?;
        match tag {
            TAG_LEAF => {
                let tail_len = r.byte()? as usize;
                let path_tail = r.bytes(tail_len)?.to_vec();
                let value_len = r.u32()? as usize;
                let value = r.bytes(value_len)?.to_vec();
                Ok(Node::Leaf { path_tail, value })
            }
            TAG_EXTENSION => {
                let prefix_len = r.byte()? as usize;
                let prefix = r.bytes(prefix_len)?.to_vec();
                let child = H256::from_slice(r.bytes(HASH_SIZE)?);
                Ok(Node::Extension { prefix, child })
            }
            TAG_BRANCH => {
                let bitmap = u16::from_le_bytes([r.byte()?, r.byte()?]);
                let mut children = Box::new([None; BRANCH_WIDTH]);
                for (i, slot) in children.iter_mut().enumerate() {
                    if bitmap & (1 << i) != 0 {
                        *slot = Some(H256::from_slice(r.bytes(HASH_SIZE)?));
                    }
                }
                let value = if r.byte()? == 1 {
                    let len = r.u32()? as usize;
                    Some(r.bytes(len)?.to_vec())
                } else {
                    None
                };
                Ok(Node::Branch { children, value })
            }
            TAG_STEM => {
                let mut stem = [0u8; 31];
                stem.copy_from_slice(r.bytes(31)?);
                let mut bitmap = [0u8; STEM_WIDTH / 8];
                bitmap.copy_from_slice(r.bytes(STEM_WIDTH / 8)?);
                let mut slots = Box::new([None; STEM_WIDTH]);
                for (i, slot) in slots.iter_mut().enumerate() {
                    if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                        let mut v = [0u8; 32];
                        v.copy_from_slice(r.bytes(32)?);
                        *slot = Some(v);
                    }
                }
                Ok(Node::Stem { stem, slots })
            }
            other => Err(NodeCodecError::InvalidTag(other)),
        }
    }

    /// Computes the content hash of the node.
    pub fn hash(&self) -> H256 {
        keccak256(&self.encode())
    }

    /// Exact byte count this node contributes to the dirty cache budget.
    ///
    /// Fixed enum overhead plus all heap payloads.
    pub fn memory_size(&self) -> usize {
        let heap = match self {
            Node::Unknown => 0,
            Node::Leaf { path_tail, value } => path_tail.len() + value.len(),
            Node::Extension { prefix, .. } => prefix.len(),
            Node::Branch { children, value } => {
                mem::size_of_val(&**children) + value.as_ref().map_or(0, Vec::len)
            }
            Node::Stem { slots, .. } => mem::size_of_val(&**slots),
        };
        mem::size_of::<Self>() + heap
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, NodeCodecError> {
        let b = *self.data.get(self.pos).ok_or(NodeCodecError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], NodeCodecError> {
        let end = self.pos.checked_add(len).ok_or(NodeCodecError::Truncated)?;
        let slice = self.data.get(self.pos..end).ok_or(NodeCodecError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, NodeCodecError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Computes the Keccak-256 hash of data.
pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; HASH_SIZE];
    hasher.finalize(&mut hash);
    H256(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_roundtrip() {
        let node = Node::leaf(vec![1, 2, 3], vec![0xAB; 40]);
        let decoded = Node::decode(&node.encode()).unwrap();
        assert_eq!(node, decoded);
        assert_eq!(node.hash(), decoded.hash());
    }

    #[test]
    fn test_branch_roundtrip() {
        let mut node = Node::branch();
        if let Node::Branch { children, value } = &mut node {
            children[0] = Some(H256::repeat_byte(0x11));
            children[15] = Some(H256::repeat_byte(0x22));
            *value = Some(vec![0x42]);
        }
        let decoded = Node::decode(&node.encode()).unwrap();
        assert_eq!(node, decoded);
    }

    #[test]
    fn test_stem_roundtrip() {
        let mut node = Node::stem([9u8; 31]);
        if let Node::Stem { slots, .. } = &mut node {
            slots[0] = Some([1u8; 32]);
            slots[255] = Some([2u8; 32]);
        }
        let decoded = Node::decode(&node.encode()).unwrap();
        assert_eq!(node, decoded);
    }

    #[test]
    fn test_equal_content_equal_hash() {
        let a = Node::leaf(vec![1], vec![2, 3]);
        let b = Node::leaf(vec![1], vec![2, 3]);
        assert_eq!(a.hash(), b.hash());

        let c = Node::leaf(vec![1], vec![2, 4]);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(Node::decode(&[]), Err(NodeCodecError::Truncated));
        assert_eq!(Node::decode(&[99]), Err(NodeCodecError::InvalidTag(99)));
        assert_eq!(Node::decode(&[TAG_LEAF, 5, 1]), Err(NodeCodecError::Truncated));
    }

    #[test]
    fn test_memory_size_tracks_payload() {
        let small = Node::leaf(vec![], vec![]);
        let big = Node::leaf(vec![], vec![0u8; 1000]);
        assert_eq!(big.memory_size() - small.memory_size(), 1000);
    }

    #[test]
    fn test_empty_root_is_keccak_of_empty_rlp_string() {
        use hex_literal::hex;
        assert_eq!(
            EMPTY_ROOT,
            H256(hex!(
                "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
            ))
        );
        assert_eq!(keccak256(&[0x80]), EMPTY_ROOT);
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(Node::Unknown.kind(), NodeKind::Unknown);
        assert!(Node::Unknown.is_unknown());
        assert!(!Node::branch().is_unknown());
    }
}
