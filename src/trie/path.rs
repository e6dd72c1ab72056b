//! TriePath - addressing of nodes by their position in the tree.
//!
//! A path is the traversal key from the root down to a node. Leaf paths are
//! full 32-byte keys, stem paths are the 31-byte prefix shared by a group of
//! leaves, and branch paths are the (possibly empty) byte-index prefixes
//! above them. The empty path addresses the root.

/// Byte length of a full leaf path.
pub const LEAF_PATH_LEN: usize = 32;

/// Byte length of a stem path.
pub const STEM_PATH_LEN: usize = 31;

/// A root-to-node traversal key.
///
/// Paths are plain byte strings; their length tells the addressing mode
/// apart (32 = leaf, 31 = stem, shorter = branch/extension levels).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriePath {
    bytes: Vec<u8>,
}

impl TriePath {
    /// The empty path, addressing the root node.
    pub fn root() -> Self {
        Self { bytes: Vec::new() }
    }

    /// A full leaf path (32 bytes).
    pub fn leaf(key: [u8; LEAF_PATH_LEN]) -> Self {
        Self { bytes: key.to_vec() }
    }

    /// A stem path (31 bytes), addressing a composite suffix node.
    pub fn stem(stem: [u8; STEM_PATH_LEN]) -> Self {
        Self { bytes: stem.to_vec() }
    }

    /// A branch path: the byte-index prefix above stems and leaves.
    pub fn branch(prefix: &[u8]) -> Self {
        Self { bytes: prefix.to_vec() }
    }

    /// Builds a path from raw bytes, addressing mode implied by length.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec() }
    }

    /// The raw path bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes in the path.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for the root path.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True if this path addresses a leaf slot.
    pub fn is_leaf(&self) -> bool {
        self.bytes.len() == LEAF_PATH_LEN
    }

    /// True if this path addresses a stem node.
    pub fn is_stem(&self) -> bool {
        self.bytes.len() == STEM_PATH_LEN
    }

    /// Length of the byte prefix shared with another path.
    pub fn common_prefix_len(&self, other: &Self) -> usize {
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

impl Default for TriePath {
    fn default() -> Self {
        Self::root()
    }
}
