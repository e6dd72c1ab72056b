//! Node model: content-addressed nodes and path addressing.

pub mod node;
pub mod path;

pub use node::{keccak256, Node, NodeCodecError, NodeKind, EMPTY_ROOT, HASH_SIZE};
pub use path::{TriePath, LEAF_PATH_LEN, STEM_PATH_LEN};
