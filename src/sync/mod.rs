//! Network recovery of missing trie nodes.

pub mod healing;
pub mod peers;

pub use healing::{HealingConfig, HealingTrieStore, MAX_RECOVERY_PEERS};
pub use peers::{NodeDataPeer, NodePeerPool, PeerRequestError};
