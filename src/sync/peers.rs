//! Peer abstraction for node-data recovery.
//!
//! The store only needs two capabilities from the networking stack:
//! allocating a set of peers eligible for node-data requests, and asking
//! one peer for the content behind a set of hashes. Both are traits so
//! tests and embedders can supply their own transport.

use std::sync::Arc;

use async_trait::async_trait;
use primitive_types::H256;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure of a single peer request. Individual failures are absorbed by
/// the recovery race; only total exhaustion surfaces to the caller.
#[derive(Error, Debug)]
pub enum PeerRequestError {
    #[error("request timed out")]
    Timeout,
    #[error("request was cancelled")]
    Cancelled,
    #[error("peer returned an empty response")]
    EmptyResponse,
    #[error("peer disconnected: {0}")]
    Disconnected(String),
}

/// A peer able to serve node content by hash.
#[async_trait]
pub trait NodeDataPeer: Send + Sync {
    /// Stable identifier used in logs.
    fn id(&self) -> String;

    /// Requests the content behind each hash, in order.
    ///
    /// The peer should abandon the request when `cancel` fires.
    async fn request_node_data(
        &self,
        hashes: Vec<H256>,
        cancel: CancellationToken,
    ) -> Result<Vec<Vec<u8>>, PeerRequestError>;
}

/// Source of peers eligible for node-data requests.
#[async_trait]
pub trait NodePeerPool: Send + Sync {
    /// Returns up to `max_peers` currently eligible peers.
    async fn allocate(&self, max_peers: usize) -> Vec<Arc<dyn NodeDataPeer>>;
}
