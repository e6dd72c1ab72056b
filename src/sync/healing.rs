//! Self-healing store wrapper: recovers missing nodes from the network.
//!
//! A local `load_raw` miss is not necessarily fatal while syncing; the
//! content is immutable and any honest peer can serve it. The wrapper
//! races one request per allocated peer, takes the first valid response,
//! cancels the rest and persists the recovered bytes so the next read is
//! local.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use primitive_types::H256;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::peers::NodePeerPool;
use crate::store::trie_store::{Result, StoreError, TrieStore};
use crate::trie::keccak256;

/// Upper bound on peers raced per recovery attempt.
pub const MAX_RECOVERY_PEERS: usize = 8;

/// Recovery tuning.
#[derive(Clone, Copy, Debug)]
pub struct HealingConfig {
    /// Peers raced per attempt, capped at [`MAX_RECOVERY_PEERS`].
    pub max_peers: usize,
    /// Deadline for the whole race.
    pub request_timeout: Duration,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_peers: MAX_RECOVERY_PEERS,
            request_timeout: Duration::from_secs(1),
        }
    }
}

/// A [`TrieStore`] that falls back to peers for missing node content.
pub struct HealingTrieStore {
    inner: TrieStore,
    pool: Arc<dyn NodePeerPool>,
    config: HealingConfig,
}

impl HealingTrieStore {
    /// Wraps a store with a peer pool for recovery.
    pub fn new(inner: TrieStore, pool: Arc<dyn NodePeerPool>, config: HealingConfig) -> Self {
        Self {
            inner,
            pool,
            config,
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &TrieStore {
        &self.inner
    }

    /// Mutable access to the wrapped store for writer operations.
    pub fn inner_mut(&mut self) -> &mut TrieStore {
        &mut self.inner
    }

    /// Loads node content by hash, healing over the network on a miss.
    ///
    /// Every other error reproduces the local behavior unchanged.
    pub async fn load_raw(&self, hash: &H256) -> Result<Vec<u8>> {
        match self.inner.load_raw(hash) {
            Ok(bytes) => Ok(bytes),
            Err(StoreError::NodeNotFound(_)) => self.recover_from_network(*hash).await,
            Err(err) => Err(err),
        }
    }

    /// Races one request per allocated peer; the first response carrying
    /// exactly one item with the right hash wins.
    async fn recover_from_network(&self, hash: H256) -> Result<Vec<u8>> {
        let max_peers = self.config.max_peers.min(MAX_RECOVERY_PEERS);
        let peers = self.pool.allocate(max_peers).await;
        if peers.is_empty() {
            debug!(?hash, "no peers available for recovery");
            return Err(StoreError::NodeNotFound(hash));
        }
        debug!(?hash, peers = peers.len(), "recovering node from network");

        let cancel = CancellationToken::new();
        // each request runs as its own task so losers stay alive to
        // observe the fired token after the winner returns
        let mut inflight = FuturesUnordered::new();
        for peer in peers {
            let token = cancel.clone();
            inflight.push(tokio::spawn(async move {
                let id = peer.id();
                let result = peer.request_node_data(vec![hash], token).await;
                (id, result)
            }));
        }

        let race = async {
            while let Some(joined) = inflight.next().await {
                let Ok((peer_id, result)) = joined else {
                    continue;
                };
                match result {
                    // a valid response carries exactly one item
                    Ok(items) if items.len() == 1 && !items[0].is_empty() => {
                        let bytes = items.into_iter().next().unwrap_or_default();
                        if keccak256(&bytes) == hash {
                            return Some(bytes);
                        }
                        debug!(peer = %peer_id, "recovered content fails hash check");
                    }
                    Ok(items) => {
                        debug!(peer = %peer_id, items = items.len(), "invalid node data response");
                    }
                    Err(err) => {
                        debug!(peer = %peer_id, %err, "node data request failed");
                    }
                }
            }
            None
        };
        let recovered = tokio::time::timeout(self.config.request_timeout, race)
            .await
            .ok()
            .flatten();
        cancel.cancel();

        match recovered {
            Some(bytes) => {
                self.inner.persist_recovered(&hash, bytes.clone());
                debug!(?hash, "node recovered and persisted");
                Ok(bytes)
            }
            None => {
                debug!(?hash, "all peers exhausted");
                Err(StoreError::NodeNotFound(hash))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::strategy::PersistenceStrategy;
    use crate::store::trie_store::StoreConfig;
    use crate::sync::peers::{NodeDataPeer, PeerRequestError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Serve(Vec<u8>),
        ServeMany(Vec<Vec<u8>>),
        Fail,
        /// Blocks until cancelled, recording that the cancel arrived.
        Hang,
    }

    struct MockPeer {
        name: &'static str,
        behavior: Behavior,
        delay: Duration,
        cancelled: AtomicUsize,
    }

    impl MockPeer {
        fn new(name: &'static str, behavior: Behavior, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                delay,
                cancelled: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NodeDataPeer for MockPeer {
        fn id(&self) -> String {
            self.name.to_string()
        }

        async fn request_node_data(
            &self,
            _hashes: Vec<H256>,
            cancel: CancellationToken,
        ) -> std::result::Result<Vec<Vec<u8>>, PeerRequestError> {
            match &self.behavior {
                Behavior::Hang => {
                    cancel.cancelled().await;
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    Err(PeerRequestError::Cancelled)
                }
                behavior => {
                    tokio::time::sleep(self.delay).await;
                    match behavior {
                        Behavior::Serve(bytes) => Ok(vec![bytes.clone()]),
                        Behavior::ServeMany(items) => Ok(items.clone()),
                        Behavior::Fail => {
                            Err(PeerRequestError::Disconnected("gone".to_string()))
                        }
                        Behavior::Hang => unreachable!(),
                    }
                }
            }
        }
    }

    struct MockPool {
        peers: Vec<Arc<MockPeer>>,
        allocations: AtomicUsize,
    }

    #[async_trait]
    impl NodePeerPool for MockPool {
        async fn allocate(&self, max_peers: usize) -> Vec<Arc<dyn NodeDataPeer>> {
            self.allocations.fetch_add(1, Ordering::SeqCst);
            self.peers
                .iter()
                .take(max_peers)
                .map(|p| p.clone() as Arc<dyn NodeDataPeer>)
                .collect()
        }
    }

    fn healing_store(peers: Vec<Arc<MockPeer>>) -> HealingTrieStore {
        let inner = TrieStore::in_memory(StoreConfig {
            persistence: PersistenceStrategy::NoPersistence,
            ..StoreConfig::default()
        })
        .unwrap();
        let pool = Arc::new(MockPool {
            peers,
            allocations: AtomicUsize::new(0),
        });
        HealingTrieStore::new(inner, pool, HealingConfig::default())
    }

    fn node_bytes() -> (Vec<u8>, H256) {
        let bytes = crate::trie::Node::leaf(vec![1], vec![7; 4]).encode();
        let hash = keccak256(&bytes);
        (bytes, hash)
    }

    #[tokio::test]
    async fn test_first_valid_response_wins_and_cancels_losers() {
        let (bytes, hash) = node_bytes();
        let fast = MockPeer::new("fast", Behavior::Serve(bytes.clone()), Duration::from_millis(5));
        let slow = MockPeer::new("slow", Behavior::Hang, Duration::ZERO);
        let store = healing_store(vec![slow.clone(), fast]);

        let recovered = store.load_raw(&hash).await.unwrap();
        assert_eq!(recovered, bytes);

        // loser observed the cancellation
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(slow.cancelled.load(Ordering::SeqCst), 1);

        // the winner was persisted, the next read is local
        assert_eq!(store.inner().load_raw(&hash).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_multi_item_response_is_a_peer_failure() {
        let (bytes, hash) = node_bytes();
        let chatty = MockPeer::new(
            "chatty",
            Behavior::ServeMany(vec![bytes.clone(), bytes.clone()]),
            Duration::from_millis(1),
        );
        let honest = MockPeer::new("honest", Behavior::Serve(bytes.clone()), Duration::from_millis(10));
        let store = healing_store(vec![chatty, honest]);

        // the multi-item answer arrives first and is rejected; the race
        // keeps going and the honest peer wins
        assert_eq!(store.load_raw(&hash).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_wrong_content_is_rejected() {
        let (_, hash) = node_bytes();
        let liar = MockPeer::new(
            "liar",
            Behavior::Serve(b"not the node".to_vec()),
            Duration::from_millis(1),
        );
        let store = healing_store(vec![liar]);
        assert!(matches!(
            store.load_raw(&hash).await,
            Err(StoreError::NodeNotFound(h)) if h == hash
        ));
    }

    #[tokio::test]
    async fn test_all_peers_failing_surfaces_not_found() {
        let (_, hash) = node_bytes();
        let a = MockPeer::new("a", Behavior::Fail, Duration::from_millis(1));
        let b = MockPeer::new("b", Behavior::Fail, Duration::from_millis(1));
        let store = healing_store(vec![a, b]);
        assert!(matches!(
            store.load_raw(&hash).await,
            Err(StoreError::NodeNotFound(h)) if h == hash
        ));
    }

    #[tokio::test]
    async fn test_no_peers_surfaces_not_found() {
        let (_, hash) = node_bytes();
        let store = healing_store(vec![]);
        assert!(matches!(
            store.load_raw(&hash).await,
            Err(StoreError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_hit_skips_the_network() {
        let (bytes, hash) = node_bytes();
        let mut store = healing_store(vec![]);
        store.inner_mut().persist_recovered(&hash, bytes.clone());
        assert_eq!(store.load_raw(&hash).await.unwrap(), bytes);
    }
}
