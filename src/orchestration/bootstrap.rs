//! Bootstrap Coordinator
//!
//! Serializes genesis election per network: under the network's lock, count
//! existing bootnodes; if none, the pending node becomes the bootnode and the
//! caller receives [`BootstrapOutcome::Elected`] - a sentinel meaning "you
//! are first, proceed once ready" - otherwise the existing bootnodes are
//! returned in creation order.
//!
//! The lock covers only the count-and-persist critical section; callers must
//! never hold it across deploys or other blocking external work.

use crate::domain::ports::StoreRef;
use crate::domain::{Network, Node, NodeStatus};
use crate::error::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Result of a genesis election
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// The caller's node was elected bootnode and must originate genesis
    Elected,
    /// Bootnodes already exist, ordered by creation ascending; the caller's
    /// node waits for genesis instead
    Existing(Vec<Node>),
}

/// Per-network genesis election
pub struct BootstrapCoordinator {
    store: StoreRef,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BootstrapCoordinator {
    pub fn new(store: StoreRef) -> Arc<Self> {
        Arc::new(Self {
            store,
            locks: DashMap::new(),
        })
    }

    /// Lock for a network, created on first use
    fn lock_for(&self, network_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(network_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run the election for a pending node. When elected, the node is
    /// transitioned to genesis, flagged bootnode, and persisted before the
    /// lock is released.
    pub async fn coordinate(&self, network: &Network, node: &mut Node) -> Result<BootstrapOutcome> {
        let lock = self.lock_for(&network.id);
        let _guard = lock.lock().await;

        let bootnodes = self.store.network_bootnodes(&network.id).await?;
        if bootnodes.is_empty() {
            node.status = NodeStatus::Genesis;
            node.bootnode = true;
            self.store.upsert_node(node).await?;
            info!(
                "Elected node {} as bootnode for network {}",
                node.id, network.id
            );
            return Ok(BootstrapOutcome::Elected);
        }

        Ok(BootstrapOutcome::Existing(bootnodes))
    }

    /// Drop a network's lock once the network is torn down
    pub fn evict(&self, network_id: &str) {
        self.locks.remove(network_id);
    }

    /// Number of live election locks
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
