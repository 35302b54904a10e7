//! Async message consumers
//!
//! Each subject gets a bounded pool of workers with manual acknowledgment:
//! unmarshal, resolve the referenced entity, perform the operation, ack on
//! success. A handler error is translated at the worker boundary - nack with
//! the subject's redelivery deadline when retryable, ack-and-drop when not.
//! Panics are caught there too, so handler code carries no recover logic.
//!
//! Delivery is at-least-once; handlers dedupe by natural key (block hash,
//! cached ARNs, resolved peer URLs).

pub mod handlers;

pub use handlers::Handlers;

use crate::config::RuntimeConfig;
use crate::domain::ports::MessageBusRef;
use crate::error::{ErrorAction, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// =============================================================================
// Subjects
// =============================================================================

pub const SUBJECT_BLOCK_FINALIZED: &str = "network.block.finalized";
pub const SUBJECT_TX_FINALIZE: &str = "network.tx.finalize";
pub const SUBJECT_NODE_RESOLVE_PEER: &str = "network.node.resolve-peer";
pub const SUBJECT_NODE_ADD_PEER: &str = "network.node.add-peer";
pub const SUBJECT_NODE_REMOVE_PEER: &str = "network.node.remove-peer";
pub const SUBJECT_NETWORK_ADD_PEER: &str = "network.peers.add";
pub const SUBJECT_NETWORK_REMOVE_PEER: &str = "network.peers.remove";
pub const SUBJECT_BALANCER_BALANCE_NODE: &str = "network.balancer.balance-node";
pub const SUBJECT_BALANCER_DEPROVISION: &str = "network.balancer.deprovision";

/// Queue group shared by all operator instances: one delivery per message
pub const QUEUE_GROUP: &str = "nodefleet";

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockFinalizedMessage {
    pub network_id: String,
    pub block: u64,
    pub block_hash: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxFinalizeMessage {
    pub network_id: String,
    pub block: u64,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvePeerMessage {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerOpMessage {
    pub node_id: String,
    pub peer_url: String,
}

/// Network-wide broadcast: fans one [`PeerOpMessage`] out per node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPeerOpMessage {
    pub network_id: String,
    pub peer_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceNodeMessage {
    pub node_id: String,
    pub balancer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprovisionBalancerMessage {
    pub balancer_id: String,
}

// =============================================================================
// Consumer Set
// =============================================================================

/// The full set of subject worker pools
pub struct ConsumerSet {
    bus: MessageBusRef,
    handlers: Arc<Handlers>,
    config: RuntimeConfig,
    cancel: CancellationToken,
}

impl ConsumerSet {
    pub fn new(bus: MessageBusRef, handlers: Arc<Handlers>, config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            bus,
            handlers,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn every subject's worker pool
    pub async fn start(&self) -> Result<()> {
        let w = self.config.workers.clone();
        self.spawn_pool(SUBJECT_BLOCK_FINALIZED, w.block_finalized, self.config.block_redelivery)
            .await?;
        self.spawn_pool(
            SUBJECT_NODE_RESOLVE_PEER,
            w.resolve_peer,
            self.config.peer_resolve_redelivery,
        )
        .await?;
        self.spawn_pool(SUBJECT_NODE_ADD_PEER, w.add_peer, self.config.peer_op_redelivery)
            .await?;
        self.spawn_pool(
            SUBJECT_NODE_REMOVE_PEER,
            w.remove_peer,
            self.config.peer_op_redelivery,
        )
        .await?;
        self.spawn_pool(
            SUBJECT_NETWORK_ADD_PEER,
            w.add_peer,
            self.config.peer_op_redelivery,
        )
        .await?;
        self.spawn_pool(
            SUBJECT_NETWORK_REMOVE_PEER,
            w.remove_peer,
            self.config.peer_op_redelivery,
        )
        .await?;
        self.spawn_pool(
            SUBJECT_BALANCER_BALANCE_NODE,
            w.balance_node,
            self.config.balancer_redelivery,
        )
        .await?;
        self.spawn_pool(
            SUBJECT_BALANCER_DEPROVISION,
            w.deprovision_balancer,
            self.config.balancer_redelivery,
        )
        .await?;
        info!("Consumer pools started");
        Ok(())
    }

    async fn spawn_pool(
        &self,
        subject: &'static str,
        workers: usize,
        redelivery: Duration,
    ) -> Result<()> {
        for worker in 0..workers {
            let subscription = self.bus.subscribe(subject, QUEUE_GROUP).await?;
            let handlers = self.handlers.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                worker_loop(subject, worker, redelivery, subscription, handlers, cancel).await;
            });
        }
        info!("Subscribed {} workers to {}", workers, subject);
        Ok(())
    }

    /// Stop every worker after its in-flight message completes
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// One worker: drain the subscription, ack on success, translate errors
/// and panics into the right disposition
async fn worker_loop(
    subject: &'static str,
    worker: usize,
    redelivery: Duration,
    mut subscription: Box<dyn crate::domain::ports::Subscription>,
    handlers: Arc<Handlers>,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = subscription.next() => delivery,
        };
        let Some(mut delivery) = delivery else { break };

        let payload = delivery.payload().to_vec();
        let handled = AssertUnwindSafe(handlers.dispatch(subject, &payload))
            .catch_unwind()
            .await;

        match handled {
            Ok(Ok(())) => {
                if let Err(err) = delivery.ack().await {
                    warn!("{}[{}]: ack failed: {}", subject, worker, err);
                }
            }
            Ok(Err(err)) => match err.action() {
                ErrorAction::Drop => {
                    warn!("{}[{}]: dropping message: {}", subject, worker, err);
                    let _ = delivery.ack().await;
                }
                ErrorAction::NackAfter(delay) => {
                    warn!("{}[{}]: {}; redelivering in {:?}", subject, worker, err, delay);
                    let _ = delivery.nack(delay).await;
                }
                ErrorAction::Nack => {
                    warn!(
                        "{}[{}]: {}; redelivering in {:?}",
                        subject, worker, err, redelivery
                    );
                    let _ = delivery.nack(redelivery).await;
                }
            },
            Err(_) => {
                error!("{}[{}]: handler panicked; redelivering", subject, worker);
                let _ = delivery.nack(redelivery).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let msg = BlockFinalizedMessage {
            network_id: "net-1".into(),
            block: 7,
            block_hash: "0xabc".into(),
            timestamp: chrono::Utc::now(),
        };
        let encoded = serde_json::to_vec(&msg).unwrap();
        let decoded: BlockFinalizedMessage = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.network_id, "net-1");
        assert_eq!(decoded.block, 7);
    }
}
