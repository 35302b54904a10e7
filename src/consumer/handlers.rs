//! Subject handlers
//!
//! Pure unmarshal-resolve-operate functions; acknowledgment policy lives in
//! the worker loop, keyed off [`crate::error::Error::action`].

use crate::balancing::{BalancerAttachment, LoadBalancerProvisioner};
use crate::consumer::{
    BalanceNodeMessage, BlockFinalizedMessage, DeprovisionBalancerMessage, NetworkPeerOpMessage,
    PeerOpMessage, ResolvePeerMessage, TxFinalizeMessage, SUBJECT_BALANCER_BALANCE_NODE,
    SUBJECT_BALANCER_DEPROVISION, SUBJECT_BLOCK_FINALIZED, SUBJECT_NETWORK_ADD_PEER,
    SUBJECT_NETWORK_REMOVE_PEER, SUBJECT_NODE_ADD_PEER, SUBJECT_NODE_REMOVE_PEER,
    SUBJECT_NODE_RESOLVE_PEER, SUBJECT_TX_FINALIZE,
};
use crate::domain::ports::{ChainRpcRef, ContainerBackendRef, MessageBusRef, StoreRef};
use crate::domain::{Block, Node};
use crate::error::{Error, Result};
use crate::orchestration::NodeDeployer;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared handler state for every subject
pub struct Handlers {
    store: StoreRef,
    bus: MessageBusRef,
    rpc: ChainRpcRef,
    backend: ContainerBackendRef,
    deployer: Arc<NodeDeployer>,
    attachment: Arc<BalancerAttachment>,
    provisioner: Arc<LoadBalancerProvisioner>,
}

impl Handlers {
    pub fn new(
        store: StoreRef,
        bus: MessageBusRef,
        rpc: ChainRpcRef,
        backend: ContainerBackendRef,
        deployer: Arc<NodeDeployer>,
        attachment: Arc<BalancerAttachment>,
        provisioner: Arc<LoadBalancerProvisioner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            rpc,
            backend,
            deployer,
            attachment,
            provisioner,
        })
    }

    /// Route a payload to its subject's handler
    pub async fn dispatch(&self, subject: &str, payload: &[u8]) -> Result<()> {
        match subject {
            SUBJECT_BLOCK_FINALIZED => self.block_finalized(payload).await,
            SUBJECT_NODE_RESOLVE_PEER => self.resolve_peer(payload).await,
            SUBJECT_NODE_ADD_PEER => self.peer_op(payload, true).await,
            SUBJECT_NODE_REMOVE_PEER => self.peer_op(payload, false).await,
            SUBJECT_NETWORK_ADD_PEER => self.network_peer_op(payload, true).await,
            SUBJECT_NETWORK_REMOVE_PEER => self.network_peer_op(payload, false).await,
            SUBJECT_BALANCER_BALANCE_NODE => self.balance_node(payload).await,
            SUBJECT_BALANCER_DEPROVISION => self.deprovision_balancer(payload).await,
            _ => Err(Error::MessageDelivery {
                subject: subject.to_string(),
                reason: "no handler bound".to_string(),
            }),
        }
    }

    fn decode<T: DeserializeOwned>(subject: &str, payload: &[u8]) -> Result<T> {
        serde_json::from_slice(payload).map_err(|err| Error::MessageDelivery {
            subject: subject.to_string(),
            reason: format!("undecodable payload: {}", err),
        })
    }

    // =========================================================================
    // Block Finalized
    // =========================================================================

    /// Persist the finalized block and fan one finalize message out per
    /// transaction it carries. The insert dedupes the block by natural key,
    /// but the fan-out runs on every delivery: a redelivery after a
    /// transient fan-out failure must still emit the per-transaction
    /// messages, and downstream consumers dedupe by tx hash.
    async fn block_finalized(&self, payload: &[u8]) -> Result<()> {
        let msg: BlockFinalizedMessage = Self::decode(SUBJECT_BLOCK_FINALIZED, payload)?;

        let network = self
            .store
            .network(&msg.network_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Network".into(),
                name: msg.network_id.clone(),
            })?;

        let block = Block {
            network_id: network.id.clone(),
            number: msg.block,
            hash: msg.block_hash.clone(),
            timestamp: msg.timestamp,
        };

        if self.store.insert_block(&block).await? {
            info!("Recorded finalized block {} of {}", msg.block, network.id);
        } else {
            debug!(
                "Block {} of {} already recorded; completing fan-out",
                msg.block, network.id
            );
        }

        let Some(rpc_url) = network.json_rpc_url() else {
            debug!(
                "Network {} has no rpc url; skipping transaction fan-out",
                network.id
            );
            return Ok(());
        };

        // A transient failure here nacks the whole message; the block
        // insert above is already deduped, so only the fan-out reruns
        let full_block = self
            .rpc
            .invoke(&rpc_url, "eth_getBlockByHash", json!([msg.block_hash, false]))
            .await?;
        let tx_hashes: Vec<String> = full_block
            .get("transactions")
            .and_then(|v| v.as_array())
            .map(|txs| {
                txs.iter()
                    .filter_map(|tx| tx.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let total = tx_hashes.len();
        let mut failed = 0usize;
        for tx_hash in tx_hashes {
            let fanout = TxFinalizeMessage {
                network_id: network.id.clone(),
                block: msg.block,
                tx_hash,
            };
            let payload = serde_json::to_vec(&fanout)?;
            if let Err(err) = self.bus.publish(SUBJECT_TX_FINALIZE, Bytes::from(payload)).await {
                warn!("Failed to fan out tx finalize: {}", err);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(Error::transient(
                "bus",
                "tx_finalize_fanout",
                format!("{} of {} publishes failed for block {}", failed, total, msg.block),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Peer Operations
    // =========================================================================

    async fn resolve_peer(&self, payload: &[u8]) -> Result<()> {
        let msg: ResolvePeerMessage = Self::decode(SUBJECT_NODE_RESOLVE_PEER, payload)?;
        self.deployer.resolve_peer_url(&msg.node_id).await
    }

    async fn peer_op(&self, payload: &[u8], add: bool) -> Result<()> {
        let subject = if add {
            SUBJECT_NODE_ADD_PEER
        } else {
            SUBJECT_NODE_REMOVE_PEER
        };
        let msg: PeerOpMessage = Self::decode(subject, payload)?;
        if add {
            self.deployer.add_peer(&msg.node_id, &msg.peer_url).await
        } else {
            self.deployer.remove_peer(&msg.node_id, &msg.peer_url).await
        }
    }

    /// Network-wide broadcast: one per-node message per member
    async fn network_peer_op(&self, payload: &[u8], add: bool) -> Result<()> {
        let subject = if add {
            SUBJECT_NETWORK_ADD_PEER
        } else {
            SUBJECT_NETWORK_REMOVE_PEER
        };
        let msg: NetworkPeerOpMessage = Self::decode(subject, payload)?;
        self.deployer
            .broadcast_peer_op(&msg.network_id, &msg.peer_url, add)
            .await
    }

    // =========================================================================
    // Balancer Operations
    // =========================================================================

    async fn balance_node(&self, payload: &[u8]) -> Result<()> {
        let msg: BalanceNodeMessage = Self::decode(SUBJECT_BALANCER_BALANCE_NODE, payload)?;

        let node = self
            .store
            .node(&msg.node_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Node".into(),
                name: msg.node_id.clone(),
            })?;

        let private_ip = self.runtime_private_ip(&node).await?;
        self.attachment.balance(&msg.balancer_id, &node, &private_ip).await
    }

    async fn deprovision_balancer(&self, payload: &[u8]) -> Result<()> {
        let msg: DeprovisionBalancerMessage =
            Self::decode(SUBJECT_BALANCER_DEPROVISION, payload)?;
        self.provisioner.deprovision(&msg.balancer_id).await
    }

    /// Runtime addresses are never persisted; re-resolve through the backend
    async fn runtime_private_ip(&self, node: &Node) -> Result<String> {
        let region = node
            .region()
            .ok_or_else(|| Error::Configuration(format!("node {} has no region", node.id)))?;
        let credentials = node.credentials();

        for task_id in &node.config.target_task_ids {
            let runtime = self
                .backend
                .describe_node(region, &credentials, task_id)
                .await?;
            if let Some(private_ip) = runtime.private_ipv4 {
                return Ok(private_ip);
            }
        }
        Err(Error::transient(
            "backend",
            "describe_node",
            format!("node {} has no private address yet", node.id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::domain::ports::MessageBus;
    use crate::domain::{BalancerKind, Network, NetworkConfig, NodeConfig, NodeRole};
    use crate::error::ErrorAction;
    use crate::orchestration::BootstrapCoordinator;
    use crate::standalone::{MemoryBus, MemoryStore, StandaloneBackend, StandaloneCloud};
    use crate::stats::{HttpChainRpc, StatsRegistry};
    use chrono::Utc;
    use serde_json::json;

    struct Fixture {
        handlers: Arc<Handlers>,
        store: StoreRef,
        memory: Arc<MemoryStore>,
        bus: Arc<MemoryBus>,
        backend: Arc<StandaloneBackend>,
        provisioner: Arc<LoadBalancerProvisioner>,
    }

    fn fixture() -> Fixture {
        fixture_with_rpc(Arc::new(HttpChainRpc::new()))
    }

    fn fixture_with_rpc(rpc: ChainRpcRef) -> Fixture {
        let memory = Arc::new(MemoryStore::new());
        let store: StoreRef = memory.clone();
        let bus = Arc::new(MemoryBus::new());
        let bus_ref: MessageBusRef = bus.clone();
        let backend = Arc::new(StandaloneBackend::new());
        let backend_ref: ContainerBackendRef = backend.clone();
        let cloud: crate::domain::ports::CloudProviderRef = Arc::new(StandaloneCloud::new());
        let config = RuntimeConfig::default();

        let bootstrap = BootstrapCoordinator::new(store.clone());
        let stats = StatsRegistry::new(store.clone(), bus_ref.clone(), rpc.clone(), config.clone());
        let attachment = BalancerAttachment::new(store.clone(), cloud.clone(), bus_ref.clone());
        let provisioner = LoadBalancerProvisioner::new(store.clone(), cloud);
        let deployer = NodeDeployer::new(
            store.clone(),
            backend_ref.clone(),
            bus_ref.clone(),
            rpc.clone(),
            bootstrap,
            stats,
            attachment.clone(),
            config,
        );

        let handlers = Handlers::new(
            store.clone(),
            bus_ref,
            rpc,
            backend_ref,
            deployer,
            attachment,
            provisioner.clone(),
        );
        Fixture {
            handlers,
            store,
            memory,
            bus,
            backend,
            provisioner,
        }
    }

    fn test_network(id: &str) -> Network {
        Network::create(
            id,
            "test",
            NetworkConfig {
                chain: Some("test".into()),
                engine_id: Some("aura".into()),
                native_currency: Some("TEST".into()),
                protocol_id: Some("poa".into()),
                chainspec: Some(json!({})),
                client: Some("geth".into()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn finalized(network_id: &str, block: u64) -> Vec<u8> {
        serde_json::to_vec(&BlockFinalizedMessage {
            network_id: network_id.into(),
            block,
            block_hash: format!("0x{:064x}", block),
            timestamp: Utc::now(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_block_finalized_unknown_network_is_retryable() {
        let f = fixture();
        let err = f
            .handlers
            .dispatch(SUBJECT_BLOCK_FINALIZED, &finalized("net-none", 1))
            .await
            .unwrap_err();
        // Nacked with the subject deadline, not dropped
        assert_eq!(err.action(), ErrorAction::Nack);
    }

    #[tokio::test]
    async fn test_block_finalized_undecodable_payload_is_dropped() {
        let f = fixture();
        let err = f
            .handlers
            .dispatch(SUBJECT_BLOCK_FINALIZED, b"not json")
            .await
            .unwrap_err();
        assert_eq!(err.action(), ErrorAction::Drop);
    }

    /// Chain endpoint that can be flipped between refusing and serving a
    /// fixed transaction list
    struct StubRpc {
        fail: std::sync::atomic::AtomicBool,
        txs: Vec<String>,
    }

    #[async_trait::async_trait]
    impl crate::domain::ports::ChainRpc for StubRpc {
        async fn invoke(
            &self,
            _url: &str,
            method: &str,
            _params: serde_json::Value,
        ) -> crate::error::Result<serde_json::Value> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::transient("chain-rpc", method, "connection refused"));
            }
            Ok(json!({ "transactions": self.txs }))
        }
    }

    #[tokio::test]
    async fn test_fanout_retries_after_transient_rpc_failure() {
        use crate::domain::ports::Subscription;
        use std::sync::atomic::{AtomicBool, Ordering};

        let rpc = Arc::new(StubRpc {
            fail: AtomicBool::new(true),
            txs: vec!["0xt1".into(), "0xt2".into()],
        });
        let f = fixture_with_rpc(rpc.clone());

        let mut network = test_network("net-1");
        network.config.json_rpc_url = Some("http://127.0.0.1:8050".into());
        f.store.upsert_network(&network).await.unwrap();

        let mut sub = f.bus.subscribe(SUBJECT_TX_FINALIZE, "test").await.unwrap();

        // First delivery records the block, then the fan-out lookup fails
        // transiently: the message is nacked, not acked
        let payload = finalized("net-1", 9);
        let err = f
            .handlers
            .dispatch(SUBJECT_BLOCK_FINALIZED, &payload)
            .await
            .unwrap_err();
        assert_eq!(err.action(), ErrorAction::Nack);
        let hash = format!("0x{:064x}", 9u64);
        assert!(f.memory.block_recorded("net-1", &hash).await);

        // Redelivery finds the block already recorded but still completes
        // the per-transaction fan-out
        rpc.fail.store(false, Ordering::SeqCst);
        f.handlers
            .dispatch(SUBJECT_BLOCK_FINALIZED, &payload)
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), sub.next())
                .await
                .expect("tx finalize message expected")
                .unwrap();
            let msg: TxFinalizeMessage = serde_json::from_slice(delivery.payload()).unwrap();
            assert_eq!(msg.block, 9);
            seen.push(msg.tx_hash);
        }
        seen.sort();
        assert_eq!(seen, vec!["0xt1".to_string(), "0xt2".to_string()]);
    }

    #[tokio::test]
    async fn test_block_finalized_persists_and_dedupes() {
        let f = fixture();
        let network = test_network("net-1");
        f.store.upsert_network(&network).await.unwrap();

        // No rpc url configured: persistence without fan-out
        f.handlers
            .dispatch(SUBJECT_BLOCK_FINALIZED, &finalized("net-1", 7))
            .await
            .unwrap();

        // Redelivery of the same block is a no-op, not an error
        f.handlers
            .dispatch(SUBJECT_BLOCK_FINALIZED, &finalized("net-1", 7))
            .await
            .unwrap();

        let block = Block {
            network_id: "net-1".into(),
            number: 7,
            hash: format!("0x{:064x}", 7),
            timestamp: Utc::now(),
        };
        assert!(!f.store.insert_block(&block).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_subject_is_dropped() {
        let f = fixture();
        let err = f.handlers.dispatch("network.unknown", b"{}").await.unwrap_err();
        assert_eq!(err.action(), ErrorAction::Drop);
    }

    #[tokio::test]
    async fn test_balance_node_registers_targets() {
        use crate::domain::ports::ContainerBackend;

        let f = fixture();
        let network = test_network("net-1");
        f.store.upsert_network(&network).await.unwrap();

        // A deployed node has backend task ids on record
        let launched = f
            .backend
            .create_node(&crate::domain::ports::LaunchSpec {
                node_id: "node-1".into(),
                network_id: "net-1".into(),
                region: "us-east-1".into(),
                credentials: Default::default(),
                image: None,
                entrypoint: vec![],
                env: Default::default(),
            })
            .await
            .unwrap();

        let mut node = Node::new(
            "node-1",
            "net-1",
            NodeConfig {
                role: Some(NodeRole::Peer),
                region: Some("us-east-1".into()),
                ..Default::default()
            },
        );
        node.config.target_task_ids = launched.task_ids;
        f.store.upsert_node(&node).await.unwrap();

        let balancer = f
            .provisioner
            .provision(&network, &node, BalancerKind::Rpc)
            .await
            .unwrap();

        let msg = serde_json::to_vec(&BalanceNodeMessage {
            node_id: "node-1".into(),
            balancer_id: balancer.id.clone(),
        })
        .unwrap();
        f.handlers
            .dispatch(SUBJECT_BALANCER_BALANCE_NODE, &msg)
            .await
            .unwrap();

        let stored = f.store.balancer(&balancer.id).await.unwrap().unwrap();
        assert!(stored.balances_node("node-1"));
        assert_eq!(stored.config.target_groups.len(), 2);
    }

    #[tokio::test]
    async fn test_network_peer_broadcast_fans_out_per_node() {
        use crate::domain::ports::Subscription;

        let f = fixture();
        let network = test_network("net-1");
        f.store.upsert_network(&network).await.unwrap();

        for id in ["node-a", "node-b", "node-c"] {
            let node = Node::new(
                id,
                "net-1",
                NodeConfig {
                    role: Some(NodeRole::Peer),
                    region: Some("us-east-1".into()),
                    ..Default::default()
                },
            );
            f.store.upsert_node(&node).await.unwrap();
        }

        let mut sub = f.bus.subscribe(SUBJECT_NODE_ADD_PEER, "test").await.unwrap();

        let msg = serde_json::to_vec(&NetworkPeerOpMessage {
            network_id: "net-1".into(),
            peer_url: "enode://abc@54.23.11.9:30303".into(),
        })
        .unwrap();
        f.handlers
            .dispatch(SUBJECT_NETWORK_ADD_PEER, &msg)
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), sub.next())
                .await
                .expect("per-node message expected")
                .unwrap();
            let msg: PeerOpMessage = serde_json::from_slice(delivery.payload()).unwrap();
            seen.push(msg.node_id);
        }
        seen.sort();
        assert_eq!(seen, vec!["node-a", "node-b", "node-c"]);
    }

    #[tokio::test]
    async fn test_resolve_peer_unknown_node_is_retryable() {
        let f = fixture();
        let msg = serde_json::to_vec(&ResolvePeerMessage {
            node_id: "node-none".into(),
        })
        .unwrap();
        let err = f
            .handlers
            .dispatch(SUBJECT_NODE_RESOLVE_PEER, &msg)
            .await
            .unwrap_err();
        assert_eq!(err.action(), ErrorAction::Nack);
    }

    #[tokio::test]
    async fn test_worker_nacks_and_redelivers_until_network_exists() {
        use crate::consumer::ConsumerSet;

        let f = fixture();
        let consumer_bus: MessageBusRef = f.bus.clone();
        let consumers = ConsumerSet::new(
            consumer_bus,
            f.handlers.clone(),
            RuntimeConfig {
                block_redelivery: std::time::Duration::from_millis(50),
                ..Default::default()
            },
        );
        consumers.start().await.unwrap();

        // Published for a nonexistent network: the worker nacks and the bus
        // redelivers until the network appears
        let hash = format!("0x{:064x}", 3u64);
        f.bus
            .publish(
                SUBJECT_BLOCK_FINALIZED,
                Bytes::from(finalized("net-late", 3)),
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        assert!(!f.memory.block_recorded("net-late", &hash).await);

        let network = test_network("net-late");
        f.store.upsert_network(&network).await.unwrap();

        let mut recorded = false;
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if f.memory.block_recorded("net-late", &hash).await {
                recorded = true;
                break;
            }
        }
        assert!(recorded, "redelivered block must land once the network exists");
        consumers.shutdown();
    }
}
