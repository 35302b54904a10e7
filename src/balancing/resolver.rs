//! URL resolution
//!
//! Routes traffic for a network through its load balancer when one exists
//! for the (region, kind); otherwise probes the candidate node directly and
//! caches a direct URL on its config, clearing the cache on failure.

use crate::config::RuntimeConfig;
use crate::consumer::{BalanceNodeMessage, SUBJECT_BALANCER_BALANCE_NODE};
use crate::domain::ports::{MessageBusRef, StoreRef};
use crate::domain::{BalancerKind, Network, Node};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Default IPFS API port fronted by ipfs balancers
const DEFAULT_IPFS_PORT: u16 = 5001;

/// Default block explorer port
const DEFAULT_EXPLORER_PORT: u16 = 80;

/// Resolves client-facing URLs for a network's traffic classes
pub struct UrlResolver {
    store: StoreRef,
    bus: MessageBusRef,
    config: RuntimeConfig,
}

impl UrlResolver {
    pub fn new(store: StoreRef, bus: MessageBusRef, config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self { store, bus, config })
    }

    fn port_for(network: &Network, kind: BalancerKind) -> u16 {
        match kind {
            BalancerKind::Rpc => network.config.json_rpc_port(),
            BalancerKind::Websocket => network.config.websocket_port(),
            BalancerKind::Ipfs => DEFAULT_IPFS_PORT,
            BalancerKind::BlockExplorer => DEFAULT_EXPLORER_PORT,
        }
    }

    fn scheme_for(kind: BalancerKind) -> &'static str {
        match kind {
            BalancerKind::Websocket => "ws",
            _ => "http",
        }
    }

    /// Resolve the URL for a traffic class. Prefers an active balancer
    /// (also enqueueing the node behind it); falls back to probing the node
    /// directly.
    pub async fn resolve_url(
        &self,
        network: &Network,
        node: &mut Node,
        kind: BalancerKind,
    ) -> Result<String> {
        let port = Self::port_for(network, kind);
        let region = node
            .region()
            .ok_or_else(|| Error::Configuration(format!("node {} has no region", node.id)))?;

        let balancers = self
            .store
            .network_balancers(&network.id, Some(region), Some(kind))
            .await?;

        if let Some(balancer) = balancers.iter().find(|b| b.is_active()) {
            if let Some(host) = &balancer.host {
                self.enqueue_balance(node, balancer.id.as_str()).await;
                return Ok(format!("{}://{}:{}", Self::scheme_for(kind), host, port));
            }
        }

        self.resolve_direct(node, kind, port).await
    }

    async fn enqueue_balance(&self, node: &Node, balancer_id: &str) {
        let msg = BalanceNodeMessage {
            node_id: node.id.clone(),
            balancer_id: balancer_id.to_string(),
        };
        let payload = match serde_json::to_vec(&msg) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode balance-node message: {}", err);
                return;
            }
        };
        if let Err(err) = self
            .bus
            .publish(SUBJECT_BALANCER_BALANCE_NODE, Bytes::from(payload))
            .await
        {
            warn!(
                "Failed to enqueue balancing of node {} behind {}: {}",
                node.id, balancer_id, err
            );
        }
    }

    /// Probe the node's public address until it accepts a TCP connection,
    /// bounded by the overall reachability deadline. A successful probe
    /// caches the direct URL on the node config; exhausting the deadline
    /// clears it.
    async fn resolve_direct(
        &self,
        node: &mut Node,
        kind: BalancerKind,
        port: u16,
    ) -> Result<String> {
        let host = node
            .reachable_host()
            .map(str::to_string)
            .ok_or_else(|| Error::transient("backend", "resolve_url", "node has no host yet"))?;

        let started = tokio::time::Instant::now();
        while started.elapsed() < self.config.reachability_deadline {
            let probe = TcpStream::connect((host.as_str(), port));
            match tokio::time::timeout(self.config.reachability_probe_timeout, probe).await {
                Ok(Ok(_)) => {
                    let url = format!("{}://{}:{}", Self::scheme_for(kind), host, port);
                    node.config.url = Some(url.clone());
                    self.store.upsert_node(node).await?;
                    info!("Resolved direct url for node {}: {}", node.id, url);
                    return Ok(url);
                }
                Ok(Err(err)) => {
                    debug!("Probe of {}:{} refused: {}", host, port, err);
                }
                Err(_) => {
                    debug!("Probe of {}:{} timed out", host, port);
                }
            }
            tokio::time::sleep(self.config.reachability_probe_timeout).await;
        }

        node.config.url = None;
        self.store.upsert_node(node).await?;
        Err(Error::Timeout {
            operation: format!("reachability of node {}", node.id),
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{MessageBus, Subscription};
    use crate::domain::{BalancerStatus, LoadBalancer, NetworkConfig, NodeConfig};
    use crate::standalone::{MemoryBus, MemoryStore};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn test_network() -> Network {
        Network::create(
            "net-1",
            "test",
            NetworkConfig {
                chain: Some("test".into()),
                engine_id: Some("aura".into()),
                native_currency: Some("TEST".into()),
                protocol_id: Some("poa".into()),
                chainspec: Some(json!({})),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_active_balancer_routes_and_enqueues() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let resolver = UrlResolver::new(store.clone(), bus.clone(), RuntimeConfig::default());

        let network = test_network();
        store.upsert_network(&network).await.unwrap();

        let mut balancer = LoadBalancer::new("lb-1", "net-1", BalancerKind::Rpc, "us-east-1");
        balancer.status = BalancerStatus::Active;
        balancer.host = Some("lb.example.com".into());
        store.upsert_balancer(&balancer).await.unwrap();

        let mut sub = bus
            .subscribe(SUBJECT_BALANCER_BALANCE_NODE, "test")
            .await
            .unwrap();

        let mut node = Node::new(
            "node-1",
            "net-1",
            NodeConfig {
                region: Some("us-east-1".into()),
                ..Default::default()
            },
        );

        let url = resolver
            .resolve_url(&network, &mut node, BalancerKind::Rpc)
            .await
            .unwrap();
        assert_eq!(url, "http://lb.example.com:8050");

        let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), sub.next())
            .await
            .expect("balance-node message expected")
            .unwrap();
        let msg: BalanceNodeMessage = serde_json::from_slice(delivery.payload()).unwrap();
        assert_eq!(msg.node_id, "node-1");
        assert_eq!(msg.balancer_id, "lb-1");
    }

    #[tokio::test]
    async fn test_unreachable_node_clears_cached_url() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let mut config = RuntimeConfig::default();
        config.reachability_deadline = std::time::Duration::from_millis(100);
        config.reachability_probe_timeout = std::time::Duration::from_millis(20);
        let resolver = UrlResolver::new(store.clone(), bus, config);

        let network = test_network();
        store.upsert_network(&network).await.unwrap();

        let mut node = Node::new(
            "node-1",
            "net-1",
            NodeConfig {
                region: Some("us-east-1".into()),
                url: Some("http://stale:8050".into()),
                ..Default::default()
            },
        );
        // RFC 5737 test address: never reachable
        node.host = Some("192.0.2.1".into());
        store.upsert_node(&node).await.unwrap();

        let err = resolver
            .resolve_url(&network, &mut node, BalancerKind::Rpc)
            .await
            .unwrap_err();
        assert_matches!(err, Error::Timeout { .. });

        let stored = store.node("node-1").await.unwrap().unwrap();
        assert!(stored.config.url.is_none());
    }
}
