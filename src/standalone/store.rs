//! In-memory persistence adapter

use crate::domain::ports::Store;
use crate::domain::{BalancerKind, Block, LoadBalancer, Network, Node};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Store implementation backed by in-process maps
pub struct MemoryStore {
    networks: RwLock<BTreeMap<String, Network>>,
    nodes: RwLock<BTreeMap<String, Node>>,
    balancers: RwLock<BTreeMap<String, LoadBalancer>>,
    /// Finalized blocks keyed by (network id, block hash)
    blocks: RwLock<BTreeMap<(String, String), Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            networks: RwLock::new(BTreeMap::new()),
            nodes: RwLock::new(BTreeMap::new()),
            balancers: RwLock::new(BTreeMap::new()),
            blocks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Whether a finalized block has been recorded
    pub async fn block_recorded(&self, network_id: &str, hash: &str) -> bool {
        self.blocks
            .read()
            .await
            .contains_key(&(network_id.to_string(), hash.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn network(&self, id: &str) -> Result<Option<Network>> {
        Ok(self.networks.read().await.get(id).cloned())
    }

    async fn upsert_network(&self, network: &Network) -> Result<()> {
        self.networks
            .write()
            .await
            .insert(network.id.clone(), network.clone());
        Ok(())
    }

    async fn node(&self, id: &str) -> Result<Option<Node>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn upsert_node(&self, node: &Node) -> Result<()> {
        self.nodes.write().await.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn remove_node(&self, id: &str) -> Result<()> {
        self.nodes.write().await.remove(id);
        Ok(())
    }

    async fn network_nodes(&self, network_id: &str) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|node| node.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn network_bootnodes(&self, network_id: &str) -> Result<Vec<Node>> {
        let mut bootnodes: Vec<Node> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|node| node.network_id == network_id && node.bootnode)
            .cloned()
            .collect();
        bootnodes.sort_by_key(|node| node.created_at);
        Ok(bootnodes)
    }

    async fn balancer(&self, id: &str) -> Result<Option<LoadBalancer>> {
        Ok(self.balancers.read().await.get(id).cloned())
    }

    async fn upsert_balancer(&self, balancer: &LoadBalancer) -> Result<()> {
        self.balancers
            .write()
            .await
            .insert(balancer.id.clone(), balancer.clone());
        Ok(())
    }

    async fn remove_balancer(&self, id: &str) -> Result<()> {
        self.balancers.write().await.remove(id);
        Ok(())
    }

    async fn network_balancers(
        &self,
        network_id: &str,
        region: Option<&str>,
        kind: Option<BalancerKind>,
    ) -> Result<Vec<LoadBalancer>> {
        Ok(self
            .balancers
            .read()
            .await
            .values()
            .filter(|lb| lb.network_id == network_id)
            .filter(|lb| region.map(|r| lb.region == r).unwrap_or(true))
            .filter(|lb| kind.map(|k| lb.kind == k).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn insert_block(&self, block: &Block) -> Result<bool> {
        let mut blocks = self.blocks.write().await;
        let key = block.natural_key();
        if blocks.contains_key(&key) {
            return Ok(false);
        }
        blocks.insert(key, block.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NetworkConfig, NodeConfig};
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_bootnodes_ordered_by_creation() {
        let store = MemoryStore::new();

        let mut older = Node::new("node-b", "net-1", NodeConfig::default());
        older.bootnode = true;
        older.created_at = Utc::now() - chrono::Duration::seconds(60);
        let mut newer = Node::new("node-a", "net-1", NodeConfig::default());
        newer.bootnode = true;

        store.upsert_node(&newer).await.unwrap();
        store.upsert_node(&older).await.unwrap();

        let bootnodes = store.network_bootnodes("net-1").await.unwrap();
        assert_eq!(bootnodes[0].id, "node-b");
        assert_eq!(bootnodes[1].id, "node-a");
    }

    #[tokio::test]
    async fn test_block_insert_dedupes_by_natural_key() {
        let store = MemoryStore::new();
        let block = Block {
            network_id: "net-1".into(),
            number: 1,
            hash: "0x01".into(),
            timestamp: Utc::now(),
        };
        assert!(store.insert_block(&block).await.unwrap());
        assert!(!store.insert_block(&block).await.unwrap());
        assert!(store.block_recorded("net-1", "0x01").await);
    }

    #[tokio::test]
    async fn test_balancer_filters() {
        let store = MemoryStore::new();
        let mut lb = LoadBalancer::new("lb-1", "net-1", BalancerKind::Rpc, "us-east-1");
        store.upsert_balancer(&lb).await.unwrap();
        lb.id = "lb-2".into();
        lb.region = "eu-west-1".into();
        store.upsert_balancer(&lb).await.unwrap();

        let all = store.network_balancers("net-1", None, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let east = store
            .network_balancers("net-1", Some("us-east-1"), None)
            .await
            .unwrap();
        assert_eq!(east.len(), 1);

        let ws = store
            .network_balancers("net-1", None, Some(BalancerKind::Websocket))
            .await
            .unwrap();
        assert!(ws.is_empty());
    }

    #[tokio::test]
    async fn test_network_round_trip() {
        let store = MemoryStore::new();
        let network = Network::create(
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
        .unwrap();
        store.upsert_network(&network).await.unwrap();
        assert!(store.network("net-1").await.unwrap().is_some());
        assert!(store.network("net-2").await.unwrap().is_none());
    }
}
