//! Node balancing
//!
//! Attaches and detaches nodes behind a provisioned balancer. Target groups
//! are created lazily per port and their ARNs cached on the balancer config,
//! which is what makes a repeated balance call idempotent. Every external
//! step persists before the next so a mid-sequence failure resumes instead
//! of rolling back.

use crate::consumer::{DeprovisionBalancerMessage, SUBJECT_BALANCER_DEPROVISION};
use crate::domain::ports::{CloudProviderRef, MessageBusRef, StoreRef};
use crate::domain::{BalancerStatus, LoadBalancer, Node};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, warn};

/// Registers and deregisters nodes behind load balancers
pub struct BalancerAttachment {
    store: StoreRef,
    cloud: CloudProviderRef,
    bus: MessageBusRef,
}

impl BalancerAttachment {
    pub fn new(store: StoreRef, cloud: CloudProviderRef, bus: MessageBusRef) -> Arc<Self> {
        Arc::new(Self { store, cloud, bus })
    }

    /// Register a node behind a balancer on every configured ingress port
    pub async fn balance(&self, balancer_id: &str, node: &Node, private_ip: &str) -> Result<()> {
        let mut balancer = self.require_balancer(balancer_id).await?;
        let credentials = balancer.credentials.clone();
        let region = balancer.region.clone();

        let balancer_arn = balancer
            .config
            .balancer_arn
            .clone()
            .ok_or_else(|| {
                Error::Configuration(format!("balancer {} has no provider arn", balancer.id))
            })?;

        for port in balancer.config.ingress_ports.clone() {
            let target_group_arn = match balancer.config.target_groups.get(&port) {
                Some(arn) => arn.clone(),
                None => {
                    let name = format!("{}-{}", balancer.id, port);
                    let arn = self
                        .cloud
                        .create_target_group(&region, &credentials, &name, port)
                        .await?;
                    balancer.config.target_groups.insert(port, arn.clone());
                    self.store.upsert_balancer(&balancer).await?;
                    arn
                }
            };

            self.cloud
                .register_target(&region, &credentials, &target_group_arn, private_ip, port)
                .await?;

            if !balancer.config.listeners.contains_key(&port) {
                let listener_arn = self
                    .cloud
                    .create_listener(&region, &credentials, &balancer_arn, &target_group_arn, port)
                    .await?;
                balancer.config.listeners.insert(port, listener_arn);
                self.store.upsert_balancer(&balancer).await?;
            }
        }

        balancer.attach_node(&node.id);
        self.store.upsert_balancer(&balancer).await?;
        info!("Balanced node {} behind {}", node.id, balancer.id);
        Ok(())
    }

    /// Deregister a node from every target group it was registered in; when
    /// it was the last node, delete the target groups and request full
    /// deprovisioning asynchronously
    pub async fn unbalance(&self, balancer_id: &str, node: &Node, private_ip: &str) -> Result<()> {
        let mut balancer = self.require_balancer(balancer_id).await?;
        if !balancer.balances_node(&node.id) {
            return Ok(());
        }

        let credentials = balancer.credentials.clone();
        let region = balancer.region.clone();

        for (port, target_group_arn) in balancer.config.target_groups.clone() {
            if let Err(err) = self
                .cloud
                .deregister_target(&region, &credentials, &target_group_arn, private_ip, port)
                .await
            {
                warn!(
                    "Failed to deregister node {} from target group {}: {}",
                    node.id, target_group_arn, err
                );
            }
        }

        let remaining = balancer.detach_node(&node.id);
        self.store.upsert_balancer(&balancer).await?;
        info!(
            "Unbalanced node {} from {} ({} nodes remain)",
            node.id, balancer.id, remaining
        );

        if remaining == 0 {
            self.teardown_target_groups(&mut balancer).await?;
            self.request_deprovision(&balancer).await;
        }
        Ok(())
    }

    /// Detach a node from every balancer of its network
    pub async fn unbalance_all(&self, node: &Node) -> Result<()> {
        let private_ip = node
            .private_ipv4
            .clone()
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let balancers = self
            .store
            .network_balancers(&node.network_id, None, None)
            .await?;

        for balancer in balancers {
            if balancer.balances_node(&node.id) {
                self.unbalance(&balancer.id, node, &private_ip).await?;
            }
        }
        Ok(())
    }

    /// Delete every target group once; failures are logged, not retried
    async fn teardown_target_groups(&self, balancer: &mut LoadBalancer) -> Result<()> {
        let credentials = balancer.credentials.clone();
        let region = balancer.region.clone();

        for (port, target_group_arn) in balancer.config.target_groups.clone() {
            if let Err(err) = self
                .cloud
                .delete_target_group(&region, &credentials, &target_group_arn)
                .await
            {
                warn!(
                    "Failed to delete target group {} (port {}): {}",
                    target_group_arn, port, err
                );
            }
        }
        balancer.config.target_groups.clear();
        balancer.config.listeners.clear();
        balancer.status = BalancerStatus::Deprovisioning;
        self.store.upsert_balancer(balancer).await?;
        Ok(())
    }

    async fn request_deprovision(&self, balancer: &LoadBalancer) {
        let msg = DeprovisionBalancerMessage {
            balancer_id: balancer.id.clone(),
        };
        let payload = match serde_json::to_vec(&msg) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode deprovision message: {}", err);
                return;
            }
        };
        if let Err(err) = self
            .bus
            .publish(SUBJECT_BALANCER_DEPROVISION, Bytes::from(payload))
            .await
        {
            warn!(
                "Failed to request deprovisioning of balancer {}: {}",
                balancer.id, err
            );
        }
    }

    async fn require_balancer(&self, balancer_id: &str) -> Result<LoadBalancer> {
        self.store
            .balancer(balancer_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "LoadBalancer".into(),
                name: balancer_id.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancing::LoadBalancerProvisioner;
    use crate::domain::ports::{MessageBus, Subscription};
    use crate::domain::{BalancerKind, Network, NetworkConfig, NodeConfig};
    use crate::standalone::{MemoryBus, MemoryStore, StandaloneCloud};
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

    fn region_node(id: &str) -> Node {
        Node::new(
            id,
            "net-1",
            NodeConfig {
                region: Some("us-east-1".into()),
                ..Default::default()
            },
        )
    }

    async fn setup() -> (
        Arc<BalancerAttachment>,
        Arc<LoadBalancerProvisioner>,
        StoreRef,
        Arc<MemoryBus>,
        Arc<StandaloneCloud>,
    ) {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let cloud = Arc::new(StandaloneCloud::new());
        let bus = Arc::new(MemoryBus::new());
        let attachment = BalancerAttachment::new(store.clone(), cloud.clone(), bus.clone());
        let provisioner = LoadBalancerProvisioner::new(store.clone(), cloud.clone());
        (attachment, provisioner, store, bus, cloud)
    }

    #[tokio::test]
    async fn test_balance_is_idempotent() {
        let (attachment, provisioner, store, _bus, cloud) = setup().await;
        let network = test_network();
        store.upsert_network(&network).await.unwrap();
        let node = region_node("node-1");

        let balancer = provisioner
            .provision(&network, &node, BalancerKind::Rpc)
            .await
            .unwrap();

        attachment.balance(&balancer.id, &node, "10.0.0.4").await.unwrap();
        attachment.balance(&balancer.id, &node, "10.0.0.4").await.unwrap();

        let stored = store.balancer(&balancer.id).await.unwrap().unwrap();
        // One target group per ingress port, despite two balance calls
        assert_eq!(stored.config.target_groups.len(), 2);
        assert_eq!(stored.balanced_node_ids, vec!["node-1".to_string()]);
        assert_eq!(cloud.target_group_count().await, 2);
    }

    #[tokio::test]
    async fn test_last_node_unbalance_requests_one_deprovision() {
        let (attachment, provisioner, store, bus, _cloud) = setup().await;
        let network = test_network();
        store.upsert_network(&network).await.unwrap();
        let node_a = region_node("node-a");
        let node_b = region_node("node-b");

        let balancer = provisioner
            .provision(&network, &node_a, BalancerKind::Rpc)
            .await
            .unwrap();
        attachment.balance(&balancer.id, &node_a, "10.0.0.4").await.unwrap();
        attachment.balance(&balancer.id, &node_b, "10.0.0.5").await.unwrap();

        let mut sub = bus
            .subscribe(SUBJECT_BALANCER_DEPROVISION, "test")
            .await
            .unwrap();

        attachment.unbalance(&balancer.id, &node_a, "10.0.0.4").await.unwrap();
        attachment.unbalance(&balancer.id, &node_b, "10.0.0.5").await.unwrap();

        // Exactly one deprovision request, fired by the final unbalance
        let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), sub.next())
            .await
            .expect("deprovision message expected")
            .unwrap();
        let msg: DeprovisionBalancerMessage =
            serde_json::from_slice(delivery.payload()).unwrap();
        assert_eq!(msg.balancer_id, balancer.id);

        let no_more =
            tokio::time::timeout(std::time::Duration::from_millis(200), sub.next()).await;
        assert!(no_more.is_err(), "only one deprovision request expected");

        let stored = store.balancer(&balancer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BalancerStatus::Deprovisioning);
        assert!(stored.config.target_groups.is_empty());
    }

    #[tokio::test]
    async fn test_unbalance_unknown_node_is_noop() {
        let (attachment, provisioner, store, _bus, _cloud) = setup().await;
        let network = test_network();
        store.upsert_network(&network).await.unwrap();
        let node = region_node("node-1");

        let balancer = provisioner
            .provision(&network, &node, BalancerKind::Rpc)
            .await
            .unwrap();

        // Never balanced, so nothing to do
        attachment.unbalance(&balancer.id, &node, "10.0.0.4").await.unwrap();
        let stored = store.balancer(&balancer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BalancerStatus::Active);
    }
}
