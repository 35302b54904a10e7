//! Load balancer provisioning
//!
//! Derives a balancer spec from network + node config, creates the security
//! group and the layer-2 balancer, and persists after every external step so
//! a partial failure resumes from recorded state.

use crate::domain::ports::{
    BalancerSpec, CloudProviderRef, IngressRule, SecurityGroupSpec, StoreRef,
};
use crate::domain::{BalancerKind, BalancerStatus, LoadBalancer, Network, Node};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Provisions and deprovisions cloud load balancers
pub struct LoadBalancerProvisioner {
    store: StoreRef,
    cloud: CloudProviderRef,
}

impl LoadBalancerProvisioner {
    pub fn new(store: StoreRef, cloud: CloudProviderRef) -> Arc<Self> {
        Arc::new(Self { store, cloud })
    }

    /// TCP ingress ports for a network: the explicit security block when one
    /// exists, else the configured RPC and websocket ports
    pub fn ingress_ports(network: &Network) -> Vec<u16> {
        if let Some(security) = &network.config.security {
            let mut ports: Vec<u16> = security
                .ingress
                .values()
                .flat_map(|set| set.tcp.iter().copied())
                .collect();
            ports.sort_unstable();
            ports.dedup();
            if !ports.is_empty() {
                return ports;
            }
        }
        vec![
            network.config.json_rpc_port(),
            network.config.websocket_port(),
        ]
    }

    /// Create a balancer for (network, node region, kind). On success the
    /// balancer is active with its DNS name recorded; on failure it is
    /// persisted failed with a description.
    pub async fn provision(
        &self,
        network: &Network,
        node: &Node,
        kind: BalancerKind,
    ) -> Result<LoadBalancer> {
        let region = node
            .region()
            .ok_or_else(|| Error::Configuration(format!("node {} has no region", node.id)))?;
        let credentials = node.credentials();

        let mut balancer =
            LoadBalancer::new(format!("lb-{}", generate_id()), &network.id, kind, region);
        balancer.config.ingress_ports = Self::ingress_ports(network);
        balancer.credentials = credentials.clone();
        self.store.upsert_balancer(&balancer).await?;

        info!(
            "Provisioning {} balancer {} for network {} in {}",
            kind, balancer.id, network.id, region
        );

        let ingress = vec![IngressRule {
            cidr: "0.0.0.0/0".to_string(),
            tcp_ports: balancer.config.ingress_ports.clone(),
            udp_ports: Vec::new(),
        }];

        let group_spec = SecurityGroupSpec {
            region: region.to_string(),
            credentials: credentials.clone(),
            name: format!("{}-ingress", balancer.id),
            description: format!("ingress for network {}", network.id),
            ingress,
        };

        let group_id = match self.cloud.create_security_group(&group_spec).await {
            Ok(group_id) => group_id,
            Err(err) => {
                balancer.mark_failed(format!("security group creation failed: {}", err));
                self.store.upsert_balancer(&balancer).await?;
                return Err(err);
            }
        };
        balancer.config.security_group_ids.push(group_id);
        self.store.upsert_balancer(&balancer).await?;

        let spec = BalancerSpec {
            region: region.to_string(),
            credentials,
            name: balancer.id.clone(),
            security_group_ids: balancer.config.security_group_ids.clone(),
        };

        match self.cloud.create_balancer(&spec).await {
            Ok(endpoint) => {
                balancer.config.balancer_arn = Some(endpoint.arn);
                balancer.host = Some(endpoint.dns_name);
                balancer.status = BalancerStatus::Active;
                self.store.upsert_balancer(&balancer).await?;
                info!("Balancer {} active at {:?}", balancer.id, balancer.host);
                Ok(balancer)
            }
            Err(err) => {
                balancer.mark_failed(format!("balancer creation failed: {}", err));
                self.store.upsert_balancer(&balancer).await?;
                Err(err)
            }
        }
    }

    /// Tear down the balancer and its security groups, then drop the record
    pub async fn deprovision(&self, balancer_id: &str) -> Result<()> {
        let mut balancer = self
            .store
            .balancer(balancer_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "LoadBalancer".into(),
                name: balancer_id.into(),
            })?;

        balancer.status = BalancerStatus::Deprovisioning;
        self.store.upsert_balancer(&balancer).await?;

        let credentials = balancer.credentials.clone();
        let region = balancer.region.clone();

        if let Some(arn) = balancer.config.balancer_arn.clone() {
            self.cloud.delete_balancer(&region, &credentials, &arn).await?;
            balancer.config.balancer_arn = None;
            self.store.upsert_balancer(&balancer).await?;
        }

        for group_id in balancer.config.security_group_ids.clone() {
            if let Err(err) = self
                .cloud
                .delete_security_group(&region, &credentials, &group_id)
                .await
            {
                warn!(
                    "Failed to delete security group {} of balancer {}: {}",
                    group_id, balancer.id, err
                );
            }
        }

        balancer.status = BalancerStatus::Deleted;
        self.store.upsert_balancer(&balancer).await?;
        self.store.remove_balancer(&balancer.id).await?;
        info!("Deprovisioned balancer {}", balancer.id);
        Ok(())
    }
}

/// Generate a simple unique ID
fn generate_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{:016x}", now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NetworkConfig, NodeConfig, PortSet, SecurityConfig};
    use crate::standalone::{MemoryStore, StandaloneCloud};
    use serde_json::json;

    fn network_with_security(security: Option<SecurityConfig>) -> Network {
        let mut network = Network::create(
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
        network.config.security = security;
        network
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

    #[test]
    fn test_default_ingress_is_rpc_and_websocket() {
        let network = network_with_security(None);
        assert_eq!(
            LoadBalancerProvisioner::ingress_ports(&network),
            vec![8050, 8051]
        );
    }

    #[test]
    fn test_explicit_security_block_wins() {
        let mut ingress = std::collections::BTreeMap::new();
        ingress.insert(
            "0.0.0.0/0".to_string(),
            PortSet {
                tcp: vec![30303, 8050],
                udp: vec![30303],
            },
        );
        let network = network_with_security(Some(SecurityConfig {
            ingress,
            egress: None,
        }));
        assert_eq!(
            LoadBalancerProvisioner::ingress_ports(&network),
            vec![8050, 30303]
        );
    }

    #[tokio::test]
    async fn test_provision_activates_balancer() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let cloud: CloudProviderRef = Arc::new(StandaloneCloud::new());
        let provisioner = LoadBalancerProvisioner::new(store.clone(), cloud);

        let network = network_with_security(None);
        store.upsert_network(&network).await.unwrap();
        let node = region_node("node-1");

        let balancer = provisioner
            .provision(&network, &node, BalancerKind::Rpc)
            .await
            .unwrap();

        assert_eq!(balancer.status, BalancerStatus::Active);
        assert!(balancer.host.is_some());
        assert!(balancer.config.balancer_arn.is_some());
        assert_eq!(balancer.config.security_group_ids.len(), 1);

        let stored = store.balancer(&balancer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BalancerStatus::Active);
    }

    #[tokio::test]
    async fn test_deprovision_removes_record() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let cloud: CloudProviderRef = Arc::new(StandaloneCloud::new());
        let provisioner = LoadBalancerProvisioner::new(store.clone(), cloud);

        let network = network_with_security(None);
        store.upsert_network(&network).await.unwrap();
        let node = region_node("node-1");

        let balancer = provisioner
            .provision(&network, &node, BalancerKind::Rpc)
            .await
            .unwrap();
        provisioner.deprovision(&balancer.id).await.unwrap();

        assert!(store.balancer(&balancer.id).await.unwrap().is_none());
    }
}
