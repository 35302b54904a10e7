//! Domain Ports - Core trait definitions for the fleet operator
//!
//! These traits define the boundaries between the orchestration logic and
//! external systems: persistence, the cloud API, the container orchestration
//! backend, the message bus, and chain JSON-RPC endpoints. Adapters implement
//! these traits to provide concrete functionality.

use crate::domain::{BalancerKind, Block, LoadBalancer, Network, Node};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Credentials
// =============================================================================

/// Cloud credentials carried in entity config
///
/// Stored in the node's sealed config at rest; handed to the cloud and
/// container backend ports per call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Provider-specific fields (session tokens, project ids)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.access_key_id.is_none() && self.secret_access_key.is_none() && self.extra.is_empty()
    }
}

// =============================================================================
// Persistence Port
// =============================================================================

/// Port for entity persistence
///
/// Upserts are last-write-wins: config blobs are read-modify-written without
/// optimistic concurrency, so callers mutating the same entity must serialize
/// their writes.
#[async_trait]
pub trait Store: Send + Sync {
    async fn network(&self, id: &str) -> Result<Option<Network>>;
    async fn upsert_network(&self, network: &Network) -> Result<()>;

    async fn node(&self, id: &str) -> Result<Option<Node>>;
    async fn upsert_node(&self, node: &Node) -> Result<()>;
    async fn remove_node(&self, id: &str) -> Result<()>;

    /// All nodes belonging to a network
    async fn network_nodes(&self, network_id: &str) -> Result<Vec<Node>>;

    /// Bootnodes of a network, ordered by creation time ascending
    async fn network_bootnodes(&self, network_id: &str) -> Result<Vec<Node>>;

    async fn balancer(&self, id: &str) -> Result<Option<LoadBalancer>>;
    async fn upsert_balancer(&self, balancer: &LoadBalancer) -> Result<()>;
    async fn remove_balancer(&self, id: &str) -> Result<()>;

    /// Balancers of a network, optionally narrowed by region and kind
    async fn network_balancers(
        &self,
        network_id: &str,
        region: Option<&str>,
        kind: Option<BalancerKind>,
    ) -> Result<Vec<LoadBalancer>>;

    /// Insert a finalized block keyed by (network id, block hash).
    /// Returns false when the block was already recorded, which is how
    /// at-least-once consumers dedupe redeliveries.
    async fn insert_block(&self, block: &Block) -> Result<bool>;
}

// =============================================================================
// Cloud Provider Port
// =============================================================================

/// A single ingress rule applied to a provisioned security group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressRule {
    pub cidr: String,
    pub tcp_ports: Vec<u16>,
    pub udp_ports: Vec<u16>,
}

/// Request to create a security group
#[derive(Debug, Clone)]
pub struct SecurityGroupSpec {
    pub region: String,
    pub credentials: Credentials,
    pub name: String,
    pub description: String,
    pub ingress: Vec<IngressRule>,
}

/// Request to create a layer-2 load balancer
#[derive(Debug, Clone)]
pub struct BalancerSpec {
    pub region: String,
    pub credentials: Credentials,
    pub name: String,
    pub security_group_ids: Vec<String>,
}

/// Provisioned balancer identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerEndpoint {
    pub arn: String,
    pub dns_name: String,
}

/// Port for cloud infrastructure operations, keyed by region + credentials
/// from entity config
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_security_group(&self, spec: &SecurityGroupSpec) -> Result<String>;

    async fn delete_security_group(
        &self,
        region: &str,
        credentials: &Credentials,
        group_id: &str,
    ) -> Result<()>;

    async fn create_balancer(&self, spec: &BalancerSpec) -> Result<BalancerEndpoint>;

    async fn delete_balancer(
        &self,
        region: &str,
        credentials: &Credentials,
        arn: &str,
    ) -> Result<()>;

    async fn create_target_group(
        &self,
        region: &str,
        credentials: &Credentials,
        name: &str,
        port: u16,
    ) -> Result<String>;

    async fn delete_target_group(
        &self,
        region: &str,
        credentials: &Credentials,
        arn: &str,
    ) -> Result<()>;

    async fn register_target(
        &self,
        region: &str,
        credentials: &Credentials,
        target_group_arn: &str,
        ip: &str,
        port: u16,
    ) -> Result<()>;

    async fn deregister_target(
        &self,
        region: &str,
        credentials: &Credentials,
        target_group_arn: &str,
        ip: &str,
        port: u16,
    ) -> Result<()>;

    async fn create_listener(
        &self,
        region: &str,
        credentials: &Credentials,
        balancer_arn: &str,
        target_group_arn: &str,
        port: u16,
    ) -> Result<String>;
}

// =============================================================================
// Container Backend Port ("C2")
// =============================================================================

/// Request to launch a node on the container orchestration backend
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub node_id: String,
    pub network_id: String,
    pub region: String,
    pub credentials: Credentials,
    pub image: Option<String>,
    pub entrypoint: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Runtime identity of a launched node
///
/// Host/address fields are ephemeral: populated by the backend, never
/// persisted on the node record.
#[derive(Debug, Clone, Default)]
pub struct LaunchResult {
    pub task_ids: Vec<String>,
    pub host: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub private_ipv4: Option<String>,
}

/// One page of node logs
#[derive(Debug, Clone, Default)]
pub struct LogPage {
    pub lines: Vec<String>,
    pub next_token: Option<String>,
}

/// Port for the node/container orchestration backend
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Launch a node; the returned task ids are the opaque external ids
    /// recorded on the node
    async fn create_node(&self, spec: &LaunchSpec) -> Result<LaunchResult>;

    async fn delete_node(
        &self,
        region: &str,
        credentials: &Credentials,
        task_id: &str,
    ) -> Result<()>;

    /// Re-resolve a task's runtime addresses; these are ephemeral and never
    /// persisted on the node record
    async fn describe_node(
        &self,
        region: &str,
        credentials: &Credentials,
        task_id: &str,
    ) -> Result<LaunchResult>;

    /// Fetch one page of a task's log stream
    async fn node_logs(
        &self,
        region: &str,
        credentials: &Credentials,
        task_id: &str,
        page_token: Option<&str>,
    ) -> Result<LogPage>;
}

// =============================================================================
// Message Bus Port
// =============================================================================

/// A single consumed message with manual acknowledgment
#[async_trait]
pub trait Delivery: Send {
    fn payload(&self) -> &[u8];

    /// Acknowledge successful handling
    async fn ack(&mut self) -> Result<()>;

    /// Negative-acknowledge; the bus redelivers after the given delay
    async fn nack(&mut self, redeliver_after: Duration) -> Result<()>;
}

/// A queue-group subscription draining one subject
#[async_trait]
pub trait Subscription: Send {
    /// Next message, or None when the subscription is closed
    async fn next(&mut self) -> Option<Box<dyn Delivery>>;
}

/// Port for publish/subscribe messaging with queue-group semantics
/// (one delivery per group) and manual ack/nack
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    async fn subscribe(&self, subject: &str, queue_group: &str) -> Result<Box<dyn Subscription>>;
}

// =============================================================================
// Chain RPC Port
// =============================================================================

/// Port for generic JSON-RPC invocation against a chain endpoint
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn invoke(
        &self,
        url: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type StoreRef = Arc<dyn Store>;
pub type CloudProviderRef = Arc<dyn CloudProvider>;
pub type ContainerBackendRef = Arc<dyn ContainerBackend>;
pub type MessageBusRef = Arc<dyn MessageBus>;
pub type ChainRpcRef = Arc<dyn ChainRpc>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_emptiness() {
        assert!(Credentials::default().is_empty());

        let creds = Credentials {
            access_key_id: Some("AKIA...".into()),
            ..Default::default()
        };
        assert!(!creds.is_empty());
    }
}
