//! Load balancer entity
//!
//! One balancer exists per (network, region, kind) with at least one node
//! needing it. Provisioning state lands in the config incrementally so a
//! partial failure resumes instead of rolling back.

use crate::domain::ports::Credentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Kind / Status
// =============================================================================

/// Traffic class a balancer fronts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancerKind {
    Rpc,
    Websocket,
    Ipfs,
    BlockExplorer,
}

impl std::fmt::Display for BalancerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalancerKind::Rpc => write!(f, "rpc"),
            BalancerKind::Websocket => write!(f, "websocket"),
            BalancerKind::Ipfs => write!(f, "ipfs"),
            BalancerKind::BlockExplorer => write!(f, "block-explorer"),
        }
    }
}

/// Provisioning lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancerStatus {
    Provisioning,
    Active,
    Failed,
    Deprovisioning,
    Deleted,
}

impl std::fmt::Display for BalancerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalancerStatus::Provisioning => write!(f, "provisioning"),
            BalancerStatus::Active => write!(f, "active"),
            BalancerStatus::Failed => write!(f, "failed"),
            BalancerStatus::Deprovisioning => write!(f, "deprovisioning"),
            BalancerStatus::Deleted => write!(f, "deleted"),
        }
    }
}

// =============================================================================
// Config
// =============================================================================

/// Cloud resource identities accumulated while provisioning and balancing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub balancer_arn: Option<String>,

    /// Target group ARNs keyed by port; the cache that makes balancing
    /// idempotent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target_groups: BTreeMap<u16, String>,

    /// Listener ARNs keyed by port
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub listeners: BTreeMap<u16, String>,

    /// TCP ports this balancer fronts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress_ports: Vec<u16>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// =============================================================================
// LoadBalancer
// =============================================================================

/// A provisioned cloud load balancer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub network_id: String,
    pub kind: BalancerKind,
    pub region: String,
    pub status: BalancerStatus,
    /// DNS name assigned by the cloud provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub config: BalancerConfig,
    /// Cloud credentials captured at provision time; sealed by the secrets
    /// collaborator at rest, so they never serialize here
    #[serde(skip)]
    pub credentials: Credentials,
    /// Nodes currently registered behind this balancer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub balanced_node_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl LoadBalancer {
    pub fn new(
        id: impl Into<String>,
        network_id: impl Into<String>,
        kind: BalancerKind,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            network_id: network_id.into(),
            kind,
            region: region.into(),
            status: BalancerStatus::Provisioning,
            host: None,
            description: None,
            config: BalancerConfig::default(),
            credentials: Credentials::default(),
            balanced_node_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BalancerStatus::Active
    }

    pub fn balances_node(&self, node_id: &str) -> bool {
        self.balanced_node_ids.iter().any(|id| id == node_id)
    }

    pub fn attach_node(&mut self, node_id: &str) {
        if !self.balances_node(node_id) {
            self.balanced_node_ids.push(node_id.to_string());
        }
    }

    /// Detach a node; returns the count of nodes still balanced
    pub fn detach_node(&mut self, node_id: &str) -> usize {
        self.balanced_node_ids.retain(|id| id != node_id);
        self.balanced_node_ids.len()
    }

    pub fn mark_failed(&mut self, description: impl Into<String>) {
        self.status = BalancerStatus::Failed;
        self.description = Some(description.into());
    }
}
