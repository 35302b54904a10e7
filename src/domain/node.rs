//! Node entity
//!
//! A node is a single managed chain client instance. Its public config is
//! persisted as-is; secret-shaped keys are moved into a sealed side-channel
//! before the record ever reaches the store. Runtime addresses come from the
//! container backend and are never persisted.

use crate::domain::ports::Credentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Role / Status
// =============================================================================

/// Functional role a node plays in its network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Peer,
    Full,
    Validator,
    Explorer,
    Ipfs,
    Faucet,
}

impl NodeRole {
    /// Roles that participate in the p2p network by default
    pub fn implies_p2p(&self) -> bool {
        matches!(
            self,
            NodeRole::Full | NodeRole::Peer | NodeRole::Validator | NodeRole::Explorer
        )
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Peer => write!(f, "peer"),
            NodeRole::Full => write!(f, "full"),
            NodeRole::Validator => write!(f, "validator"),
            NodeRole::Explorer => write!(f, "explorer"),
            NodeRole::Ipfs => write!(f, "ipfs"),
            NodeRole::Faucet => write!(f, "faucet"),
        }
    }
}

/// Deployment lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Genesis,
    Peering,
    Running,
    Unreachable,
    Failed,
    Terminated,
}

impl NodeStatus {
    /// Terminal states are never transitioned out of
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Failed | NodeStatus::Terminated)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::Genesis => write!(f, "genesis"),
            NodeStatus::Peering => write!(f, "peering"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Unreachable => write!(f, "unreachable"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Terminated => write!(f, "terminated"),
        }
    }
}

// =============================================================================
// Config
// =============================================================================

/// Public node configuration, persisted verbatim
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Client kind string resolved against the p2p provider factory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<NodeRole>,

    /// Explicit p2p participation; inferred from the role when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p2p: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Opaque external ids assigned by the container backend
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_task_ids: Vec<String>,

    /// Peer URL parsed out of the node's log stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_url: Option<String>,

    /// Cached direct URL from reachability-based resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Secret material split off the public config; sealed by the secrets
/// collaborator before it reaches storage, so it never serializes here.
#[derive(Debug, Clone, Default)]
pub struct NodeSecrets {
    pub credentials: Option<Credentials>,
    pub entries: BTreeMap<String, serde_json::Value>,
}

impl NodeSecrets {
    pub fn is_empty(&self) -> bool {
        self.credentials.is_none() && self.entries.is_empty()
    }
}

/// Config keys that always move to the sealed side-channel
const SECRET_KEYS: &[&str] = &[
    "credentials",
    "engine_signer_private_key",
    "private_key",
    "wallet_private_key",
];

// =============================================================================
// Node
// =============================================================================

/// A managed chain client instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub role: NodeRole,
    pub bootnode: bool,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub config: NodeConfig,
    #[serde(skip)]
    pub secrets: NodeSecrets,
    pub created_at: DateTime<Utc>,

    // Runtime fields from the container backend; never persisted
    #[serde(skip)]
    pub host: Option<String>,
    #[serde(skip)]
    pub ipv4: Option<String>,
    #[serde(skip)]
    pub ipv6: Option<String>,
    #[serde(skip)]
    pub private_ipv4: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, network_id: impl Into<String>, config: NodeConfig) -> Self {
        let role = config.role.unwrap_or(NodeRole::Peer);
        Self {
            id: id.into(),
            network_id: network_id.into(),
            user_id: None,
            application_id: None,
            organization_id: None,
            role,
            bootnode: false,
            status: NodeStatus::Pending,
            description: None,
            config,
            secrets: NodeSecrets::default(),
            created_at: Utc::now(),
            host: None,
            ipv4: None,
            ipv6: None,
            private_ipv4: None,
        }
    }

    /// Align the node's role with its config; the config wins on mismatch
    pub fn coerce_role(&mut self) {
        if let Some(role) = self.config.role {
            if role != self.role {
                self.role = role;
            }
        } else {
            self.config.role = Some(self.role);
        }
    }

    /// Effective p2p participation: the explicit flag, else role inference
    pub fn requires_p2p(&self) -> bool {
        self.config.p2p.unwrap_or_else(|| self.role.implies_p2p())
    }

    /// Move secret-shaped keys out of the public config into the sealed
    /// side-channel. Idempotent.
    pub fn sanitize_config(&mut self) {
        for key in SECRET_KEYS {
            if let Some(value) = self.config.extra.remove(*key) {
                if *key == "credentials" {
                    match serde_json::from_value::<Credentials>(value.clone()) {
                        Ok(creds) => self.secrets.credentials = Some(creds),
                        Err(_) => {
                            self.secrets.entries.insert((*key).to_string(), value);
                        }
                    }
                } else {
                    self.secrets.entries.insert((*key).to_string(), value);
                }
            }
        }

        let secret_env: Vec<String> = self
            .config
            .env
            .keys()
            .filter(|k| k.ends_with("_PRIVATE_KEY") || k.ends_with("_SECRET"))
            .cloned()
            .collect();
        for key in secret_env {
            if let Some(value) = self.config.env.remove(&key) {
                self.secrets
                    .entries
                    .insert(key, serde_json::Value::String(value));
            }
        }
    }

    /// Cloud credentials for this node's operations
    pub fn credentials(&self) -> Credentials {
        self.secrets.credentials.clone().unwrap_or_default()
    }

    pub fn region(&self) -> Option<&str> {
        self.config.region.as_deref()
    }

    /// Publicly reachable address, preferring the hostname
    pub fn reachable_host(&self) -> Option<&str> {
        self.host.as_deref().or(self.ipv4.as_deref())
    }

    /// Record a deploy-path failure and halt the state machine
    pub fn mark_failed(&mut self, description: impl Into<String>) {
        self.status = NodeStatus::Failed;
        self.description = Some(description.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_p2p_inferred_from_role() {
        for role in [
            NodeRole::Full,
            NodeRole::Peer,
            NodeRole::Validator,
            NodeRole::Explorer,
        ] {
            let node = Node::new(
                "n",
                "net",
                NodeConfig {
                    role: Some(role),
                    ..Default::default()
                },
            );
            assert!(node.requires_p2p(), "role {} should imply p2p", role);
        }

        for role in [NodeRole::Ipfs, NodeRole::Faucet] {
            let node = Node::new(
                "n",
                "net",
                NodeConfig {
                    role: Some(role),
                    ..Default::default()
                },
            );
            assert!(!node.requires_p2p(), "role {} should not imply p2p", role);
        }
    }

    #[test]
    fn test_explicit_p2p_flag_wins() {
        let node = Node::new(
            "n",
            "net",
            NodeConfig {
                role: Some(NodeRole::Validator),
                p2p: Some(false),
                ..Default::default()
            },
        );
        assert!(!node.requires_p2p());
    }

    #[test]
    fn test_role_coercion_from_config() {
        let mut node = Node::new("n", "net", NodeConfig::default());
        node.config.role = Some(NodeRole::Validator);
        node.coerce_role();
        assert_eq!(node.role, NodeRole::Validator);
    }

    #[test]
    fn test_sanitize_moves_secrets() {
        let mut config = NodeConfig::default();
        config.extra.insert(
            "credentials".into(),
            json!({"access_key_id": "AKIA", "secret_access_key": "shh"}),
        );
        config
            .extra
            .insert("engine_signer_private_key".into(), json!("0xdeadbeef"));
        config
            .env
            .insert("SIGNER_PRIVATE_KEY".into(), "0xcafe".into());
        config.env.insert("CHAIN".into(), "test".into());

        let mut node = Node::new("n", "net", config);
        node.sanitize_config();

        assert!(node.config.extra.is_empty());
        assert_eq!(node.config.env.len(), 1);
        assert_eq!(
            node.secrets.credentials.as_ref().unwrap().access_key_id,
            Some("AKIA".into())
        );
        assert!(node.secrets.entries.contains_key("engine_signer_private_key"));
        assert!(node.secrets.entries.contains_key("SIGNER_PRIVATE_KEY"));

        // Second pass has nothing left to move
        node.sanitize_config();
        assert_eq!(node.secrets.entries.len(), 2);
    }

    #[test]
    fn test_serialized_node_omits_secrets() {
        let mut node = Node::new("n", "net", NodeConfig::default());
        node.secrets.entries.insert("private_key".into(), json!("x"));
        let encoded = serde_json::to_string(&node).unwrap();
        assert!(!encoded.contains("private_key"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(NodeStatus::Failed.is_terminal());
        assert!(NodeStatus::Terminated.is_terminal());
        assert!(!NodeStatus::Peering.is_terminal());
    }
}
