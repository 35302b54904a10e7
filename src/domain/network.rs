//! Network entity
//!
//! A network is the unit of tenancy: a chain definition plus the fleet of
//! nodes and balancers operating it. Config is a typed struct with an
//! explicit extra bag; validation accumulates every violation rather than
//! short-circuiting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default JSON-RPC port exposed by managed nodes
pub const DEFAULT_JSON_RPC_PORT: u16 = 8050;

/// Default websocket port exposed by managed nodes
pub const DEFAULT_WEBSOCKET_PORT: u16 = 8051;

// =============================================================================
// Chain Family
// =============================================================================

/// Chain families the stats pipeline distinguishes between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Fabric,
    Hedera,
}

impl std::fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainFamily::Evm => write!(f, "evm"),
            ChainFamily::Fabric => write!(f, "fabric"),
            ChainFamily::Hedera => write!(f, "hedera"),
        }
    }
}

// =============================================================================
// Security Config
// =============================================================================

/// TCP/UDP port set opened for a CIDR
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSet {
    #[serde(default)]
    pub tcp: Vec<u16>,
    #[serde(default)]
    pub udp: Vec<u16>,
}

/// Network-level security description: ingress port sets keyed by CIDR
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub ingress: BTreeMap<String, PortSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<serde_json::Value>,
}

// =============================================================================
// Network Config
// =============================================================================

/// Typed network configuration
///
/// `extra` carries forward-compatible fields the operator does not interpret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain: Option<String>,
    pub engine_id: Option<String>,
    pub native_currency: Option<String>,
    pub protocol_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chainspec: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chainspec_url: Option<String>,

    /// Default client kind for nodes of this network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    /// Chain family override; EVM when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<ChainFamily>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_rpc_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_port: Option<u16>,

    /// Endpoint the stats daemon polls; rewritten when the fleet re-balances
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_rpc_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,

    /// Peer URLs of elected bootnodes, in registration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bootnodes: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NetworkConfig {
    pub fn json_rpc_port(&self) -> u16 {
        self.json_rpc_port.unwrap_or(DEFAULT_JSON_RPC_PORT)
    }

    pub fn websocket_port(&self) -> u16 {
        self.websocket_port.unwrap_or(DEFAULT_WEBSOCKET_PORT)
    }
}

// =============================================================================
// Network
// =============================================================================

/// A managed blockchain network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    /// Owner: application XOR user XOR neither (public network)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub name: String,
    /// Assigned once at creation, immutable thereafter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub enabled: bool,
    pub production: bool,
    pub cloneable: bool,
    pub config: NetworkConfig,
    pub created_at: DateTime<Utc>,
}

impl Network {
    /// Build and validate a network; assigns the chain id
    pub fn create(
        id: impl Into<String>,
        name: impl Into<String>,
        config: NetworkConfig,
    ) -> crate::error::Result<Self> {
        let mut network = Self {
            id: id.into(),
            application_id: None,
            user_id: None,
            name: name.into(),
            chain_id: None,
            enabled: true,
            production: false,
            cloneable: false,
            config,
            created_at: Utc::now(),
        };

        let errors = network.validate();
        if !errors.is_empty() {
            return Err(crate::error::Error::Validation {
                entity: "network".into(),
                errors,
            });
        }

        network.assign_chain_id();
        Ok(network)
    }

    /// Accumulate every config violation; an empty vec means valid
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let cfg = &self.config;

        if cfg.chain.is_none() {
            errors.push("config chain is required".to_string());
        }
        if cfg.engine_id.is_none() {
            errors.push("config engine_id is required".to_string());
        }
        if cfg.native_currency.is_none() {
            errors.push("config native_currency is required".to_string());
        }
        if cfg.protocol_id.is_none() {
            errors.push("config protocol_id is required".to_string());
        }
        if cfg.chainspec.is_none() && cfg.chainspec_url.is_none() {
            errors.push("config chainspec or chainspec_url is required".to_string());
        }
        if self.cloneable && cfg.security.is_none() {
            errors.push("cloneable network requires a security config".to_string());
        }
        if self.application_id.is_some() && self.user_id.is_some() {
            errors.push("network cannot be owned by both an application and a user".to_string());
        }

        errors
    }

    /// Assign the chain id exactly once. Prefers the chainspec's declared
    /// chain id; otherwise derives a stable id from the network id.
    pub fn assign_chain_id(&mut self) {
        if self.chain_id.is_some() {
            return;
        }
        let declared = self
            .config
            .chainspec
            .as_ref()
            .and_then(|spec| spec.pointer("/params/chainId"))
            .and_then(|v| v.as_u64());

        self.chain_id = Some(declared.unwrap_or_else(|| {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            self.id.hash(&mut hasher);
            hasher.finish()
        }));
    }

    pub fn chain_family(&self) -> ChainFamily {
        self.config.platform.unwrap_or(ChainFamily::Evm)
    }

    /// Whether finalized blocks of this network are republished on the bus
    pub fn is_ethereum_network(&self) -> bool {
        self.chain_family() == ChainFamily::Evm
    }

    /// Endpoint the stats daemon polls, when one is known
    pub fn json_rpc_url(&self) -> Option<String> {
        self.config.json_rpc_url.clone()
    }

    pub fn websocket_url(&self) -> Option<String> {
        self.config.websocket_url.clone()
    }

    /// Register an elected bootnode's peer URL
    pub fn register_bootnode(&mut self, peer_url: &str) {
        if !self.config.bootnodes.iter().any(|url| url == peer_url) {
            self.config.bootnodes.push(peer_url.to_string());
        }
    }
}
