//! P2P Provider Abstraction
//!
//! Per-client-kind adapters translating generic peer-management operations
//! into a node's native RPC calls:
//! - Geth, Quorum, Nethermind: admin namespace over JSON-RPC
//! - Parity/OpenEthereum: parity namespace with reserved-peer support
//! - Hyperledger Fabric, Baseledger, Hedera: membership is managed out of
//!   band; most peer operations report unsupported
//!
//! Unimplemented capabilities return [`Error::Unsupported`] - a terminal,
//! expected outcome, not a retry condition. An unknown client kind is a
//! fatal configuration error at deploy time.

pub mod baseledger;
pub mod fabric;
pub mod geth;
pub mod hedera;
pub mod nethermind;
pub mod parity;
pub mod quorum;

pub use baseledger::BaseledgerProvider;
pub use fabric::FabricProvider;
pub use geth::GethProvider;
pub use hedera::HederaProvider;
pub use nethermind::NethermindProvider;
pub use parity::ParityProvider;
pub use quorum::QuorumProvider;

use crate::domain::ports::ChainRpcRef;
use crate::domain::{Network, Node};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Client Kind
// =============================================================================

/// Chain client implementations the operator can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientKind {
    Geth,
    Parity,
    Quorum,
    Nethermind,
    HyperledgerFabric,
    Baseledger,
    Hedera,
}

impl ClientKind {
    /// Parse the client string carried in node/network config
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "geth" => Some(ClientKind::Geth),
            "parity" | "openethereum" => Some(ClientKind::Parity),
            "quorum" => Some(ClientKind::Quorum),
            "nethermind" => Some(ClientKind::Nethermind),
            "hyperledger-fabric" | "fabric" => Some(ClientKind::HyperledgerFabric),
            "baseledger" => Some(ClientKind::Baseledger),
            "hedera" => Some(ClientKind::Hedera),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKind::Geth => write!(f, "geth"),
            ClientKind::Parity => write!(f, "parity"),
            ClientKind::Quorum => write!(f, "quorum"),
            ClientKind::Nethermind => write!(f, "nethermind"),
            ClientKind::HyperledgerFabric => write!(f, "hyperledger-fabric"),
            ClientKind::Baseledger => write!(f, "baseledger"),
            ClientKind::Hedera => write!(f, "hedera"),
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Capability interface over a node's native peer management
#[async_trait]
pub trait P2pProvider: Send + Sync {
    fn client(&self) -> ClientKind;

    async fn add_peer(&self, peer_url: &str) -> Result<()>;

    async fn remove_peer(&self, peer_url: &str) -> Result<()>;

    async fn accept_non_reserved_peers(&self) -> Result<()>;

    async fn drop_non_reserved_peers(&self) -> Result<()>;

    /// Resolve this node's own peer URL via its RPC surface
    async fn resolve_peer_url(&self) -> Result<String>;

    /// Extract a peer URL from one line of the node's log stream
    fn parse_peer_url(&self, log_line: &str) -> Option<String>;

    /// Render registered bootnode URLs into the client's start-command form
    fn format_bootnodes(&self, bootnodes: &[String]) -> String;

    /// The bootnodes a dependent node must be given before it can peer
    fn require_bootnodes(&self, network: &Network) -> Result<Vec<String>> {
        let bootnodes = network.config.bootnodes.clone();
        if bootnodes.is_empty() {
            return Err(Error::Configuration(format!(
                "network {} has no registered bootnodes",
                network.id
            )));
        }
        Ok(bootnodes)
    }

    /// In-place client version upgrade
    async fn upgrade(&self) -> Result<()> {
        Err(Error::unsupported(&self.client().to_string(), "upgrade"))
    }

    /// Container entrypoint when node config does not set one
    fn default_entrypoint(&self) -> Vec<String>;

    /// Environment enrichment applied to the launch spec
    fn enrich_start_command(&self, network: &Network, node: &Node) -> Vec<(String, String)>;
}

pub type P2pProviderRef = Arc<dyn P2pProvider>;

// =============================================================================
// Factory
// =============================================================================

/// Factory resolving a provider from the configured client-kind string
pub struct P2pFactory;

impl P2pFactory {
    pub fn create(client: &str, rpc: ChainRpcRef, rpc_url: String) -> Result<P2pProviderRef> {
        let kind = ClientKind::parse(client).ok_or_else(|| {
            Error::Configuration(format!("unknown p2p client kind: {}", client))
        })?;

        Ok(match kind {
            ClientKind::Geth => Arc::new(GethProvider::new(rpc, rpc_url)),
            ClientKind::Parity => Arc::new(ParityProvider::new(rpc, rpc_url)),
            ClientKind::Quorum => Arc::new(QuorumProvider::new(rpc, rpc_url)),
            ClientKind::Nethermind => Arc::new(NethermindProvider::new(rpc, rpc_url)),
            ClientKind::HyperledgerFabric => Arc::new(FabricProvider::new()),
            ClientKind::Baseledger => Arc::new(BaseledgerProvider::new()),
            ClientKind::Hedera => Arc::new(HederaProvider::new()),
        })
    }

    /// Resolve the provider for a node, falling back to the network's
    /// default client kind
    pub fn for_node(node: &Node, network: &Network, rpc: ChainRpcRef) -> Result<P2pProviderRef> {
        let client = node
            .config
            .client
            .clone()
            .or_else(|| network.config.client.clone())
            .ok_or_else(|| {
                Error::Configuration(format!("node {} has no configured client", node.id))
            })?;

        let host = node.reachable_host().unwrap_or("127.0.0.1");
        let rpc_url = format!("http://{}:{}", host, network.config.json_rpc_port());
        Self::create(&client, rpc, rpc_url)
    }
}

// =============================================================================
// Peer URL Helpers
// =============================================================================

/// True for addresses a peer URL must never advertise
fn is_private_address(host: &str) -> bool {
    if host == "0.0.0.0" || host == "localhost" {
        return true;
    }
    let octets: Vec<u8> = host.split('.').filter_map(|o| o.parse().ok()).collect();
    if octets.len() != 4 {
        return false;
    }
    match octets[0] {
        127 | 10 => true,
        172 => (16..=31).contains(&octets[1]),
        192 => octets[1] == 168,
        169 => octets[1] == 254,
        _ => false,
    }
}

/// Rewrite the host portion of an enode-style URL when it advertises a
/// private or loopback address
pub fn rewrite_peer_url_host(peer_url: &str, public_host: &str) -> String {
    let Some(at) = peer_url.rfind('@') else {
        return peer_url.to_string();
    };
    let (head, tail) = peer_url.split_at(at + 1);
    let (host, rest) = match tail.find(':') {
        Some(colon) => tail.split_at(colon),
        None => (tail, ""),
    };

    if is_private_address(host) {
        format!("{}{}{}", head, public_host, rest)
    } else {
        peer_url.to_string()
    }
}
