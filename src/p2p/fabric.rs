//! Hyperledger Fabric adapter
//!
//! Fabric membership is channel-based and managed by MSP configuration, not
//! by runtime peer RPC, so nearly every capability here reports unsupported.

use crate::domain::{Network, Node};
use crate::error::{Error, Result};
use crate::p2p::{ClientKind, P2pProvider};
use async_trait::async_trait;

pub struct FabricProvider;

impl FabricProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FabricProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl P2pProvider for FabricProvider {
    fn client(&self) -> ClientKind {
        ClientKind::HyperledgerFabric
    }

    async fn add_peer(&self, _peer_url: &str) -> Result<()> {
        Err(Error::unsupported("hyperledger-fabric", "add_peer"))
    }

    async fn remove_peer(&self, _peer_url: &str) -> Result<()> {
        Err(Error::unsupported("hyperledger-fabric", "remove_peer"))
    }

    async fn accept_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported(
            "hyperledger-fabric",
            "accept_non_reserved_peers",
        ))
    }

    async fn drop_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported(
            "hyperledger-fabric",
            "drop_non_reserved_peers",
        ))
    }

    async fn resolve_peer_url(&self) -> Result<String> {
        Err(Error::unsupported("hyperledger-fabric", "resolve_peer_url"))
    }

    fn parse_peer_url(&self, _log_line: &str) -> Option<String> {
        None
    }

    fn format_bootnodes(&self, bootnodes: &[String]) -> String {
        bootnodes.join(" ")
    }

    fn require_bootnodes(&self, _network: &Network) -> Result<Vec<String>> {
        // Fabric peers bootstrap from the ordering service, not bootnodes
        Ok(Vec::new())
    }

    fn default_entrypoint(&self) -> Vec<String> {
        vec!["peer".to_string(), "node".to_string(), "start".to_string()]
    }

    fn enrich_start_command(&self, network: &Network, _node: &Node) -> Vec<(String, String)> {
        vec![(
            "CORE_PEER_NETWORKID".to_string(),
            network.chain_id.map(|id| id.to_string()).unwrap_or_default(),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_ops_unsupported() {
        let provider = FabricProvider::new();
        assert!(provider.add_peer("peer0.org1:7051").await.unwrap_err().is_unsupported());
        assert!(provider.remove_peer("peer0.org1:7051").await.unwrap_err().is_unsupported());
        assert!(provider.resolve_peer_url().await.unwrap_err().is_unsupported());
    }

    #[test]
    fn test_no_peer_urls_in_logs() {
        let provider = FabricProvider::new();
        assert_eq!(provider.parse_peer_url("anything"), None);
    }
}
