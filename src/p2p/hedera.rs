//! Hedera adapter
//!
//! Hedera consensus nodes are a permissioned council; the operator cannot
//! mutate the peer set at all. Every capability reports unsupported so call
//! sites stay exhaustive.

use crate::domain::{Network, Node};
use crate::error::{Error, Result};
use crate::p2p::{ClientKind, P2pProvider};
use async_trait::async_trait;

pub struct HederaProvider;

impl HederaProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HederaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl P2pProvider for HederaProvider {
    fn client(&self) -> ClientKind {
        ClientKind::Hedera
    }

    async fn add_peer(&self, _peer_url: &str) -> Result<()> {
        Err(Error::unsupported("hedera", "add_peer"))
    }

    async fn remove_peer(&self, _peer_url: &str) -> Result<()> {
        Err(Error::unsupported("hedera", "remove_peer"))
    }

    async fn accept_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("hedera", "accept_non_reserved_peers"))
    }

    async fn drop_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("hedera", "drop_non_reserved_peers"))
    }

    async fn resolve_peer_url(&self) -> Result<String> {
        Err(Error::unsupported("hedera", "resolve_peer_url"))
    }

    fn parse_peer_url(&self, _log_line: &str) -> Option<String> {
        None
    }

    fn format_bootnodes(&self, bootnodes: &[String]) -> String {
        bootnodes.join(",")
    }

    fn require_bootnodes(&self, _network: &Network) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn default_entrypoint(&self) -> Vec<String> {
        Vec::new()
    }

    fn enrich_start_command(&self, _network: &Network, _node: &Node) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_everything_unsupported() {
        let provider = HederaProvider::new();
        assert!(provider.add_peer("x").await.unwrap_err().is_unsupported());
        assert!(provider.accept_non_reserved_peers().await.unwrap_err().is_unsupported());
        assert!(provider.upgrade().await.unwrap_err().is_unsupported());
    }
}
