//! Baseledger adapter
//!
//! Tendermint-style peering: peers are identified as node-id@host:port and
//! wired at start time; runtime peer mutation is not exposed.

use crate::domain::{Network, Node};
use crate::error::{Error, Result};
use crate::p2p::{ClientKind, P2pProvider};
use async_trait::async_trait;

pub struct BaseledgerProvider;

impl BaseledgerProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BaseledgerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl P2pProvider for BaseledgerProvider {
    fn client(&self) -> ClientKind {
        ClientKind::Baseledger
    }

    async fn add_peer(&self, _peer_url: &str) -> Result<()> {
        Err(Error::unsupported("baseledger", "add_peer"))
    }

    async fn remove_peer(&self, _peer_url: &str) -> Result<()> {
        Err(Error::unsupported("baseledger", "remove_peer"))
    }

    async fn accept_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("baseledger", "accept_non_reserved_peers"))
    }

    async fn drop_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("baseledger", "drop_non_reserved_peers"))
    }

    async fn resolve_peer_url(&self) -> Result<String> {
        Err(Error::unsupported("baseledger", "resolve_peer_url"))
    }

    fn parse_peer_url(&self, log_line: &str) -> Option<String> {
        // Tendermint announces: ... p2p address <node-id>@<ip>:26656
        let marker = "p2p address ";
        let start = log_line.find(marker)? + marker.len();
        let candidate = log_line[start..].trim();
        let end = candidate
            .find(char::is_whitespace)
            .unwrap_or(candidate.len());
        let url = &candidate[..end];
        if url.contains('@') {
            Some(url.to_string())
        } else {
            None
        }
    }

    fn format_bootnodes(&self, bootnodes: &[String]) -> String {
        bootnodes.join(",")
    }

    fn default_entrypoint(&self) -> Vec<String> {
        vec!["baseledgerd".to_string(), "start".to_string()]
    }

    fn enrich_start_command(&self, network: &Network, _node: &Node) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if !network.config.bootnodes.is_empty() {
            env.push((
                "PERSISTENT_PEERS".to_string(),
                self.format_bootnodes(&network.config.bootnodes),
            ));
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tendermint_p2p_address() {
        let provider = BaseledgerProvider::new();
        let line = "I[2026-08-04] serving p2p address 9a1bcf@10.0.1.7:26656";
        assert_eq!(
            provider.parse_peer_url(line),
            Some("9a1bcf@10.0.1.7:26656".to_string())
        );
    }

    #[tokio::test]
    async fn test_runtime_peer_mutation_unsupported() {
        let provider = BaseledgerProvider::new();
        assert!(provider.add_peer("x@1.1.1.1:26656").await.unwrap_err().is_unsupported());
    }
}
