//! Quorum P2P adapter
//!
//! Quorum is a geth derivative; peer management rides the same admin
//! namespace, with raft membership handled by the start command.

use crate::domain::ports::ChainRpcRef;
use crate::domain::{Network, Node};
use crate::error::{Error, Result};
use crate::p2p::{ClientKind, P2pProvider};
use async_trait::async_trait;
use serde_json::json;

pub struct QuorumProvider {
    rpc: ChainRpcRef,
    rpc_url: String,
}

impl QuorumProvider {
    pub fn new(rpc: ChainRpcRef, rpc_url: String) -> Self {
        Self { rpc, rpc_url }
    }
}

#[async_trait]
impl P2pProvider for QuorumProvider {
    fn client(&self) -> ClientKind {
        ClientKind::Quorum
    }

    async fn add_peer(&self, peer_url: &str) -> Result<()> {
        self.rpc
            .invoke(&self.rpc_url, "admin_addPeer", json!([peer_url]))
            .await?;
        Ok(())
    }

    async fn remove_peer(&self, peer_url: &str) -> Result<()> {
        self.rpc
            .invoke(&self.rpc_url, "admin_removePeer", json!([peer_url]))
            .await?;
        Ok(())
    }

    async fn accept_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("quorum", "accept_non_reserved_peers"))
    }

    async fn drop_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("quorum", "drop_non_reserved_peers"))
    }

    async fn resolve_peer_url(&self) -> Result<String> {
        let info = self
            .rpc
            .invoke(&self.rpc_url, "admin_nodeInfo", json!([]))
            .await?;
        info.get("enode")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Internal("admin_nodeInfo returned no enode".into()))
    }

    fn parse_peer_url(&self, log_line: &str) -> Option<String> {
        let start = log_line.find("enode://")?;
        let candidate = &log_line[start..];
        let end = candidate
            .find(|c: char| c.is_whitespace() || c == '"' || c == ',')
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
        vec!["geth".to_string()]
    }

    fn enrich_start_command(&self, network: &Network, node: &Node) -> Vec<(String, String)> {
        let mut env = vec![("PRIVATE_CONFIG".to_string(), "ignore".to_string())];
        if let Some(chain_id) = network.chain_id {
            env.push(("NETWORK_ID".to_string(), chain_id.to_string()));
        }
        if !node.bootnode && !network.config.bootnodes.is_empty() {
            env.push((
                "BOOTNODES".to_string(),
                self.format_bootnodes(&network.config.bootnodes),
            ));
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::rpc::HttpChainRpc;
    use std::sync::Arc;

    #[test]
    fn test_parse_peer_url() {
        let provider =
            QuorumProvider::new(Arc::new(HttpChainRpc::new()), "http://127.0.0.1:8050".into());
        let line = r#"INFO started p2p server enode://beef@172.18.0.3:21000?discport=0"#;
        assert_eq!(
            provider.parse_peer_url(line),
            Some("enode://beef@172.18.0.3:21000?discport=0".to_string())
        );
    }
}
