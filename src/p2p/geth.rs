//! Geth P2P adapter
//!
//! Drives the admin namespace over JSON-RPC. Geth has no reserved-peer
//! concept, so the non-reserved-peer operations report unsupported.

use crate::domain::ports::ChainRpcRef;
use crate::domain::{Network, Node};
use crate::error::{Error, Result};
use crate::p2p::{ClientKind, P2pProvider};
use async_trait::async_trait;
use serde_json::json;

pub struct GethProvider {
    rpc: ChainRpcRef,
    rpc_url: String,
}

impl GethProvider {
    pub fn new(rpc: ChainRpcRef, rpc_url: String) -> Self {
        Self { rpc, rpc_url }
    }
}

#[async_trait]
impl P2pProvider for GethProvider {
    fn client(&self) -> ClientKind {
        ClientKind::Geth
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
        Err(Error::unsupported("geth", "accept_non_reserved_peers"))
    }

    async fn drop_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("geth", "drop_non_reserved_peers"))
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
        // Geth announces itself as: ... self=enode://<pubkey>@<ip>:<port>
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
        let mut env = Vec::new();
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

    fn provider() -> GethProvider {
        GethProvider::new(Arc::new(HttpChainRpc::new()), "http://127.0.0.1:8050".into())
    }

    #[test]
    fn test_parse_peer_url_from_log() {
        let line = "INFO [08-04|12:00:00.000] Started P2P networking self=enode://8f4b1a@10.0.0.4:30303";
        assert_eq!(
            provider().parse_peer_url(line),
            Some("enode://8f4b1a@10.0.0.4:30303".to_string())
        );
    }

    #[test]
    fn test_parse_skips_lines_without_enode() {
        assert_eq!(provider().parse_peer_url("INFO Imported new chain segment"), None);
    }

    #[test]
    fn test_format_bootnodes_joins_with_comma() {
        let urls = vec!["enode://a@1.2.3.4:30303".to_string(), "enode://b@5.6.7.8:30303".to_string()];
        assert_eq!(
            provider().format_bootnodes(&urls),
            "enode://a@1.2.3.4:30303,enode://b@5.6.7.8:30303"
        );
    }

    #[tokio::test]
    async fn test_non_reserved_peers_unsupported() {
        let err = provider().accept_non_reserved_peers().await.unwrap_err();
        assert!(err.is_unsupported());
    }
}
