//! Parity / OpenEthereum P2P adapter
//!
//! The only client kind with reserved-peer support, so all four peer
//! operations map onto native RPC methods.

use crate::domain::ports::ChainRpcRef;
use crate::domain::{Network, Node};
use crate::error::{Error, Result};
use crate::p2p::{ClientKind, P2pProvider};
use async_trait::async_trait;
use serde_json::json;

pub struct ParityProvider {
    rpc: ChainRpcRef,
    rpc_url: String,
}

impl ParityProvider {
    pub fn new(rpc: ChainRpcRef, rpc_url: String) -> Self {
        Self { rpc, rpc_url }
    }
}

#[async_trait]
impl P2pProvider for ParityProvider {
    fn client(&self) -> ClientKind {
        ClientKind::Parity
    }

    async fn add_peer(&self, peer_url: &str) -> Result<()> {
        self.rpc
            .invoke(&self.rpc_url, "parity_addReservedPeer", json!([peer_url]))
            .await?;
        Ok(())
    }

    async fn remove_peer(&self, peer_url: &str) -> Result<()> {
        self.rpc
            .invoke(&self.rpc_url, "parity_removeReservedPeer", json!([peer_url]))
            .await?;
        Ok(())
    }

    async fn accept_non_reserved_peers(&self) -> Result<()> {
        self.rpc
            .invoke(&self.rpc_url, "parity_acceptNonReservedPeers", json!([]))
            .await?;
        Ok(())
    }

    async fn drop_non_reserved_peers(&self) -> Result<()> {
        self.rpc
            .invoke(&self.rpc_url, "parity_dropNonReservedPeers", json!([]))
            .await?;
        Ok(())
    }

    async fn resolve_peer_url(&self) -> Result<String> {
        let url = self
            .rpc
            .invoke(&self.rpc_url, "parity_enode", json!([]))
            .await?;
        url.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Internal("parity_enode returned no enode".into()))
    }

    fn parse_peer_url(&self, log_line: &str) -> Option<String> {
        // Parity logs: Public node URL: enode://<pubkey>@<ip>:<port>
        let marker = "Public node URL: ";
        let start = log_line.find(marker)? + marker.len();
        let candidate = log_line[start..].trim();
        let end = candidate
            .find(char::is_whitespace)
            .unwrap_or(candidate.len());
        let url = &candidate[..end];
        if url.starts_with("enode://") && url.contains('@') {
            Some(url.to_string())
        } else {
            None
        }
    }

    fn format_bootnodes(&self, bootnodes: &[String]) -> String {
        bootnodes.join(",")
    }

    fn default_entrypoint(&self) -> Vec<String> {
        vec!["parity".to_string()]
    }

    fn enrich_start_command(&self, network: &Network, node: &Node) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(engine) = &network.config.engine_id {
            env.push(("ENGINE".to_string(), engine.clone()));
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
