//! Nethermind P2P adapter

use crate::domain::ports::ChainRpcRef;
use crate::domain::{Network, Node};
use crate::error::{Error, Result};
use crate::p2p::{ClientKind, P2pProvider};
use async_trait::async_trait;
use serde_json::json;

pub struct NethermindProvider {
    rpc: ChainRpcRef,
    rpc_url: String,
}

impl NethermindProvider {
    pub fn new(rpc: ChainRpcRef, rpc_url: String) -> Self {
        Self { rpc, rpc_url }
    }
}

#[async_trait]
impl P2pProvider for NethermindProvider {
    fn client(&self) -> ClientKind {
        ClientKind::Nethermind
    }

    async fn add_peer(&self, peer_url: &str) -> Result<()> {
        self.rpc
            .invoke(&self.rpc_url, "admin_addPeer", json!([peer_url, true]))
            .await?;
        Ok(())
    }

    async fn remove_peer(&self, peer_url: &str) -> Result<()> {
        self.rpc
            .invoke(&self.rpc_url, "admin_removePeer", json!([peer_url, true]))
            .await?;
        Ok(())
    }

    async fn accept_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("nethermind", "accept_non_reserved_peers"))
    }

    async fn drop_non_reserved_peers(&self) -> Result<()> {
        Err(Error::unsupported("nethermind", "drop_non_reserved_peers"))
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
        // Nethermind logs: This node : enode://<pubkey>@<ip>:<port>
        let start = log_line.find("enode://")?;
        if !log_line.contains("This node") {
            return None;
        }
        let candidate = &log_line[start..];
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
        vec!["./Nethermind.Runner".to_string()]
    }

    fn enrich_start_command(&self, network: &Network, node: &Node) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if !node.bootnode && !network.config.bootnodes.is_empty() {
            env.push((
                "NETHERMIND_DISCOVERYCONFIG_BOOTNODES".to_string(),
                self.format_bootnodes(&network.config.bootnodes),
            ));
        }
        env
    }
}
