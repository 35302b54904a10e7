//! Stats data sources
//!
//! A source feeds normalized block heads into a daemon's ingest channel via
//! one of two modes: a blocking JSON-RPC long-poll or a blocking websocket
//! subscription. A mode a source does not implement returns the explicit
//! [`Error::SourceModeUnsupported`] signal so the daemon can fall back to
//! the other mode instead of backing off.

use crate::domain::ports::ChainRpcRef;
use crate::domain::{ChainFamily, Network};
use crate::error::{Error, Result};
use crate::stats::rpc::parse_hex_quantity;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Interval between long-poll head fetches
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A chain-family-specific block header normalized for ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHead {
    pub network_id: String,
    pub number: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

/// One network's feed of chain heads
#[async_trait]
pub trait StatsSource: Send + Sync {
    fn chain(&self) -> &'static str;

    /// Blocking JSON-RPC long-poll; runs until cancelled or an error
    async fn poll(
        &self,
        network: &Network,
        tx: &mpsc::Sender<BlockHead>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Blocking websocket subscription; runs until cancelled or an error
    async fn stream(
        &self,
        network: &Network,
        tx: &mpsc::Sender<BlockHead>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Select the source for a network's chain family
pub fn source_for(network: &Network, rpc: ChainRpcRef) -> Result<Arc<dyn StatsSource>> {
    match network.chain_family() {
        ChainFamily::Evm => Ok(Arc::new(EthereumSource::new(rpc))),
        family => Err(Error::Configuration(format!(
            "no stats source for chain family {}",
            family
        ))),
    }
}

// =============================================================================
// Ethereum Source
// =============================================================================

/// Head source for Ethereum-family chains
pub struct EthereumSource {
    rpc: ChainRpcRef,
}

impl EthereumSource {
    pub fn new(rpc: ChainRpcRef) -> Self {
        Self { rpc }
    }

    async fn fetch_head(&self, network: &Network, url: &str) -> Result<BlockHead> {
        let block = self
            .rpc
            .invoke(url, "eth_getBlockByNumber", json!(["latest", false]))
            .await?;

        let number = block
            .get("number")
            .and_then(|v| parse_hex_quantity(v))
            .ok_or_else(|| Error::transient("chain-rpc", "eth_getBlockByNumber", "no number"))?;
        let hash = block
            .get("hash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::transient("chain-rpc", "eth_getBlockByNumber", "no hash"))?
            .to_string();
        let timestamp = block
            .get("timestamp")
            .and_then(|v| parse_hex_quantity(v))
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
            .unwrap_or_else(Utc::now);

        Ok(BlockHead {
            network_id: network.id.clone(),
            number,
            hash,
            timestamp,
        })
    }
}

#[async_trait]
impl StatsSource for EthereumSource {
    fn chain(&self) -> &'static str {
        "ethereum"
    }

    async fn poll(
        &self,
        network: &Network,
        tx: &mpsc::Sender<BlockHead>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = network.json_rpc_url().ok_or_else(|| {
            Error::transient("chain-rpc", "poll", "network has no json_rpc_url")
        })?;

        let mut last_hash: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let head = self.fetch_head(network, &url).await?;
            if last_hash.as_deref() != Some(head.hash.as_str()) {
                last_hash = Some(head.hash.clone());
                // Bounded channel: blocks here when the consumer lags
                if tx.send(head).await.is_err() {
                    return Ok(());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn stream(
        &self,
        _network: &Network,
        _tx: &mpsc::Sender<BlockHead>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Err(Error::SourceModeUnsupported {
            chain: self.chain().into(),
            mode: "stream".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NetworkConfig;
    use serde_json::json;

    fn test_network() -> Network {
        Network::create(
            "net-1",
            "test",
            NetworkConfig {
                chain: Some("test".into()),
                engine_id: Some("aura".into()),
                native_currency: Some("TEST".into()),
                protocol_id: Some("poa".into()),
                chainspec: Some(json!({})),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_source_selection() {
        let rpc: ChainRpcRef = Arc::new(crate::stats::rpc::HttpChainRpc::new());
        let network = test_network();
        let source = source_for(&network, rpc.clone()).unwrap();
        assert_eq!(source.chain(), "ethereum");

        let mut fabric = test_network();
        fabric.config.platform = Some(ChainFamily::Fabric);
        assert!(source_for(&fabric, rpc).is_err());
    }

    #[tokio::test]
    async fn test_stream_mode_unsupported() {
        let rpc: ChainRpcRef = Arc::new(crate::stats::rpc::HttpChainRpc::new());
        let source = EthereumSource::new(rpc);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let err = source
            .stream(&test_network(), &tx, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }
}
