//! Per-network stats daemon
//!
//! Ingests chain head updates for one network and maintains a rolling window
//! of recent headers. The producer (poll or stream source) and the single
//! consumer communicate over a bounded channel; the producer blocks when the
//! consumer lags. Reconnects apply exponential backoff, reloading the
//! network's configuration first since its host/port may have changed.

use crate::config::RuntimeConfig;
use crate::consumer::{BlockFinalizedMessage, SUBJECT_BLOCK_FINALIZED};
use crate::domain::ports::{ChainRpcRef, MessageBusRef, StoreRef};
use crate::domain::Network;
use crate::error::Result;
use crate::stats::source::{source_for, BlockHead};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum window length before an average block time is computed
pub const WINDOW_MIN: usize = 3;

/// Maximum rolling window length; the oldest entry is dropped past this
pub const WINDOW_MAX: usize = 32;

// =============================================================================
// Status Snapshot
// =============================================================================

/// Current chain status for one network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub block: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_block_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_block_time_ms: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl NetworkStatus {
    fn empty(network_id: &str) -> Self {
        Self {
            network_id: network_id.to_string(),
            chain_id: None,
            block: 0,
            last_block_at: None,
            average_block_time_ms: None,
            updated_at: Utc::now(),
        }
    }
}

// =============================================================================
// Daemon
// =============================================================================

/// Singleton stats consumer for one network
pub struct StatsDaemon {
    network_id: String,
    store: StoreRef,
    bus: MessageBusRef,
    rpc: ChainRpcRef,
    config: RuntimeConfig,
    status: RwLock<NetworkStatus>,
    window: Mutex<VecDeque<BlockHead>>,
    network: RwLock<Option<Network>>,
    cancel: CancellationToken,
    shutdown_started: AtomicBool,
}

impl StatsDaemon {
    pub fn new(
        network_id: impl Into<String>,
        store: StoreRef,
        bus: MessageBusRef,
        rpc: ChainRpcRef,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        let network_id = network_id.into();
        Arc::new(Self {
            status: RwLock::new(NetworkStatus::empty(&network_id)),
            network_id,
            store,
            bus,
            rpc,
            config,
            window: Mutex::new(VecDeque::with_capacity(WINDOW_MAX)),
            network: RwLock::new(None),
            cancel: CancellationToken::new(),
            shutdown_started: AtomicBool::new(false),
        })
    }

    /// Spawn the producer loop and the single ingest consumer
    pub fn start(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::channel::<BlockHead>(self.config.stats_ingest_depth);

        let consumer = self.clone();
        tokio::spawn(async move {
            // Exactly one consumer drains the queue, keeping window updates
            // race-free
            while let Some(head) = rx.recv().await {
                consumer.ingest(head).await;
            }
            debug!("Stats consumer for {} drained", consumer.network_id);
        });

        tokio::spawn(async move {
            self.run(tx).await;
        });
    }

    /// Producer loop: reload config, connect a source, back off on failure
    async fn run(self: Arc<Self>, tx: mpsc::Sender<BlockHead>) {
        let mut backoff = Duration::ZERO;
        info!("Stats daemon started for network {}", self.network_id);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if !backoff.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            // Host/port may have moved since the last attempt
            let network = match self.store.network(&self.network_id).await {
                Ok(Some(network)) => network,
                Ok(None) => {
                    warn!("Stats daemon: network {} not found", self.network_id);
                    backoff = Self::next_backoff(backoff, &self.config);
                    continue;
                }
                Err(err) => {
                    warn!("Stats daemon: reload of {} failed: {}", self.network_id, err);
                    backoff = Self::next_backoff(backoff, &self.config);
                    continue;
                }
            };
            self.set_network(network.clone());

            let source = match source_for(&network, self.rpc.clone()) {
                Ok(source) => source,
                Err(err) => {
                    warn!(
                        "Stats daemon for {} has no usable source: {}",
                        self.network_id, err
                    );
                    break;
                }
            };

            // Prefer streaming; an unsupported-mode signal falls back to
            // polling, any other error backs off
            let result = match source.stream(&network, &tx, &self.cancel).await {
                Err(ref err) if err.is_unsupported() => {
                    source.poll(&network, &tx, &self.cancel).await
                }
                other => other,
            };

            match result {
                Ok(()) => break,
                Err(err) if err.is_unsupported() => {
                    warn!(
                        "Stats daemon for {}: no supported consumption mode",
                        self.network_id
                    );
                    break;
                }
                Err(err) => {
                    backoff = Self::next_backoff(backoff, &self.config);
                    warn!(
                        "Stats source for {} failed ({}); reconnecting in {:?}",
                        self.network_id, err, backoff
                    );
                }
            }
        }

        info!("Stats daemon stopped for network {}", self.network_id);
    }

    /// 0 -> 100ms, doubling to the cap; the doubling that would exceed the
    /// cap resets to 0
    fn next_backoff(current: Duration, config: &RuntimeConfig) -> Duration {
        if current.is_zero() {
            return config.stats_backoff_initial;
        }
        let next = current.saturating_mul(2);
        if next > config.stats_backoff_cap {
            Duration::ZERO
        } else {
            next
        }
    }

    fn set_network(&self, network: Network) {
        self.status.write().chain_id = network.chain_id;
        *self.network.write() = Some(network);
    }

    /// Fold one head into the window and status; republish finalized blocks
    /// for Ethereum-family networks
    async fn ingest(&self, head: BlockHead) {
        let republish = {
            let mut window = self.window.lock();
            window.push_back(head.clone());
            while window.len() > WINDOW_MAX {
                window.pop_front();
            }

            let average_block_time_ms = if window.len() >= WINDOW_MIN {
                let first = window.front().expect("window is non-empty");
                let last = window.back().expect("window is non-empty");
                let span = last
                    .timestamp
                    .signed_duration_since(first.timestamp)
                    .num_milliseconds();
                Some(span as f64 / (window.len() - 1) as f64)
            } else {
                None
            };

            let mut status = self.status.write();
            status.block = head.number;
            status.last_block_at = Some(head.timestamp);
            status.average_block_time_ms = average_block_time_ms;
            status.updated_at = Utc::now();

            self.network
                .read()
                .as_ref()
                .map(|n| n.is_ethereum_network())
                .unwrap_or(false)
        };

        if republish {
            self.publish_finalized(&head).await;
        }
    }

    async fn publish_finalized(&self, head: &BlockHead) {
        let msg = BlockFinalizedMessage {
            network_id: head.network_id.clone(),
            block: head.number,
            block_hash: head.hash.clone(),
            timestamp: head.timestamp,
        };
        let payload = match serde_json::to_vec(&msg) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode block-finalized message: {}", err);
                return;
            }
        };
        if let Err(err) = self
            .bus
            .publish(SUBJECT_BLOCK_FINALIZED, Bytes::from(payload))
            .await
        {
            warn!(
                "Failed to publish finalized block {} of {}: {}",
                head.number, head.network_id, err
            );
        }
    }

    /// Current status snapshot
    pub fn snapshot(&self) -> NetworkStatus {
        self.status.read().clone()
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    /// Cooperative shutdown; repeated calls are no-ops. In-flight source
    /// I/O is not force-cancelled, only awaited to return.
    pub fn shutdown(&self) -> Result<()> {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        Ok(())
    }
}
