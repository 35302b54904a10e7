//! Chain statistics ingestion
//!
//! One daemon per network, created lazily and evicted explicitly. The
//! registry replaces what would otherwise be a process-global map: it is
//! constructed once at service start and torn down on shutdown.

pub mod daemon;
pub mod rpc;
pub mod source;

pub use daemon::{NetworkStatus, StatsDaemon, WINDOW_MAX, WINDOW_MIN};
pub use rpc::HttpChainRpc;
pub use source::{source_for, BlockHead, EthereumSource, StatsSource};

use crate::config::RuntimeConfig;
use crate::domain::ports::{ChainRpcRef, MessageBusRef, StoreRef};
use crate::domain::Network;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of per-network stats daemons
pub struct StatsRegistry {
    store: StoreRef,
    bus: MessageBusRef,
    rpc: ChainRpcRef,
    config: RuntimeConfig,
    daemons: Mutex<HashMap<String, Arc<StatsDaemon>>>,
}

impl StatsRegistry {
    pub fn new(
        store: StoreRef,
        bus: MessageBusRef,
        rpc: ChainRpcRef,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            rpc,
            config,
            daemons: Mutex::new(HashMap::new()),
        })
    }

    /// The network's daemon, started on first access
    pub fn ensure(&self, network: &Network) -> Arc<StatsDaemon> {
        let mut daemons = self.daemons.lock();
        if let Some(daemon) = daemons.get(&network.id) {
            return daemon.clone();
        }

        let daemon = StatsDaemon::new(
            network.id.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.rpc.clone(),
            self.config.clone(),
        );
        daemon.clone().start();
        daemons.insert(network.id.clone(), daemon.clone());
        info!("Started stats daemon for network {}", network.id);
        daemon
    }

    pub fn get(&self, network_id: &str) -> Option<Arc<StatsDaemon>> {
        self.daemons.lock().get(network_id).cloned()
    }

    /// Cached chain height, when a daemon exists for the network
    pub fn cached_height(&self, network_id: &str) -> Option<u64> {
        self.get(network_id).map(|daemon| daemon.snapshot().block)
    }

    pub fn snapshot(&self, network_id: &str) -> Option<NetworkStatus> {
        self.get(network_id).map(|daemon| daemon.snapshot())
    }

    /// Shut down and remove a network's daemon
    pub fn evict(&self, network_id: &str) {
        if let Some(daemon) = self.daemons.lock().remove(network_id) {
            let _ = daemon.shutdown();
            info!("Evicted stats daemon for network {}", network_id);
        }
    }

    /// Shut down every daemon; called at service teardown
    pub fn shutdown_all(&self) {
        let mut daemons = self.daemons.lock();
        for (network_id, daemon) in daemons.drain() {
            let _ = daemon.shutdown();
            info!("Stopped stats daemon for network {}", network_id);
        }
    }

    pub fn len(&self) -> usize {
        self.daemons.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.daemons.lock().is_empty()
    }
}
