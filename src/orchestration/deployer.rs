//! Node Deployer - the lifecycle state machine
//!
//! Drives a node from pending through genesis/peering to running, or to a
//! terminal failed/terminated state:
//! - non-p2p nodes deploy immediately
//! - the first p2p node of a network is elected bootnode (status genesis)
//!   and deploys to originate the chain
//! - later p2p nodes wait for genesis (cached chain height > 0, bounded)
//!   before deploying
//!
//! Peer-URL resolution runs asynchronously off a consumed message once the
//! backend has log output to parse.

use crate::balancing::BalancerAttachment;
use crate::config::RuntimeConfig;
use crate::consumer::{
    PeerOpMessage, ResolvePeerMessage, SUBJECT_NODE_ADD_PEER, SUBJECT_NODE_REMOVE_PEER,
    SUBJECT_NODE_RESOLVE_PEER,
};
use crate::domain::ports::{
    ChainRpcRef, ContainerBackendRef, LaunchSpec, LogPage, MessageBusRef, StoreRef,
};
use crate::domain::{Network, Node, NodeStatus};
use crate::error::{Error, Result};
use crate::orchestration::{BootstrapCoordinator, BootstrapOutcome};
use crate::p2p::{rewrite_peer_url_host, P2pFactory, P2pProviderRef};
use crate::stats::StatsRegistry;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on log pages scanned per peer-URL resolution attempt
const MAX_LOG_PAGES: usize = 10;

/// Coordinates node deployment against the container backend
pub struct NodeDeployer {
    store: StoreRef,
    backend: ContainerBackendRef,
    bus: MessageBusRef,
    rpc: ChainRpcRef,
    bootstrap: Arc<BootstrapCoordinator>,
    stats: Arc<StatsRegistry>,
    attachment: Arc<BalancerAttachment>,
    config: RuntimeConfig,
}

impl NodeDeployer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StoreRef,
        backend: ContainerBackendRef,
        bus: MessageBusRef,
        rpc: ChainRpcRef,
        bootstrap: Arc<BootstrapCoordinator>,
        stats: Arc<StatsRegistry>,
        attachment: Arc<BalancerAttachment>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            bus,
            rpc,
            bootstrap,
            stats,
            attachment,
            config,
        })
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Validate, admit and deploy a node. The returned node reflects its
    /// persisted state; on failure the node record carries status failed
    /// plus a description.
    pub async fn create(&self, mut node: Node) -> Result<Node> {
        node.coerce_role();
        node.sanitize_config();

        // A node without a resolvable network cannot be repaired by retrying
        let network = self
            .store
            .network(&node.network_id)
            .await?
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "node {} references unknown network {}",
                    node.id, node.network_id
                ))
            })?;

        // Resolve the p2p provider up front so an unknown client kind fails
        // the deploy before any infrastructure is touched
        let provider = match P2pFactory::for_node(&node, &network, self.rpc.clone()) {
            Ok(provider) => provider,
            Err(err) => {
                node.mark_failed(err.to_string());
                self.store.upsert_node(&node).await?;
                return Err(err);
            }
        };

        self.store.upsert_node(&node).await?;

        if node.requires_p2p() {
            match self.bootstrap.coordinate(&network, &mut node).await? {
                BootstrapOutcome::Elected => {
                    // First node of the network: originate genesis
                }
                BootstrapOutcome::Existing(_) => {
                    node.status = NodeStatus::Peering;
                    self.store.upsert_node(&node).await?;

                    // The height stat comes from the network's stats daemon
                    self.stats.ensure(&network);
                    if let Err(err) = self.await_genesis(&network).await {
                        node.mark_failed(format!(
                            "network {} produced no genesis: {}",
                            network.id, err
                        ));
                        self.store.upsert_node(&node).await?;
                        return Err(err);
                    }
                }
            }
        }

        self.deploy(&network, &mut node, provider).await?;
        Ok(node)
    }

    /// Launch the node on the container backend and record its external ids
    async fn deploy(
        &self,
        network: &Network,
        node: &mut Node,
        provider: P2pProviderRef,
    ) -> Result<()> {
        let region = match node.region() {
            Some(region) => region.to_string(),
            None => {
                let err = Error::Configuration(format!("node {} has no region", node.id));
                node.mark_failed(err.to_string());
                self.store.upsert_node(node).await?;
                return Err(err);
            }
        };

        let entrypoint = if node.config.entrypoint.is_empty() {
            provider.default_entrypoint()
        } else {
            node.config.entrypoint.clone()
        };

        let mut env = node.config.env.clone();
        for (key, value) in provider.enrich_start_command(network, node) {
            env.entry(key).or_insert(value);
        }

        let spec = LaunchSpec {
            node_id: node.id.clone(),
            network_id: network.id.clone(),
            region,
            credentials: node.credentials(),
            image: node.config.image.clone(),
            entrypoint,
            env,
        };

        info!("Deploying node {} ({} {})", node.id, node.role, spec.region);

        match self.backend.create_node(&spec).await {
            Ok(launched) => {
                node.config.target_task_ids = launched.task_ids;
                node.host = launched.host;
                node.ipv4 = launched.ipv4;
                node.ipv6 = launched.ipv6;
                node.private_ipv4 = launched.private_ipv4;

                if node.requires_p2p() {
                    // Running is earned by peer-URL resolution
                    self.publish_resolve_peer(node).await;
                } else {
                    node.status = NodeStatus::Running;
                }
                self.store.upsert_node(node).await?;
                info!("Deployed node {} -> {:?}", node.id, node.config.target_task_ids);
                Ok(())
            }
            Err(err) => {
                node.mark_failed(format!("node deploy failed: {}", err));
                self.store.upsert_node(node).await?;
                Err(err)
            }
        }
    }

    async fn publish_resolve_peer(&self, node: &Node) {
        let msg = ResolvePeerMessage {
            node_id: node.id.clone(),
        };
        let payload = match serde_json::to_vec(&msg) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode resolve-peer message: {}", err);
                return;
            }
        };
        if let Err(err) = self
            .bus
            .publish(SUBJECT_NODE_RESOLVE_PEER, Bytes::from(payload))
            .await
        {
            warn!(
                "Failed to publish resolve-peer message for node {}: {}",
                node.id, err
            );
        }
    }

    /// Poll the network's cached chain-height stat until genesis lands
    async fn await_genesis(&self, network: &Network) -> Result<()> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(height) = self.stats.cached_height(&network.id) {
                if height > 0 {
                    return Ok(());
                }
            }
            if started.elapsed() >= self.config.genesis_deadline {
                return Err(Error::Timeout {
                    operation: format!("genesis of network {}", network.id),
                    elapsed: started.elapsed(),
                });
            }
            tokio::time::sleep(self.config.genesis_poll_interval).await;
        }
    }

    // =========================================================================
    // Peer URL Resolution
    // =========================================================================

    /// Parse the node's peer URL out of its backend log stream, rewrite any
    /// private address to the node's public one, cache it and mark the node
    /// running. Bootnodes additionally register the URL on the network.
    pub async fn resolve_peer_url(&self, node_id: &str) -> Result<()> {
        let mut node = self.require_node(node_id).await?;
        if node.status.is_terminal() {
            return Ok(());
        }
        if node.config.peer_url.is_some() {
            // Redelivered after a prior success
            return Ok(());
        }

        let mut network = self.require_network(&node.network_id).await?;
        let provider = P2pFactory::for_node(&node, &network, self.rpc.clone())?;

        let attempt = self.scan_logs_for_peer_url(&node, provider.as_ref());
        let result = tokio::time::timeout(self.config.peer_resolve_deadline, attempt).await;

        let peer_url = match result {
            Ok(Ok(url)) => url,
            Ok(Err(err)) => return self.peer_resolution_failed(&mut node, err).await,
            Err(_) => {
                let err = Error::Timeout {
                    operation: format!("peer url resolution for node {}", node.id),
                    elapsed: self.config.peer_resolve_deadline,
                };
                return self.peer_resolution_failed(&mut node, err).await;
            }
        };

        let peer_url = match node.reachable_host() {
            Some(host) => rewrite_peer_url_host(&peer_url, host),
            None => peer_url,
        };

        node.config.peer_url = Some(peer_url.clone());
        node.status = NodeStatus::Running;
        self.store.upsert_node(&node).await?;
        info!("Resolved peer url for node {}: {}", node.id, peer_url);

        if node.bootnode {
            network.register_bootnode(&peer_url);
            self.store.upsert_network(&network).await?;
        }

        Ok(())
    }

    async fn scan_logs_for_peer_url(
        &self,
        node: &Node,
        provider: &dyn crate::p2p::P2pProvider,
    ) -> Result<String> {
        let region = node
            .region()
            .ok_or_else(|| Error::Configuration(format!("node {} has no region", node.id)))?;
        let credentials = node.credentials();

        for task_id in &node.config.target_task_ids {
            let mut token: Option<String> = None;
            for _ in 0..MAX_LOG_PAGES {
                let page = self
                    .backend
                    .node_logs(region, &credentials, task_id, token.as_deref())
                    .await?;
                for line in &page.lines {
                    if let Some(url) = provider.parse_peer_url(line) {
                        return Ok(url);
                    }
                }
                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        }

        Err(Error::PeerUrlUnresolved {
            node_id: node.id.clone(),
        })
    }

    /// Transient until the node outlives its resolution window, then
    /// terminal
    async fn peer_resolution_failed(&self, node: &mut Node, err: Error) -> Result<()> {
        let age = Utc::now().signed_duration_since(node.created_at);
        let limit = chrono::Duration::from_std(self.config.peer_resolve_redelivery)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));

        if age > limit {
            node.mark_failed(format!("peer url never resolved: {}", err));
            self.store.upsert_node(node).await?;
            warn!("Node {} failed peer resolution permanently", node.id);
            return Ok(());
        }
        Err(err)
    }

    // =========================================================================
    // Peer Management
    // =========================================================================

    pub async fn add_peer(&self, node_id: &str, peer_url: &str) -> Result<()> {
        let node = self.require_node(node_id).await?;
        let network = self.require_network(&node.network_id).await?;
        let provider = P2pFactory::for_node(&node, &network, self.rpc.clone())?;
        self.peer_op_deadline("add_peer", provider.add_peer(peer_url))
            .await
    }

    pub async fn remove_peer(&self, node_id: &str, peer_url: &str) -> Result<()> {
        let node = self.require_node(node_id).await?;
        let network = self.require_network(&node.network_id).await?;
        let provider = P2pFactory::for_node(&node, &network, self.rpc.clone())?;
        self.peer_op_deadline("remove_peer", provider.remove_peer(peer_url))
            .await
    }

    /// A peer op that outlives its attempt deadline is left to redelivery
    async fn peer_op_deadline(
        &self,
        operation: &str,
        op: impl std::future::Future<Output = Result<()>>,
    ) -> Result<()> {
        match tokio::time::timeout(self.config.peer_op_deadline, op).await {
            Ok(result) => result,
            Err(_) => Err(Error::transient(
                "p2p",
                operation,
                format!("no response within {:?}", self.config.peer_op_deadline),
            )),
        }
    }

    /// Fire one peer-op message per node of the network; a single node's
    /// publish failure does not abort the broadcast
    pub async fn broadcast_peer_op(
        &self,
        network_id: &str,
        peer_url: &str,
        add: bool,
    ) -> Result<()> {
        let subject = if add {
            SUBJECT_NODE_ADD_PEER
        } else {
            SUBJECT_NODE_REMOVE_PEER
        };

        let nodes = self.store.network_nodes(network_id).await?;
        for node in nodes {
            let msg = PeerOpMessage {
                node_id: node.id.clone(),
                peer_url: peer_url.to_string(),
            };
            let payload = match serde_json::to_vec(&msg) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("Failed to encode peer-op message: {}", err);
                    continue;
                }
            };
            if let Err(err) = self.bus.publish(subject, Bytes::from(payload)).await {
                warn!(
                    "Failed to publish {} for node {}: {}",
                    subject, node.id, err
                );
            }
        }
        Ok(())
    }

    // =========================================================================
    // Logs
    // =========================================================================

    /// One page of the node's backend log stream, merged across its tasks
    /// when no page token narrows the fetch to a single task
    pub async fn logs(&self, node_id: &str, page_token: Option<&str>) -> Result<LogPage> {
        let node = self.require_node(node_id).await?;
        let region = node
            .region()
            .ok_or_else(|| Error::Configuration(format!("node {} has no region", node.id)))?;
        let credentials = node.credentials();

        let mut merged = LogPage::default();
        for task_id in &node.config.target_task_ids {
            let page = self
                .backend
                .node_logs(region, &credentials, task_id, page_token)
                .await?;
            merged.lines.extend(page.lines);
            if page.next_token.is_some() {
                merged.next_token = page.next_token;
            }
        }
        Ok(merged)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Tear the node down: release backend tasks, unbalance it everywhere,
    /// and mark it terminated
    pub async fn delete(&self, node_id: &str) -> Result<()> {
        let mut node = self.require_node(node_id).await?;
        let credentials = node.credentials();

        if let Some(region) = node.region() {
            for task_id in &node.config.target_task_ids {
                if let Err(err) = self.backend.delete_node(region, &credentials, task_id).await {
                    warn!("Failed to release task {} of node {}: {}", task_id, node.id, err);
                }
            }
        }

        if let Err(err) = self.attachment.unbalance_all(&node).await {
            warn!("Failed to unbalance node {}: {}", node.id, err);
        }

        node.status = NodeStatus::Terminated;
        self.store.upsert_node(&node).await?;
        info!("Terminated node {}", node.id);
        Ok(())
    }

    // =========================================================================
    // Lookup Helpers
    // =========================================================================

    async fn require_node(&self, node_id: &str) -> Result<Node> {
        self.store.node(node_id).await?.ok_or_else(|| Error::ResourceNotFound {
            kind: "Node".into(),
            name: node_id.into(),
        })
    }

    async fn require_network(&self, network_id: &str) -> Result<Network> {
        self.store
            .network(network_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Network".into(),
                name: network_id.into(),
            })
    }
}
