//! Node Fleet Operator
//!
//! Operates fleets of blockchain network nodes on behalf of tenants:
//! provisions nodes and load balancers on cloud infrastructure, coordinates
//! genesis/bootstrap races across chain client implementations, ingests
//! real-time chain statistics, and drives it all through asynchronous,
//! retryable message handlers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Async Consumers (per subject)                   │
//! │   block-finalized · resolve-peer · add/remove-peer · balancer ops    │
//! ├──────────────────┬──────────────────────┬───────────────────────────┤
//! │  Node Deployer   │  Load Balancing      │  Stats Registry           │
//! │  (state machine) │  (provision/balance) │  (daemon per network)     │
//! │        │         │                      │                           │
//! │  ┌─────┴──────┐  │                      │                           │
//! │  │ Bootstrap  │  │                      │                           │
//! │  │ Coordinator│  │                      │                           │
//! │  └────────────┘  │                      │                           │
//! ├──────────────────┴──────────────────────┴───────────────────────────┤
//! │             P2P Providers (geth · parity · quorum · ...)             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   Ports: Store · CloudProvider · ContainerBackend · Bus · ChainRpc   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`orchestration`]: node lifecycle state machine and genesis election
//! - [`balancing`]: load balancer provisioning, balancing, URL resolution
//! - [`stats`]: per-network chain statistics daemons
//! - [`consumer`]: message-driven worker pools
//! - [`p2p`]: client-specific peer management adapters
//! - [`domain`]: entities and collaborator ports
//! - [`standalone`]: in-process adapters for dev mode and tests

pub mod balancing;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod error;
pub mod orchestration;
pub mod p2p;
pub mod standalone;
pub mod stats;

// Re-export commonly used types
pub use balancing::{BalancerAttachment, LoadBalancerProvisioner, UrlResolver};
pub use config::{RuntimeConfig, WorkerCounts};
pub use consumer::{ConsumerSet, Handlers};
pub use domain::{
    BalancerKind, BalancerStatus, Block, ChainFamily, LoadBalancer, Network, NetworkConfig, Node,
    NodeConfig, NodeRole, NodeStatus,
};
pub use error::{Error, ErrorAction, Result};
pub use orchestration::{BootstrapCoordinator, BootstrapOutcome, NodeDeployer};
pub use p2p::{ClientKind, P2pFactory, P2pProvider};
pub use stats::{NetworkStatus, StatsDaemon, StatsRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
