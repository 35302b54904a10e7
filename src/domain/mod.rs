//! Core domain types and collaborator ports

pub mod balancer;
pub mod block;
pub mod network;
pub mod node;
pub mod ports;

pub use balancer::{BalancerConfig, BalancerKind, BalancerStatus, LoadBalancer};
pub use block::Block;
pub use network::{ChainFamily, Network, NetworkConfig, PortSet, SecurityConfig};
pub use node::{Node, NodeConfig, NodeRole, NodeSecrets, NodeStatus};
