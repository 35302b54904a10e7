//! Node orchestration
//!
//! The bootstrap coordinator elects genesis nodes; the deployer drives the
//! node lifecycle state machine on top of it.

pub mod bootstrap;
pub mod deployer;

pub use bootstrap::{BootstrapCoordinator, BootstrapOutcome};
pub use deployer::NodeDeployer;
