//! Standalone adapters
//!
//! In-process implementations of the collaborator ports, used by the
//! binary's standalone mode and the test suite. State lives in guarded maps;
//! nothing leaves the process.

pub mod backend;
pub mod bus;
pub mod cloud;
pub mod store;

pub use backend::StandaloneBackend;
pub use bus::MemoryBus;
pub use cloud::StandaloneCloud;
pub use store::MemoryStore;
