//! Meshtrust Trust Store
//!
//! The single owner of all peer trust records:
//! - status transitions through the trust state machine
//! - persistence via a pluggable backend (RocksDB or in-memory)
//! - change notifications for routing and operator tooling

pub mod error;
pub mod events;
pub mod backend;
pub mod rocks;
pub mod store;

pub use backend::{MemoryBackend, TrustBackend};
pub use error::StoreError;
pub use events::TrustChange;
pub use rocks::RocksBackend;
pub use store::TrustStore;
