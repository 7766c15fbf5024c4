use std::net::IpAddr;

use meshtrust_core::PeerId;

/// Trust store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("public key does not match peer id {0}")]
    KeyMismatch(PeerId),

    #[error("address {address} already assigned to {owner}")]
    AddressInUse { address: IpAddr, owner: PeerId },

    #[error("core error: {0}")]
    Core(#[from] meshtrust_core::CoreError),

    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
