use crate::trust_state::{TrustEvent, TrustStatus};

/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid trust transition from {from} on {event:?}")]
    InvalidTransition { from: TrustStatus, event: TrustEvent },

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("invalid status value: {0}")]
    InvalidStatus(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u32),
}
