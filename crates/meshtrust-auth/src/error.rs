/// Authentication-layer errors.
///
/// These describe local faults and transport failures. A remote peer's bad
/// input is reported through [`crate::AuthOutcome`], not through this type.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection closed")]
    Closed,

    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] meshtrust_crypto::CryptoError),

    #[error("store error: {0}")]
    Store(#[from] meshtrust_store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
