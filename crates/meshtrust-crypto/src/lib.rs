pub mod error;
pub mod keys;
pub mod signing;
pub mod identity;

pub use error::CryptoError;
pub use identity::Identity;
pub use keys::{KeyPair, PublicKey};
pub use signing::{sign, verify, Signature, SIGNATURE_LENGTH};
