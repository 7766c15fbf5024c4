use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Length of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an encoded peer identifier (URL-safe base64, no padding, of 32 bytes).
pub const PEER_ID_LENGTH: usize = 43;

/// Stable peer identifier derived from a node's public key.
///
/// Encoding is URL-safe base64 without padding, so every identifier is exactly
/// [`PEER_ID_LENGTH`] characters and decodes back to the public key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Derive the identifier for a raw public key.
    pub fn from_public_key(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(public_key))
    }

    /// Parse an identifier string, checking that it decodes to a 32-byte key.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.len() != PEER_ID_LENGTH {
            return Err(CoreError::InvalidPeerId(format!(
                "expected {} characters, got {}",
                PEER_ID_LENGTH,
                s.len()
            )));
        }
        let id = Self(s.to_string());
        id.public_key_bytes()?;
        Ok(id)
    }

    /// Recover the public key bytes this identifier was derived from.
    pub fn public_key_bytes(&self) -> Result<[u8; PUBLIC_KEY_LENGTH], CoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.0)
            .map_err(|e| CoreError::InvalidPeerId(format!("invalid base64: {}", e)))?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            CoreError::InvalidPeerId(format!("expected 32 key bytes, got {}", b.len()))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl TryFrom<String> for PeerId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl std::str::FromStr for PeerId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_fixed_length() {
        for byte in [0u8, 7, 255] {
            let id = PeerId::from_public_key(&[byte; 32]);
            assert_eq!(id.as_str().len(), PEER_ID_LENGTH);
        }
    }

    #[test]
    fn test_peer_id_recovers_key() {
        let key = [42u8; 32];
        let id = PeerId::from_public_key(&key);
        assert_eq!(id.public_key_bytes().unwrap(), key);
    }

    #[test]
    fn test_peer_id_deterministic() {
        let a = PeerId::from_public_key(&[1u8; 32]);
        let b = PeerId::from_public_key(&[1u8; 32]);
        let c = PeerId::from_public_key(&[2u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(PeerId::parse("short").is_err());
        assert!(PeerId::parse(&"A".repeat(44)).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_alphabet() {
        assert!(PeerId::parse(&"+".repeat(PEER_ID_LENGTH)).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let id = PeerId::from_public_key(&[9u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);

        let bad: Result<PeerId, _> = serde_json::from_str("\"not-a-peer\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_short() {
        let id = PeerId::from_public_key(&[3u8; 32]);
        assert_eq!(id.short().len(), 8);
        assert!(id.as_str().starts_with(id.short()));
    }
}
