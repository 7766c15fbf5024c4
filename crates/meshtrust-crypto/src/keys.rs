use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey, KEYPAIR_LENGTH, SECRET_KEY_LENGTH};
use meshtrust_core::PeerId;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

/// Ed25519 key pair for signing operations.
/// Private key material is zeroized on drop by ed25519-dalek.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair using OS-provided entropy.
    ///
    /// Fails only when the entropy source does.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| CryptoError::KeyGenerationError(e.to_string()))?;
        let kp = Self::from_seed(&seed);
        seed.zeroize();
        Ok(kp)
    }

    /// Create a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Restore a key pair from its 64-byte encoding (secret || public).
    ///
    /// Rejects encodings whose public half does not match the secret half.
    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: &[u8; KEYPAIR_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEYPAIR_LENGTH,
                actual: bytes.len(),
            })?;
        let signing_key = SigningKey::from_keypair_bytes(arr)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid keypair: {}", e)))?;
        Ok(Self { signing_key })
    }

    /// The 64-byte private key encoding. Only for writing the identity file.
    pub fn to_keypair_bytes(&self) -> Zeroizing<[u8; KEYPAIR_LENGTH]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for verification operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Create from raw bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let verifying_key = VerifyingKey::from_bytes(&bytes_arr)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    /// Recover the key a peer identifier was derived from.
    pub fn from_peer_id(peer_id: &PeerId) -> Result<Self, CryptoError> {
        let bytes = peer_id.public_key_bytes()?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw bytes (32 bytes).
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }

    /// The stable identifier for this key.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(self.as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_keypair() {
        let kp = KeyPair::generate().unwrap();
        assert_eq!(kp.public_key().as_bytes().len(), 32);
    }

    #[test]
    fn test_generate_distinct() {
        let kp1 = KeyPair::generate().unwrap();
        let kp2 = KeyPair::generate().unwrap();
        assert_ne!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn test_from_seed_deterministic() {
        let seed = [42u8; 32];
        assert_eq!(KeyPair::from_seed(&seed).public_key(), KeyPair::from_seed(&seed).public_key());
    }

    #[test]
    fn test_keypair_bytes_roundtrip() {
        let kp = KeyPair::generate().unwrap();
        let bytes = kp.to_keypair_bytes();
        assert_eq!(bytes.len(), 64);
        let kp2 = KeyPair::from_keypair_bytes(bytes.as_slice()).unwrap();
        assert_eq!(kp.public_key(), kp2.public_key());
    }

    #[test]
    fn test_keypair_bytes_invalid_length() {
        assert!(matches!(
            KeyPair::from_keypair_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidKeyLength { expected: 64, actual: 32 })
        ));
    }

    #[test]
    fn test_keypair_bytes_mismatched_halves() {
        let kp1 = KeyPair::from_seed(&[1u8; 32]);
        let kp2 = KeyPair::from_seed(&[2u8; 32]);
        let mut bytes = kp1.to_keypair_bytes().to_vec();
        bytes[32..].copy_from_slice(kp2.public_key().as_bytes());
        assert!(KeyPair::from_keypair_bytes(&bytes).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = KeyPair::from_seed(&[7u8; 32]);
        let secret_hex = hex::encode([7u8; 32]);
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(&secret_hex));
        assert!(debug.contains(&kp.public_key().to_hex()));
    }

    #[test]
    fn test_peer_id_roundtrip() {
        let pk = KeyPair::generate().unwrap().public_key();
        let id = pk.peer_id();
        assert_eq!(PublicKey::from_peer_id(&id).unwrap(), pk);
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let pk = KeyPair::generate().unwrap().public_key();
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
    }

    #[test]
    fn test_public_key_from_bytes_invalid() {
        assert!(PublicKey::from_bytes(&[0u8; 31]).is_err());
    }
}
