//! Long-term node identity.

use std::fmt;
use std::io::Write;
use std::path::Path;

use meshtrust_core::PeerId;

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};
use crate::signing::{sign, Signature};

/// A node's key pair together with its derived peer identifier.
///
/// Created once on first run and immutable afterwards. The private key is
/// never serialized anywhere except the local identity file.
pub struct Identity {
    keypair: KeyPair,
    id: PeerId,
}

impl Identity {
    /// Generate a fresh identity from OS entropy.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self::from_keypair(KeyPair::generate()?))
    }

    pub fn from_keypair(keypair: KeyPair) -> Self {
        let id = keypair.public_key().peer_id();
        Self { keypair, id }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        sign(message, &self.keypair)
    }

    /// Load the identity stored at `path`, creating it on first run.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            let bytes = zeroize::Zeroizing::new(std::fs::read(path)?);
            let identity = Self::from_keypair(KeyPair::from_keypair_bytes(&bytes)?);
            tracing::info!(path = %path.display(), peer_id = %identity.id, "loaded identity");
            Ok(identity)
        } else {
            let identity = Self::generate()?;
            identity.save(path)?;
            tracing::info!(path = %path.display(), peer_id = %identity.id, "generated new identity");
            Ok(identity)
        }
    }

    /// Write the key pair to `path`, readable only by the owner on unix.
    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(self.keypair.to_keypair_bytes().as_slice())?;
        file.sync_all()?;
        Ok(())
    }

    /// Destroy the stored identity. The next start generates a new one.
    pub fn reset(path: &Path) -> Result<bool, CryptoError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::warn!(path = %path.display(), "identity reset");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("id", &self.id).finish_non_exhaustive()
    }
}
