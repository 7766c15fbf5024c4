use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::trust_state::TrustStatus;
use crate::types::{PeerId, PUBLIC_KEY_LENGTH};

/// Current on-disk record format version.
pub const RECORD_VERSION: u32 = 1;

/// Authoritative trust state for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub peer_id: PeerId,
    pub public_key: [u8; PUBLIC_KEY_LENGTH],
    pub display_name: String,
    pub status: TrustStatus,
    /// Virtual network address routed to this peer, if one is assigned.
    pub assigned_address: Option<IpAddr>,
    pub last_handshake_at: Option<DateTime<Utc>>,
    /// Insertion order within the store. Assigned by the store on creation.
    pub created_seq: u64,
    pub updated_at: DateTime<Utc>,
}

impl TrustRecord {
    /// Create a record for a peer identified by its public key.
    pub fn new(public_key: [u8; PUBLIC_KEY_LENGTH], status: TrustStatus, now: DateTime<Utc>) -> Self {
        let peer_id = PeerId::from_public_key(&public_key);
        let display_name = peer_id.short().to_string();
        Self {
            peer_id,
            public_key,
            display_name,
            status,
            assigned_address: None,
            last_handshake_at: None,
            created_seq: 0,
            updated_at: now,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.assigned_address = Some(address);
        self
    }

    /// Check that the stored key matches the identifier.
    pub fn validate(&self) -> Result<(), CoreError> {
        if PeerId::from_public_key(&self.public_key) != self.peer_id {
            return Err(CoreError::InvalidPeerId(format!(
                "public key does not derive to {}",
                self.peer_id
            )));
        }
        Ok(())
    }

    /// Serialize into the versioned persistence envelope.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let envelope = RecordEnvelope {
            version: RECORD_VERSION,
            record: self.clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Deserialize from the versioned persistence envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let envelope: RecordEnvelope = serde_json::from_slice(bytes)?;
        if envelope.version != RECORD_VERSION {
            return Err(CoreError::UnsupportedVersion(envelope.version));
        }
        envelope.record.validate()?;
        Ok(envelope.record)
    }
}

#[derive(Serialize, Deserialize)]
struct RecordEnvelope {
    version: u32,
    record: TrustRecord,
}
