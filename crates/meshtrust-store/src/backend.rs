use std::collections::BTreeMap;
use std::sync::Mutex;

use meshtrust_core::{PeerId, TrustRecord};

use crate::error::StoreError;

/// Durable storage for trust records.
///
/// Writes for one peer are serialized by the store, so implementations only
/// need to make each individual call atomic.
pub trait TrustBackend: Send + Sync {
    /// Insert or replace the record keyed by its peer id.
    fn put(&self, record: &TrustRecord) -> Result<(), StoreError>;

    /// Delete the record for a peer. Deleting a missing key is not an error.
    fn delete(&self, peer_id: &PeerId) -> Result<(), StoreError>;

    /// Load every stored record, in any order.
    fn load_all(&self) -> Result<Vec<TrustRecord>, StoreError>;
}

/// In-memory backend holding encoded records.
///
/// Shares the persisted encoding with the RocksDB backend, so a store rebuilt
/// from the same `MemoryBackend` behaves like a restarted node.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Raw encoded bytes for a peer, for persistence tests.
    pub fn raw(&self, peer_id: &PeerId) -> Option<Vec<u8>> {
        self.lock().get(peer_id.as_str()).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TrustBackend for MemoryBackend {
    fn put(&self, record: &TrustRecord) -> Result<(), StoreError> {
        let bytes = record.encode()?;
        self.lock().insert(record.peer_id.to_string(), bytes);
        Ok(())
    }

    fn delete(&self, peer_id: &PeerId) -> Result<(), StoreError> {
        self.lock().remove(peer_id.as_str());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<TrustRecord>, StoreError> {
        self.lock()
            .values()
            .map(|bytes| TrustRecord::decode(bytes).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meshtrust_core::TrustStatus;

    #[test]
    fn test_put_load_delete() {
        let backend = MemoryBackend::new();
        let record = TrustRecord::new([1u8; 32], TrustStatus::PendingInbound, Utc::now());

        backend.put(&record).unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.load_all().unwrap(), vec![record.clone()]);

        backend.delete(&record.peer_id).unwrap();
        assert!(backend.is_empty());
        backend.delete(&record.peer_id).unwrap();
    }

    #[test]
    fn test_put_replaces() {
        let backend = MemoryBackend::new();
        let mut record = TrustRecord::new([2u8; 32], TrustStatus::PendingInbound, Utc::now());
        backend.put(&record).unwrap();
        record.status = TrustStatus::Authorized;
        backend.put(&record).unwrap();

        let loaded = backend.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, TrustStatus::Authorized);
    }
}
