use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meshtrust_core::{PeerId, TrustEvent, TrustRecord, TrustStateMachine, TrustStatus};
use tokio::sync::broadcast;

use crate::backend::{MemoryBackend, TrustBackend};
use crate::error::StoreError;
use crate::events::TrustChange;
use crate::rocks::RocksBackend;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Persistent mapping from peer id to trust record.
///
/// The store is the single writer of trust state. Writes for the same peer are
/// serialized by a per-peer lock held across the backend write, so operator
/// decisions and handshake updates are linearizable per peer. The in-memory
/// index is only touched for the final insert, so readers of other peers never
/// wait on disk I/O.
pub struct TrustStore {
    records: DashMap<PeerId, TrustRecord>,
    write_locks: DashMap<PeerId, Arc<Mutex<()>>>,
    /// Serializes address assignment so two peers cannot claim one address.
    address_lock: Mutex<()>,
    backend: Arc<dyn TrustBackend>,
    next_seq: AtomicU64,
    changes: broadcast::Sender<TrustChange>,
}

impl TrustStore {
    /// Build a store over `backend`, loading everything it holds.
    pub fn open(backend: Arc<dyn TrustBackend>) -> Result<Self, StoreError> {
        let mut loaded = backend.load_all()?;
        loaded.sort_by_key(|r| r.created_seq);

        let next_seq = loaded.last().map(|r| r.created_seq + 1).unwrap_or(0);
        let records = DashMap::with_capacity(loaded.len());
        for record in loaded {
            records.insert(record.peer_id.clone(), record);
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        tracing::info!(peers = records.len(), "trust store loaded");

        Ok(Self {
            records,
            write_locks: DashMap::new(),
            address_lock: Mutex::new(()),
            backend,
            next_seq: AtomicU64::new(next_seq),
            changes,
        })
    }

    /// Open a RocksDB-backed store at `path`.
    pub fn open_rocksdb(path: &Path) -> Result<Self, StoreError> {
        Self::open(Arc::new(RocksBackend::open(path)?))
    }

    /// An empty store that does not outlive the process.
    pub fn in_memory() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            write_locks: DashMap::new(),
            address_lock: Mutex::new(()),
            backend: Arc::new(MemoryBackend::new()),
            next_seq: AtomicU64::new(0),
            changes,
        }
    }

    /// Subscribe to committed changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TrustChange> {
        self.changes.subscribe()
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub fn get(&self, peer_id: &PeerId) -> Option<TrustRecord> {
        self.records.get(peer_id).map(|entry| entry.clone())
    }

    /// Current status without cloning the record.
    pub fn status(&self, peer_id: &PeerId) -> Option<TrustStatus> {
        self.records.get(peer_id).map(|entry| entry.status)
    }

    /// True iff the peer's record exists and is `Authorized`.
    pub fn is_authorized(&self, peer_id: &PeerId) -> bool {
        self.status(peer_id)
            .map(|s| s.permits_forwarding())
            .unwrap_or(false)
    }

    /// Snapshot of all records in insertion order.
    pub fn list(&self) -> Vec<TrustRecord> {
        let mut all: Vec<TrustRecord> = self.records.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.created_seq);
        all
    }

    /// Records currently waiting for an operator decision.
    pub fn pending_inbound(&self) -> Vec<TrustRecord> {
        self.list()
            .into_iter()
            .filter(|r| r.status == TrustStatus::PendingInbound)
            .collect()
    }

    /// The peer an address is assigned to, if any.
    pub fn peer_for_address(&self, address: IpAddr) -> Option<PeerId> {
        self.records
            .iter()
            .find(|e| e.assigned_address == Some(address))
            .map(|e| e.key().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ---------------------------------------------------------------------
    // Generic writes
    // ---------------------------------------------------------------------

    /// Insert or replace a record.
    ///
    /// A replaced record keeps its original insertion position.
    pub fn upsert(&self, mut record: TrustRecord) -> Result<(), StoreError> {
        record.validate()?;
        let peer_id = record.peer_id.clone();
        self.modify(&peer_id, |current| {
            record.created_seq = match current {
                Some(existing) => existing.created_seq,
                None => self.next_seq.fetch_add(1, Ordering::SeqCst),
            };
            Ok(Some(record))
        })
        .map(|_| ())
    }

    /// Overwrite a peer's status without consulting the state machine.
    pub fn set_status(&self, peer_id: &PeerId, status: TrustStatus) -> Result<(), StoreError> {
        self.modify(peer_id, |current| {
            let mut record = current.cloned().ok_or_else(|| StoreError::PeerNotFound(peer_id.clone()))?;
            record.status = status;
            record.updated_at = Utc::now();
            Ok(Some(record))
        })
        .map(|_| ())
    }

    /// Apply a state machine event to an existing record.
    pub fn apply(&self, peer_id: &PeerId, event: TrustEvent) -> Result<TrustStatus, StoreError> {
        let record = self.modify(peer_id, |current| {
            let current = current.ok_or_else(|| StoreError::PeerNotFound(peer_id.clone()))?;
            let next = TrustStateMachine::transition(current.status, event)?;
            if next == current.status {
                return Ok(None);
            }
            let mut record = current.clone();
            record.status = next;
            record.updated_at = Utc::now();
            Ok(Some(record))
        })?;
        Ok(record.status)
    }

    /// Delete a record. Returns whether one existed.
    pub fn remove(&self, peer_id: &PeerId) -> Result<bool, StoreError> {
        let lock = self.write_lock(peer_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let Some(last_status) = self.status(peer_id) else {
            return Ok(false);
        };
        self.backend.delete(peer_id)?;
        self.records.remove(peer_id);

        tracing::info!(peer_id = %peer_id, status = %last_status, "peer removed");
        self.notify(TrustChange::Removed {
            peer_id: peer_id.clone(),
            last_status,
        });
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Handshake-driven writes
    // ---------------------------------------------------------------------

    /// Record a successful handshake from the holder of `public_key`.
    ///
    /// Creates the record on first contact and moves `Unknown` to
    /// `PendingInbound`. Never grants or lifts trust. `last_handshake_at`
    /// only moves forward, so a late-finishing handshake cannot roll it back.
    pub fn record_handshake(
        &self,
        public_key: [u8; 32],
        at: DateTime<Utc>,
    ) -> Result<TrustRecord, StoreError> {
        let peer_id = PeerId::from_public_key(&public_key);
        self.modify(&peer_id, |current| {
            let mut record = match current {
                Some(existing) => existing.clone(),
                None => {
                    let mut fresh = TrustRecord::new(public_key, TrustStatus::Unknown, at);
                    fresh.created_seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                    fresh
                }
            };
            record.status = TrustStateMachine::transition(record.status, TrustEvent::InboundObserved)?;
            if record.last_handshake_at.map_or(true, |prev| at > prev) {
                record.last_handshake_at = Some(at);
            }
            record.updated_at = Utc::now();
            Ok(Some(record))
        })
    }

    /// The verified peer told us it approves us.
    ///
    /// Completes `PendingOutbound -> Authorized`; any other status is left
    /// untouched. Returns the resulting status, or `None` for unknown peers.
    pub fn peer_approved(&self, peer_id: &PeerId) -> Result<Option<TrustStatus>, StoreError> {
        let result = self.modify(peer_id, |current| {
            let current = current.ok_or_else(|| StoreError::PeerNotFound(peer_id.clone()))?;
            let next = match TrustStateMachine::transition(current.status, TrustEvent::PeerApproved) {
                Ok(next) if next != current.status => next,
                _ => return Ok(None),
            };
            let mut record = current.clone();
            record.status = next;
            record.updated_at = Utc::now();
            Ok(Some(record))
        });
        match result {
            Ok(record) => Ok(Some(record.status)),
            Err(StoreError::PeerNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Note a verified handshake with a peer we already know, without
    /// creating a record or changing its status. Returns `None` for peers the
    /// store has never seen.
    pub fn touch_handshake(
        &self,
        peer_id: &PeerId,
        at: DateTime<Utc>,
    ) -> Result<Option<TrustRecord>, StoreError> {
        if self.status(peer_id).is_none() {
            return Ok(None);
        }
        let result = self.modify(peer_id, |current| {
            let Some(current) = current else {
                return Ok(None);
            };
            if current.last_handshake_at.is_some_and(|prev| prev >= at) {
                return Ok(None);
            }
            let mut record = current.clone();
            record.last_handshake_at = Some(at);
            record.updated_at = Utc::now();
            Ok(Some(record))
        });
        match result {
            Ok(record) => Ok(Some(record)),
            // Removed between the check and the write.
            Err(StoreError::PeerNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ---------------------------------------------------------------------
    // Operator actions
    // ---------------------------------------------------------------------

    pub fn list_peers(&self) -> Vec<TrustRecord> {
        self.list()
    }

    pub fn approve(&self, peer_id: &PeerId) -> Result<TrustStatus, StoreError> {
        self.apply(peer_id, TrustEvent::OperatorApproved)
    }

    pub fn reject(&self, peer_id: &PeerId) -> Result<TrustStatus, StoreError> {
        self.apply(peer_id, TrustEvent::OperatorRejected)
    }

    pub fn block(&self, peer_id: &PeerId) -> Result<TrustStatus, StoreError> {
        self.apply(peer_id, TrustEvent::OperatorBlocked)
    }

    pub fn unblock(&self, peer_id: &PeerId) -> Result<TrustStatus, StoreError> {
        self.apply(peer_id, TrustEvent::OperatorUnblocked)
    }

    /// Register a peer we intend to trust, ahead of its approval of us.
    pub fn add_pending_outbound(
        &self,
        peer_id: &PeerId,
        public_key: [u8; 32],
        display_name: Option<String>,
    ) -> Result<TrustRecord, StoreError> {
        if PeerId::from_public_key(&public_key) != *peer_id {
            return Err(StoreError::KeyMismatch(peer_id.clone()));
        }
        self.modify(peer_id, |current| {
            let mut record = match current {
                Some(existing) => existing.clone(),
                None => {
                    let mut fresh = TrustRecord::new(public_key, TrustStatus::Unknown, Utc::now());
                    fresh.created_seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                    fresh
                }
            };
            record.status = TrustStateMachine::transition(record.status, TrustEvent::OperatorAdded)?;
            if let Some(name) = display_name {
                record.display_name = name;
            }
            record.updated_at = Utc::now();
            Ok(Some(record))
        })
    }

    pub fn set_display_name(&self, peer_id: &PeerId, name: &str) -> Result<(), StoreError> {
        self.modify(peer_id, |current| {
            let current = current.ok_or_else(|| StoreError::PeerNotFound(peer_id.clone()))?;
            if current.display_name == name {
                return Ok(None);
            }
            let mut record = current.clone();
            record.display_name = name.to_string();
            record.updated_at = Utc::now();
            Ok(Some(record))
        })
        .map(|_| ())
    }

    /// Assign (or clear, with `None`) the virtual address routed to a peer.
    pub fn assign_address(&self, peer_id: &PeerId, address: Option<IpAddr>) -> Result<(), StoreError> {
        let _assign = self.address_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(address) = address {
            if let Some(owner) = self.peer_for_address(address) {
                if owner != *peer_id {
                    return Err(StoreError::AddressInUse { address, owner });
                }
            }
        }
        self.modify(peer_id, |current| {
            let current = current.ok_or_else(|| StoreError::PeerNotFound(peer_id.clone()))?;
            if current.assigned_address == address {
                return Ok(None);
            }
            let mut record = current.clone();
            record.assigned_address = address;
            record.updated_at = Utc::now();
            Ok(Some(record))
        })
        .map(|_| ())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn write_lock(&self, peer_id: &PeerId) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(peer_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read-modify-write of one peer's record under its write lock.
    ///
    /// `f` returns `Ok(None)` to leave the record untouched. The backend is
    /// written before the in-memory index, so a failed write changes nothing.
    /// Returns the record as it stands after the call.
    fn modify<F>(&self, peer_id: &PeerId, f: F) -> Result<TrustRecord, StoreError>
    where
        F: FnOnce(Option<&TrustRecord>) -> Result<Option<TrustRecord>, StoreError>,
    {
        let lock = self.write_lock(peer_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.get(peer_id);
        let Some(next) = f(current.as_ref())? else {
            return current.ok_or_else(|| StoreError::PeerNotFound(peer_id.clone()));
        };

        self.backend.put(&next)?;
        self.records.insert(peer_id.clone(), next.clone());

        let change = match &current {
            None => TrustChange::Added {
                peer_id: peer_id.clone(),
                status: next.status,
            },
            Some(prev) if prev.status != next.status => TrustChange::StatusChanged {
                peer_id: peer_id.clone(),
                from: prev.status,
                to: next.status,
            },
            Some(_) => TrustChange::Updated {
                peer_id: peer_id.clone(),
            },
        };
        match &change {
            TrustChange::StatusChanged { from, to, .. } => {
                tracing::info!(peer_id = %peer_id, from = %from, to = %to, "peer trust status changed");
            }
            TrustChange::Added { status, .. } => {
                tracing::info!(peer_id = %peer_id, status = %status, "peer added to trust store");
            }
            _ => tracing::debug!(peer_id = %peer_id, "peer record updated"),
        }
        self.notify(change);

        Ok(next)
    }

    fn notify(&self, change: TrustChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}
