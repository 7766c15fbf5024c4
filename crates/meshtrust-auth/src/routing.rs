//! Virtual address to peer mapping consulted by the forwarding gate.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use meshtrust_core::PeerId;
use meshtrust_store::TrustStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Resolves a destination address to the peer that owns it.
pub trait RouteLookup: Send + Sync {
    fn peer_for(&self, address: IpAddr) -> Option<PeerId>;
}

/// Linear scan over the store's assignments.
impl RouteLookup for TrustStore {
    fn peer_for(&self, address: IpAddr) -> Option<PeerId> {
        self.peer_for_address(address)
    }
}

/// In-memory routing table kept in step with the trust store's assignments.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: DashMap<IpAddr, PeerId>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `address` to `peer_id`, returning the previous owner.
    pub fn add_route(&self, address: IpAddr, peer_id: PeerId) -> Option<PeerId> {
        self.routes.insert(address, peer_id)
    }

    pub fn remove_route(&self, address: IpAddr) -> Option<PeerId> {
        self.routes.remove(&address).map(|(_, peer)| peer)
    }

    /// Drop every route pointing at `peer_id`.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        self.routes.retain(|_, owner| *owner != *peer_id);
    }

    /// Snapshot of all routes, ordered by address.
    pub fn routes(&self) -> Vec<(IpAddr, PeerId)> {
        let mut all: Vec<(IpAddr, PeerId)> = self
            .routes
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(addr, _)| *addr);
        all
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Make the table match the store's address assignments.
    pub fn sync_from_store(&self, store: &TrustStore) {
        let wanted: HashMap<IpAddr, PeerId> = store
            .list()
            .into_iter()
            .filter_map(|r| r.assigned_address.map(|addr| (addr, r.peer_id)))
            .collect();

        self.routes
            .retain(|addr, owner| wanted.get(addr).is_some_and(|peer| *peer == *owner));
        for (addr, peer) in wanted {
            self.routes.insert(addr, peer);
        }
        tracing::debug!(routes = self.routes.len(), "routing table synced");
    }

    /// Keep the table synced with `store` in the background. Abort the
    /// returned handle to stop.
    pub fn spawn_sync(self: Arc<Self>, store: Arc<TrustStore>) -> JoinHandle<()> {
        let mut changes = store.subscribe();
        self.sync_from_store(&store);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        tracing::trace!(peer_id = %change.peer_id(), "resyncing routes");
                        self.sync_from_store(&store);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "trust change stream lagged, resyncing routes");
                        self.sync_from_store(&store);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl RouteLookup for RoutingTable {
    fn peer_for(&self, address: IpAddr) -> Option<PeerId> {
        self.routes.get(&address).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn id(n: u8) -> PeerId {
        PeerId::from_public_key(&[n; 32])
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_and_remove_routes() {
        let table = RoutingTable::new();
        assert_eq!(table.add_route(addr("10.66.0.2"), id(1)), None);
        assert_eq!(table.add_route(addr("10.66.0.3"), id(1)), None);
        assert_eq!(table.add_route(addr("10.66.0.4"), id(2)), None);
        assert_eq!(table.peer_for(addr("10.66.0.2")), Some(id(1)));

        table.remove_peer(&id(1));
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove_route(addr("10.66.0.4")), Some(id(2)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_sync_from_store() {
        let store = TrustStore::in_memory();
        store.record_handshake([1; 32], Utc::now()).unwrap();
        store.record_handshake([2; 32], Utc::now()).unwrap();
        store.assign_address(&id(1), Some(addr("10.66.0.2"))).unwrap();

        let table = RoutingTable::new();
        table.add_route(addr("10.66.0.9"), id(2));
        table.sync_from_store(&store);
        assert_eq!(table.routes(), vec![(addr("10.66.0.2"), id(1))]);
    }

    #[test]
    fn test_store_is_a_route_lookup() {
        let store = TrustStore::in_memory();
        store.record_handshake([1; 32], Utc::now()).unwrap();
        store.assign_address(&id(1), Some(addr("fd00::2"))).unwrap();
        assert_eq!(store.peer_for(addr("fd00::2")), Some(id(1)));
    }

    #[tokio::test]
    async fn test_spawn_sync_follows_changes() {
        let store = Arc::new(TrustStore::in_memory());
        store.record_handshake([1; 32], Utc::now()).unwrap();

        let table = Arc::new(RoutingTable::new());
        let handle = table.clone().spawn_sync(store.clone());

        store.assign_address(&id(1), Some(addr("10.66.0.2"))).unwrap();
        let mut synced = false;
        for _ in 0..50 {
            if table.peer_for(addr("10.66.0.2")).is_some() {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced);

        store.remove(&id(1)).unwrap();
        for _ in 0..50 {
            if table.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(table.is_empty());
        handle.abort();
    }
}
