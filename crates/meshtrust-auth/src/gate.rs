//! Per-packet trust check between the tunnel and the routing layer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use meshtrust_core::PeerId;
use meshtrust_store::TrustStore;

use crate::engine::AuthEngine;
use crate::routing::RouteLookup;

/// Answers whether traffic for a peer may be forwarded.
pub trait ForwardingPolicy: Send + Sync {
    fn is_authorized_to_forward(&self, peer_id: &PeerId) -> bool;
}

impl ForwardingPolicy for TrustStore {
    fn is_authorized_to_forward(&self, peer_id: &PeerId) -> bool {
        self.is_authorized(peer_id)
    }
}

impl ForwardingPolicy for AuthEngine {
    fn is_authorized_to_forward(&self, peer_id: &PeerId) -> bool {
        AuthEngine::is_authorized_to_forward(self, peer_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardDecision {
    /// Peer the destination routes to, if any.
    pub peer_id: Option<PeerId>,
    pub allow: bool,
}

impl ForwardDecision {
    fn drop_unrouted() -> Self {
        Self {
            peer_id: None,
            allow: false,
        }
    }
}

/// Destination address of a raw IP packet.
///
/// IPv4 destination lives at bytes 16..20, IPv6 at 24..40. Returns `None` for
/// truncated packets and unknown versions.
pub fn destination_address(packet: &[u8]) -> Option<IpAddr> {
    let version = packet.first()? >> 4;
    match version {
        4 => {
            let dst: [u8; 4] = packet.get(16..20)?.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(dst)))
        }
        6 => {
            let dst: [u8; 16] = packet.get(24..40)?.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(dst)))
        }
        _ => None,
    }
}

/// Decides, packet by packet, whether a destination may be forwarded.
///
/// Reads current trust on every call, so a block takes effect on the next
/// packet with no cache to invalidate.
pub struct ForwardingGate {
    routes: Arc<dyn RouteLookup>,
    policy: Arc<dyn ForwardingPolicy>,
}

impl ForwardingGate {
    pub fn new(routes: Arc<dyn RouteLookup>, policy: Arc<dyn ForwardingPolicy>) -> Self {
        Self { routes, policy }
    }

    /// Gate backed directly by the store for both routing and trust.
    ///
    /// Route lookups scan every record, so this suits tests and small peer
    /// sets. The packet path uses a [`RoutingTable`](crate::RoutingTable).
    pub fn from_store(store: Arc<TrustStore>) -> Self {
        Self::new(store.clone(), store)
    }

    pub fn should_forward(&self, destination: IpAddr) -> ForwardDecision {
        let Some(peer_id) = self.routes.peer_for(destination) else {
            tracing::trace!(%destination, "dropping packet: no route");
            return ForwardDecision::drop_unrouted();
        };
        let allow = self.policy.is_authorized_to_forward(&peer_id);
        if !allow {
            tracing::trace!(%destination, peer_id = %peer_id, "dropping packet: peer not authorized");
        }
        ForwardDecision {
            peer_id: Some(peer_id),
            allow,
        }
    }

    pub fn should_forward_packet(&self, packet: &[u8]) -> ForwardDecision {
        match destination_address(packet) {
            Some(destination) => self.should_forward(destination),
            None => {
                tracing::trace!(len = packet.len(), "dropping packet: unparseable header");
                ForwardDecision::drop_unrouted()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingTable;
    use chrono::Utc;

    fn id(n: u8) -> PeerId {
        PeerId::from_public_key(&[n; 32])
    }

    fn ipv4_packet(dst: [u8; 4]) -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[12..16].copy_from_slice(&[10, 66, 0, 1]);
        packet[16..20].copy_from_slice(&dst);
        packet
    }

    fn ipv6_packet(dst: Ipv6Addr) -> Vec<u8> {
        let mut packet = vec![0u8; 40];
        packet[0] = 0x60;
        packet[24..40].copy_from_slice(&dst.octets());
        packet
    }

    #[test]
    fn test_destination_address() {
        assert_eq!(
            destination_address(&ipv4_packet([10, 66, 0, 7])),
            Some("10.66.0.7".parse().unwrap())
        );
        let v6: Ipv6Addr = "fd00::7".parse().unwrap();
        assert_eq!(destination_address(&ipv6_packet(v6)), Some(IpAddr::V6(v6)));

        assert_eq!(destination_address(&[]), None);
        assert_eq!(destination_address(&ipv4_packet([1, 2, 3, 4])[..19]), None);
        assert_eq!(destination_address(&[0x20; 40]), None);
    }

    #[test]
    fn test_gate_follows_trust_status() {
        let store = Arc::new(TrustStore::in_memory());
        store.record_handshake([1; 32], Utc::now()).unwrap();
        store.assign_address(&id(1), Some("10.66.0.7".parse().unwrap())).unwrap();
        let gate = ForwardingGate::from_store(store.clone());
        let packet = ipv4_packet([10, 66, 0, 7]);

        let decision = gate.should_forward_packet(&packet);
        assert_eq!(decision.peer_id, Some(id(1)));
        assert!(!decision.allow);

        store.approve(&id(1)).unwrap();
        assert!(gate.should_forward_packet(&packet).allow);

        store.block(&id(1)).unwrap();
        assert!(!gate.should_forward_packet(&packet).allow);
    }

    #[test]
    fn test_unrouted_destination_dropped() {
        let gate = ForwardingGate::from_store(Arc::new(TrustStore::in_memory()));
        assert_eq!(
            gate.should_forward_packet(&ipv4_packet([192, 0, 2, 1])),
            ForwardDecision {
                peer_id: None,
                allow: false
            }
        );
        assert!(!gate.should_forward_packet(b"\x45").allow);
    }

    #[test]
    fn test_gate_with_routing_table() {
        let store = Arc::new(TrustStore::in_memory());
        store.record_handshake([2; 32], Utc::now()).unwrap();
        store.approve(&id(2)).unwrap();

        let table = Arc::new(RoutingTable::new());
        table.add_route("fd00::2".parse().unwrap(), id(2));
        let gate = ForwardingGate::new(table, store);

        let decision = gate.should_forward("fd00::2".parse().unwrap());
        assert!(decision.allow);
        assert_eq!(decision.peer_id, Some(id(2)));
    }
}
