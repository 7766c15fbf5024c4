//! Trust change notifications.
//!
//! Delivered over a `tokio::sync::broadcast` channel. Delivery is best-effort:
//! a subscriber that falls behind receives `RecvError::Lagged` and should
//! re-read the full peer list from the store.

use meshtrust_core::{PeerId, TrustStatus};

/// A committed change to the trust store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustChange {
    /// A record was created.
    Added { peer_id: PeerId, status: TrustStatus },
    /// A record's status changed.
    StatusChanged {
        peer_id: PeerId,
        from: TrustStatus,
        to: TrustStatus,
    },
    /// Non-status fields changed (display name, address, last handshake).
    Updated { peer_id: PeerId },
    /// A record was deleted by the operator.
    Removed { peer_id: PeerId, last_status: TrustStatus },
}

impl TrustChange {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::Added { peer_id, .. }
            | Self::StatusChanged { peer_id, .. }
            | Self::Updated { peer_id }
            | Self::Removed { peer_id, .. } => peer_id,
        }
    }

    /// Whether this change can alter a forwarding decision.
    pub fn affects_forwarding(&self) -> bool {
        match self {
            Self::Added { status, .. } => status.permits_forwarding(),
            Self::StatusChanged { from, to, .. } => from.permits_forwarding() != to.permits_forwarding(),
            Self::Updated { .. } => true,
            Self::Removed { last_status, .. } => last_status.permits_forwarding(),
        }
    }
}
