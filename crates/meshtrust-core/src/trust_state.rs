use std::fmt;

use crate::error::CoreError;

/// Trust status of a known peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum TrustStatus {
    /// Observed but no trust decision recorded yet.
    #[default]
    Unknown,
    /// The peer connected to us and proved key possession; awaiting operator approval.
    PendingInbound,
    /// The operator added the peer; awaiting the peer's approval of us.
    PendingOutbound,
    /// Mutually trusted. The only status that permits forwarding.
    Authorized,
    /// Operator blocked or rejected the peer.
    Blocked,
}

impl TrustStatus {
    /// Whether traffic toward a peer with this status may be forwarded.
    pub fn permits_forwarding(&self) -> bool {
        matches!(self, Self::Authorized)
    }

    /// Whether the local operator has expressed trust in the peer.
    ///
    /// Sent to the remote side in the handshake verdict so that a
    /// `PendingOutbound` record on their end can complete.
    pub fn locally_approved(&self) -> bool {
        matches!(self, Self::PendingOutbound | Self::Authorized)
    }
}

impl fmt::Display for TrustStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::PendingInbound => write!(f, "PendingInbound"),
            Self::PendingOutbound => write!(f, "PendingOutbound"),
            Self::Authorized => write!(f, "Authorized"),
            Self::Blocked => write!(f, "Blocked"),
        }
    }
}

impl std::str::FromStr for TrustStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "pendinginbound" | "pending-inbound" => Ok(Self::PendingInbound),
            "pendingoutbound" | "pending-outbound" => Ok(Self::PendingOutbound),
            "authorized" => Ok(Self::Authorized),
            "blocked" => Ok(Self::Blocked),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// Events that drive trust status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustEvent {
    /// A handshake from the peer succeeded on an inbound connection.
    InboundObserved,
    /// The operator added the peer manually.
    OperatorAdded,
    /// The operator approved a pending inbound peer.
    OperatorApproved,
    /// The operator rejected a pending inbound peer.
    OperatorRejected,
    /// The peer's verified handshake verdict says it approves us.
    PeerApproved,
    /// The operator blocked the peer.
    OperatorBlocked,
    /// The operator lifted a block.
    OperatorUnblocked,
}

/// Pure trust status transition function.
///
/// Valid transitions:
/// - Unknown → PendingInbound (InboundObserved)
/// - Unknown → PendingOutbound (OperatorAdded)
/// - PendingInbound → Authorized (OperatorApproved)
/// - PendingInbound → Blocked (OperatorRejected)
/// - PendingOutbound → Authorized (PeerApproved)
/// - any → Blocked (OperatorBlocked)
/// - Blocked → PendingInbound (OperatorUnblocked)
///
/// Repeating an event whose effect already holds returns the current status
/// unchanged, so operator actions are idempotent. A handshake observed on a
/// record that already has a decision never changes it; in particular a
/// blocked peer stays blocked however its handshakes resolve.
pub struct TrustStateMachine;

impl TrustStateMachine {
    pub fn transition(current: TrustStatus, event: TrustEvent) -> Result<TrustStatus, CoreError> {
        use TrustEvent as E;
        use TrustStatus as S;

        let next = match (current, event) {
            (S::Unknown, E::InboundObserved) => S::PendingInbound,
            (_, E::InboundObserved) => current,

            (S::Unknown, E::OperatorAdded) => S::PendingOutbound,
            (S::PendingOutbound | S::PendingInbound | S::Authorized, E::OperatorAdded) => current,

            (S::PendingInbound, E::OperatorApproved) => S::Authorized,
            (S::Authorized, E::OperatorApproved) => S::Authorized,

            (S::PendingInbound, E::OperatorRejected) => S::Blocked,
            (S::Blocked, E::OperatorRejected) => S::Blocked,

            (S::PendingOutbound, E::PeerApproved) => S::Authorized,
            (S::Authorized | S::PendingInbound, E::PeerApproved) => current,

            (_, E::OperatorBlocked) => S::Blocked,

            (S::Blocked, E::OperatorUnblocked) => S::PendingInbound,

            _ => return Err(CoreError::InvalidTransition { from: current, event }),
        };

        if next != current {
            tracing::debug!(from = %current, to = %next, event = ?event, "trust state transition");
        }

        Ok(next)
    }

    /// Check if a transition is valid without performing it.
    pub fn can_transition(current: TrustStatus, event: TrustEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
