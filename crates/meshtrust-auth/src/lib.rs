//! Meshtrust Authentication Layer
//!
//! - Challenge protocol: issue, answer, and verify a signed challenge
//! - Auth engine: per-connection mutual handshake feeding the trust store
//! - Forwarding gate: per-packet trust check for the routing layer

pub mod error;
pub mod challenge;
pub mod wire;
pub mod connection;
pub mod rate_limit;
pub mod engine;
pub mod routing;
pub mod gate;

pub use challenge::{
    build_response, verify_response, verify_response_at, Challenge, ChallengeIssuer, Response,
    VerifyReason,
};
pub use connection::{Connection, MemoryConnection};
pub use engine::{AuthEngine, AuthOutcome, AuthReason};
pub use error::AuthError;
pub use gate::{destination_address, ForwardDecision, ForwardingGate, ForwardingPolicy};
pub use rate_limit::FailureLimiter;
pub use routing::{RouteLookup, RoutingTable};
pub use wire::{Frame, Verdict};
