//! Single challenge/response exchange.
//!
//! The verifier issues a [`Challenge`], the responder signs its canonical
//! bytes, and the verifier checks the [`Response`] against its own copy of
//! the challenge. Checks run in a fixed order (expiry, identity, signature)
//! so the failure reason is deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meshtrust_core::PeerId;
use meshtrust_crypto::{verify, Identity, PublicKey, Signature};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Domain separation tag prefixed to every signed challenge.
pub const CHALLENGE_DOMAIN: &[u8] = b"meshtrust/challenge/v1";

pub const NONCE_LENGTH: usize = 32;

/// Outstanding challenges kept before expired ones are swept.
const PURGE_THRESHOLD: usize = 1024;

/// A fresh, time-bounded value the verifier asks a peer to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: [u8; NONCE_LENGTH],
    pub issued_at: DateTime<Utc>,
    /// Strictly increasing per issuer.
    pub sequence: u64,
}

impl Challenge {
    /// Canonical signing payload.
    ///
    /// `domain || nonce || issued_at secs (i64 BE) || issued_at nanos (u32 BE) || sequence (u64 BE)`.
    /// Every field bit lands in the payload, so any mutation changes it.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CHALLENGE_DOMAIN.len() + NONCE_LENGTH + 8 + 4 + 8);
        buf.extend_from_slice(CHALLENGE_DOMAIN);
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.issued_at.timestamp().to_be_bytes());
        buf.extend_from_slice(&self.issued_at.timestamp_subsec_nanos().to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf
    }
}

/// A peer's signed answer to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub peer_id: PeerId,
    pub signature: Vec<u8>,
}

/// Result of checking a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyReason {
    Ok,
    /// The challenge is older than the allowed age.
    Expired,
    /// The signature does not verify over the challenge bytes.
    BadSignature,
    /// The declared peer id is not derived from the claimed key.
    KeyMismatch,
}

impl VerifyReason {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Sign `challenge` with the responder's identity.
pub fn build_response(identity: &Identity, challenge: &Challenge) -> Response {
    let signature = identity.sign(&challenge.signing_bytes());
    Response {
        peer_id: identity.id().clone(),
        signature: signature.to_bytes().to_vec(),
    }
}

/// Verify `response` against the verifier's own `challenge` as of now.
pub fn verify_response(
    challenge: &Challenge,
    response: &Response,
    claimed_key: &PublicKey,
    max_age: Duration,
) -> VerifyReason {
    verify_response_at(challenge, response, claimed_key, Utc::now(), max_age)
}

/// Verify `response` as of `now`.
pub fn verify_response_at(
    challenge: &Challenge,
    response: &Response,
    claimed_key: &PublicKey,
    now: DateTime<Utc>,
    max_age: Duration,
) -> VerifyReason {
    // A negative age (clock moved backwards) does not expire the challenge.
    if let Ok(age) = now.signed_duration_since(challenge.issued_at).to_std() {
        if age > max_age {
            return VerifyReason::Expired;
        }
    }

    if response.peer_id != claimed_key.peer_id() {
        return VerifyReason::KeyMismatch;
    }

    let Ok(signature) = Signature::from_bytes(&response.signature) else {
        return VerifyReason::BadSignature;
    };
    match verify(&challenge.signing_bytes(), &signature, claimed_key) {
        Ok(()) => VerifyReason::Ok,
        Err(_) => VerifyReason::BadSignature,
    }
}

/// Issues challenges for one verifier and makes each one single-use.
pub struct ChallengeIssuer {
    next_sequence: AtomicU64,
    /// sequence -> issued_at for challenges not yet redeemed.
    outstanding: DashMap<u64, DateTime<Utc>>,
    max_age: Duration,
}

impl ChallengeIssuer {
    pub fn new(max_age: Duration) -> Self {
        Self {
            next_sequence: AtomicU64::new(1),
            outstanding: DashMap::new(),
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn issue(&self) -> Result<Challenge, AuthError> {
        self.issue_at(Utc::now())
    }

    /// Issue a challenge stamped with `now`.
    pub fn issue_at(&self, now: DateTime<Utc>) -> Result<Challenge, AuthError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| AuthError::Entropy(e.to_string()))?;

        if self.outstanding.len() >= PURGE_THRESHOLD {
            self.purge_expired(now);
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.outstanding.insert(sequence, now);
        Ok(Challenge {
            nonce,
            issued_at: now,
            sequence,
        })
    }

    /// Consume a challenge. Returns false if it was never issued here, was
    /// already redeemed, or its fields do not match what was issued.
    pub fn redeem(&self, challenge: &Challenge) -> bool {
        self.outstanding
            .remove_if(&challenge.sequence, |_, issued_at| *issued_at == challenge.issued_at)
            .is_some()
    }

    /// Drop a challenge that will never be redeemed (timeout, closed connection).
    pub fn discard(&self, sequence: u64) {
        self.outstanding.remove(&sequence);
    }

    /// Forget challenges older than the max age.
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        let max_age = self.max_age;
        self.outstanding.retain(|_, issued_at| {
            now.signed_duration_since(*issued_at)
                .to_std()
                .map(|age| age <= max_age)
                .unwrap_or(true)
        });
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}
