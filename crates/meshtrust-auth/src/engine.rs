//! Per-connection mutual authentication.
//!
//! Both sides prove key possession before anything else happens. The
//! acceptor challenges first:
//!
//! ```text
//! acceptor                    initiator
//!   Challenge(C1)   ------>
//!                   <------   Response(R1)
//!   Verdict(V1)     ------>
//!                   <------   Challenge(C2)
//!   Response(R2)    ------>
//!                   <------   Verdict(V2)
//! ```
//!
//! A verdict carries `approved`, telling the other side that it is approved
//! locally. That is what completes `PendingOutbound -> Authorized`. Remote
//! approval is only honoured from a peer verified on the same connection.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use meshtrust_core::{AuthConfig, PeerId, TrustStatus};
use meshtrust_crypto::{Identity, PublicKey};
use meshtrust_store::TrustStore;

use crate::challenge::{build_response, verify_response_at, Challenge, ChallengeIssuer, VerifyReason};
use crate::connection::Connection;
use crate::error::AuthError;
use crate::rate_limit::FailureLimiter;
use crate::wire::{Frame, Verdict};

/// Why a handshake ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReason {
    Accepted,
    Expired,
    BadSignature,
    KeyMismatch,
    Timeout,
    Malformed,
    Replayed,
    RateLimited,
    Blocked,
    /// The remote refused us.
    Rejected,
    Closed,
    Internal,
}

impl AuthReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Expired => "expired",
            Self::BadSignature => "bad_signature",
            Self::KeyMismatch => "key_mismatch",
            Self::Timeout => "timeout",
            Self::Malformed => "malformed",
            Self::Replayed => "replayed",
            Self::RateLimited => "rate_limited",
            Self::Blocked => "blocked",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
            Self::Internal => "internal",
        }
    }

    /// Failures that count against the remote address.
    fn counts_as_failure(&self) -> bool {
        matches!(self, Self::BadSignature | Self::Malformed)
    }

    /// Failures worth telling the remote about before closing.
    fn notify_remote(&self) -> bool {
        !matches!(self, Self::Rejected | Self::Closed | Self::Timeout)
    }
}

impl fmt::Display for AuthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<VerifyReason> for AuthReason {
    fn from(reason: VerifyReason) -> Self {
        match reason {
            VerifyReason::Ok => Self::Accepted,
            VerifyReason::Expired => Self::Expired,
            VerifyReason::BadSignature => Self::BadSignature,
            VerifyReason::KeyMismatch => Self::KeyMismatch,
        }
    }
}

/// Result of one handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub accepted: bool,
    /// The remote's verified id, or its claimed id when verification failed
    /// after it declared one.
    pub peer_id: Option<PeerId>,
    pub reason: AuthReason,
    /// Trust status of the remote after the handshake, if it has a record.
    pub status: Option<TrustStatus>,
}

impl AuthOutcome {
    fn accepted(peer_id: PeerId, status: Option<TrustStatus>) -> Self {
        Self {
            accepted: true,
            peer_id: Some(peer_id),
            reason: AuthReason::Accepted,
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// A handshake step that went wrong.
#[derive(Debug)]
struct Failure {
    reason: AuthReason,
    peer_id: Option<PeerId>,
    status: Option<TrustStatus>,
}

impl Failure {
    fn new(reason: AuthReason) -> Self {
        Self {
            reason,
            peer_id: None,
            status: None,
        }
    }

    fn with_peer(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    fn with_status(mut self, status: Option<TrustStatus>) -> Self {
        self.status = status;
        self
    }
}

impl From<AuthError> for Failure {
    fn from(err: AuthError) -> Self {
        let reason = match &err {
            AuthError::Closed | AuthError::Connection(_) | AuthError::Io(_) => AuthReason::Closed,
            AuthError::Codec(_) => AuthReason::Malformed,
            AuthError::Entropy(_) | AuthError::Crypto(_) | AuthError::Store(_) => {
                tracing::error!(error = %err, "handshake aborted by local error");
                AuthReason::Internal
            }
        };
        Self::new(reason)
    }
}

/// Discards an issued challenge unless it was redeemed.
struct Outstanding<'a> {
    issuer: &'a ChallengeIssuer,
    sequence: u64,
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.issuer.discard(self.sequence);
    }
}

/// Runs handshakes against the local identity and trust store.
pub struct AuthEngine {
    identity: Arc<Identity>,
    store: Arc<TrustStore>,
    issuer: ChallengeIssuer,
    limiter: FailureLimiter,
    config: AuthConfig,
}

impl AuthEngine {
    pub fn new(identity: Arc<Identity>, store: Arc<TrustStore>, config: AuthConfig) -> Self {
        Self {
            issuer: ChallengeIssuer::new(config.max_challenge_age()),
            limiter: FailureLimiter::from_config(&config),
            identity,
            store,
            config,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn issuer(&self) -> &ChallengeIssuer {
        &self.issuer
    }

    pub fn limiter(&self) -> &FailureLimiter {
        &self.limiter
    }

    /// Whether traffic to or from `peer_id` may be forwarded right now.
    pub fn is_authorized_to_forward(&self, peer_id: &PeerId) -> bool {
        self.store.is_authorized(peer_id)
    }

    /// Sweep stale challenges and limiter entries.
    pub fn maintenance(&self) {
        self.issuer.purge_expired(Utc::now());
        self.limiter.cleanup_expired();
    }

    /// Authenticate a connection the remote opened to us.
    ///
    /// On success the remote is recorded in the trust store (first contact
    /// lands in `PendingInbound`). On failure the connection is closed and the
    /// store is left as it was.
    pub async fn handle_inbound_handshake<C>(&self, conn: &mut C) -> AuthOutcome
    where
        C: Connection + ?Sized,
    {
        let direction = Direction::Inbound;
        if let Err(remaining) = self.limiter.check(&conn.remote_host()) {
            tracing::debug!(
                remote = %conn.remote_addr(),
                remaining_secs = remaining.as_secs(),
                "refusing handshake during cooldown"
            );
            return self.fail(conn, direction, Failure::new(AuthReason::RateLimited)).await;
        }

        let remote_key = match self.challenge_remote(conn).await {
            Ok(key) => key,
            Err(failure) => return self.fail(conn, direction, failure).await,
        };
        let peer_id = remote_key.peer_id();

        // Read only until both legs have succeeded.
        let known = self.store.status(&peer_id);
        if known == Some(TrustStatus::Blocked) {
            let failure = Failure::new(AuthReason::Blocked)
                .with_peer(peer_id)
                .with_status(known);
            return self.fail(conn, direction, failure).await;
        }

        let verdict = Verdict::accept(known.is_some_and(|s| s.locally_approved()));
        if let Err(e) = self.send_frame(conn, Frame::Verdict(verdict)).await {
            let failure = Failure::from(e).with_peer(peer_id).with_status(known);
            return self.fail(conn, direction, failure).await;
        }

        let remote_verdict = match self.answer_remote(conn).await {
            Ok(verdict) => verdict,
            Err(failure) => {
                let status = self.store.status(&peer_id);
                return self
                    .fail(conn, direction, failure.with_peer(peer_id).with_status(status))
                    .await;
            }
        };

        if let Err(e) = self.store.record_handshake(*remote_key.as_bytes(), Utc::now()) {
            let failure = Failure::from(AuthError::from(e)).with_peer(peer_id);
            return self.fail(conn, direction, failure).await;
        }

        self.complete(conn, direction, peer_id, remote_verdict).await
    }

    /// Authenticate a connection we opened to the remote.
    ///
    /// Never creates a trust record; it only refreshes the handshake time of
    /// a peer the store already knows.
    pub async fn handle_outbound_handshake<C>(&self, conn: &mut C) -> AuthOutcome
    where
        C: Connection + ?Sized,
    {
        let direction = Direction::Outbound;

        let remote_verdict = match self.answer_remote(conn).await {
            Ok(verdict) => verdict,
            Err(failure) => return self.fail(conn, direction, failure).await,
        };

        let remote_key = match self.challenge_remote(conn).await {
            Ok(key) => key,
            Err(failure) => return self.fail(conn, direction, failure).await,
        };
        let peer_id = remote_key.peer_id();

        let record = match self.store.touch_handshake(&peer_id, Utc::now()) {
            Ok(record) => record,
            Err(e) => {
                let failure = Failure::from(AuthError::from(e)).with_peer(peer_id);
                return self.fail(conn, direction, failure).await;
            }
        };
        let status = record.map(|r| r.status);
        if status == Some(TrustStatus::Blocked) {
            let failure = Failure::new(AuthReason::Blocked)
                .with_peer(peer_id)
                .with_status(status);
            return self.fail(conn, direction, failure).await;
        }

        let approved = status.is_some_and(|s| s.locally_approved());
        if let Err(e) = self.send_frame(conn, Frame::Verdict(Verdict::accept(approved))).await {
            let failure = Failure::from(e).with_peer(peer_id).with_status(status);
            return self.fail(conn, direction, failure).await;
        }

        self.complete(conn, direction, peer_id, remote_verdict).await
    }

    // ---------------------------------------------------------------------
    // Handshake steps
    // ---------------------------------------------------------------------

    /// Challenge the remote and verify its response. Returns the verified key.
    async fn challenge_remote<C>(&self, conn: &mut C) -> Result<PublicKey, Failure>
    where
        C: Connection + ?Sized,
    {
        let challenge = self.issuer.issue()?;
        let _outstanding = Outstanding {
            issuer: &self.issuer,
            sequence: challenge.sequence,
        };
        self.send_frame(conn, Frame::Challenge(challenge.clone())).await?;

        let response = match self.recv_frame(conn).await? {
            Frame::Response(response) => response,
            other => {
                tracing::debug!(remote = %conn.remote_addr(), frame = other.kind(), "expected response");
                return Err(Failure::new(AuthReason::Malformed));
            }
        };
        let claimed_id = response.peer_id.clone();

        let claimed_key = match conn.remote_public_key() {
            Some(key) => key,
            None => PublicKey::from_peer_id(&response.peer_id)
                .map_err(|_| Failure::new(AuthReason::Malformed).with_peer(claimed_id.clone()))?,
        };

        let reason = verify_response_at(
            &challenge,
            &response,
            &claimed_key,
            Utc::now(),
            self.issuer.max_age(),
        );
        if !reason.is_ok() {
            return Err(Failure::new(reason.into()).with_peer(claimed_id));
        }
        if !self.issuer.redeem(&challenge) {
            return Err(Failure::new(AuthReason::Replayed).with_peer(claimed_id));
        }

        tracing::debug!(remote = %conn.remote_addr(), peer_id = %claimed_id, "remote proved key possession");
        Ok(claimed_key)
    }

    /// Sign the remote's challenge and wait for its verdict on us.
    async fn answer_remote<C>(&self, conn: &mut C) -> Result<Verdict, Failure>
    where
        C: Connection + ?Sized,
    {
        let challenge: Challenge = match self.recv_frame(conn).await? {
            Frame::Challenge(challenge) => challenge,
            other => {
                tracing::debug!(remote = %conn.remote_addr(), frame = other.kind(), "expected challenge");
                return Err(Failure::new(AuthReason::Malformed));
            }
        };

        let response = build_response(&self.identity, &challenge);
        self.send_frame(conn, Frame::Response(response)).await?;

        match self.recv_frame(conn).await? {
            Frame::Verdict(verdict) => {
                tracing::debug!(
                    remote = %conn.remote_addr(),
                    approved = verdict.approved,
                    "remote accepted our response"
                );
                Ok(verdict)
            }
            other => {
                tracing::debug!(remote = %conn.remote_addr(), frame = other.kind(), "expected verdict");
                Err(Failure::new(AuthReason::Malformed))
            }
        }
    }

    /// Both sides verified. Apply the remote's approval and report.
    ///
    /// A block that lands while the handshake is in flight still wins.
    async fn complete<C>(
        &self,
        conn: &mut C,
        direction: Direction,
        peer_id: PeerId,
        remote_verdict: Verdict,
    ) -> AuthOutcome
    where
        C: Connection + ?Sized,
    {
        let status = if remote_verdict.approved {
            match self.store.peer_approved(&peer_id) {
                Ok(status) => status,
                Err(e) => {
                    tracing::error!(peer_id = %peer_id, error = %e, "failed to record peer approval");
                    self.store.status(&peer_id)
                }
            }
        } else {
            self.store.status(&peer_id)
        };

        if status == Some(TrustStatus::Blocked) {
            let failure = Failure::new(AuthReason::Blocked)
                .with_peer(peer_id)
                .with_status(status);
            return self.fail(conn, direction, failure).await;
        }

        tracing::info!(
            direction = %direction,
            remote = %conn.remote_addr(),
            peer_id = %peer_id,
            status = ?status,
            "handshake complete"
        );
        AuthOutcome::accepted(peer_id, status)
    }

    async fn fail<C>(&self, conn: &mut C, direction: Direction, failure: Failure) -> AuthOutcome
    where
        C: Connection + ?Sized,
    {
        let remote_addr = conn.remote_addr();
        if failure.reason.counts_as_failure() {
            self.limiter.record_failure(&conn.remote_host());
        }
        if failure.reason.notify_remote() {
            // Best effort; the connection is going away regardless.
            let _ = self
                .send_frame(conn, Frame::Verdict(Verdict::reject(failure.reason.as_str())))
                .await;
        }
        conn.close().await;

        tracing::warn!(
            direction = %direction,
            remote = %remote_addr,
            peer_id = ?failure.peer_id.as_ref().map(|p| p.as_str()),
            reason = %failure.reason,
            "handshake failed"
        );
        AuthOutcome {
            accepted: false,
            peer_id: failure.peer_id,
            reason: failure.reason,
            status: failure.status,
        }
    }

    // ---------------------------------------------------------------------
    // Framing
    // ---------------------------------------------------------------------

    async fn send_frame<C>(&self, conn: &mut C, frame: Frame) -> Result<(), AuthError>
    where
        C: Connection + ?Sized,
    {
        let bytes = frame.encode()?;
        match tokio::time::timeout(self.config.handshake_timeout(), conn.send(bytes)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Connection("send timed out".into())),
        }
    }

    /// Receive the next frame. A reject verdict from the remote ends the
    /// handshake wherever it arrives.
    async fn recv_frame<C>(&self, conn: &mut C) -> Result<Frame, Failure>
    where
        C: Connection + ?Sized,
    {
        let bytes = match tokio::time::timeout(self.config.handshake_timeout(), conn.recv()).await {
            Err(_) => return Err(Failure::new(AuthReason::Timeout)),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(None)) => return Err(Failure::new(AuthReason::Closed)),
            Ok(Ok(Some(bytes))) => bytes,
        };
        match Frame::decode(&bytes) {
            Ok(Frame::Verdict(verdict)) if !verdict.accepted => {
                tracing::debug!(
                    remote = %conn.remote_addr(),
                    reason = verdict.reason.as_deref().unwrap_or("unspecified"),
                    "remote rejected handshake"
                );
                Err(Failure::new(AuthReason::Rejected))
            }
            Ok(frame) => Ok(frame),
            Err(_) => Err(Failure::new(AuthReason::Malformed)),
        }
    }
}
