//! Integration test: challenge exchange, handshake, and operator decisions.
//!
//! Walks a peer from first contact through approval and block, checking the
//! forwarding answer at every step.

use std::time::Duration;

use chrono::Utc;
use meshtrust_auth::{
    build_response, verify_response_at, AuthReason, ChallengeIssuer, ForwardingGate, VerifyReason,
};
use meshtrust_core::TrustStatus;
use meshtrust_integration_tests::{handshake, TestPeer};
use std::sync::Arc;

const MAX_AGE: Duration = Duration::from_secs(30);

// =========================================================================
// Challenge timing against the store
// =========================================================================

#[test]
fn test_late_response_expires_and_leaves_store_untouched() {
    let alice = TestPeer::ephemeral();
    let bob = TestPeer::ephemeral();
    let issuer = ChallengeIssuer::new(MAX_AGE);

    let t = Utc::now();
    let challenge = issuer.issue_at(t).unwrap();
    let response = build_response(&bob.identity, &challenge);

    let late = t + chrono::Duration::seconds(31);
    let reason = verify_response_at(&challenge, &response, &bob.identity.public_key(), late, MAX_AGE);
    assert_eq!(reason, VerifyReason::Expired);
    assert!(alice.store.get(&bob.id()).is_none());
}

#[test]
fn test_timely_response_registers_pending_inbound() {
    let alice = TestPeer::ephemeral();
    let bob = TestPeer::ephemeral();
    let issuer = ChallengeIssuer::new(MAX_AGE);

    let t = Utc::now();
    let challenge = issuer.issue_at(t).unwrap();
    let response = build_response(&bob.identity, &challenge);

    let reason = verify_response_at(
        &challenge,
        &response,
        &bob.identity.public_key(),
        t + chrono::Duration::seconds(5),
        MAX_AGE,
    );
    assert_eq!(reason, VerifyReason::Ok);

    let record = alice.store.record_handshake(bob.public_key(), Utc::now()).unwrap();
    assert_eq!(record.status, TrustStatus::PendingInbound);
    assert!(!alice.engine.is_authorized_to_forward(&bob.id()));
}

// =========================================================================
// Full lifecycle over the handshake engine
// =========================================================================

#[tokio::test]
async fn test_unknown_to_authorized_to_blocked() {
    let alice = TestPeer::ephemeral();
    let bob = TestPeer::ephemeral();

    // Unknown
    assert!(alice.store.get(&bob.id()).is_none());
    assert!(!alice.engine.is_authorized_to_forward(&bob.id()));

    // First handshake: PendingInbound, still not forwarding
    let (inbound, outbound) = handshake(&alice, &bob).await;
    assert!(inbound.accepted && outbound.accepted);
    assert_eq!(inbound.status, Some(TrustStatus::PendingInbound));
    assert!(!alice.engine.is_authorized_to_forward(&bob.id()));
    assert_eq!(alice.store.pending_inbound().len(), 1);

    // Operator approval
    alice.store.approve(&bob.id()).unwrap();
    assert!(alice.engine.is_authorized_to_forward(&bob.id()));

    // Operator block takes effect on the next query
    alice.store.block(&bob.id()).unwrap();
    assert!(!alice.engine.is_authorized_to_forward(&bob.id()));

    // A fresh handshake cannot undo the block
    let (inbound, outbound) = handshake(&alice, &bob).await;
    assert_eq!(inbound.reason, AuthReason::Blocked);
    assert_eq!(outbound.reason, AuthReason::Rejected);
    assert_eq!(alice.store.status(&bob.id()), Some(TrustStatus::Blocked));
}

#[tokio::test]
async fn test_mutual_add_authorizes_both_sides() {
    let alice = TestPeer::ephemeral();
    let bob = TestPeer::ephemeral();
    alice
        .store
        .add_pending_outbound(&bob.id(), bob.public_key(), Some("bob".into()))
        .unwrap();
    bob.store
        .add_pending_outbound(&alice.id(), alice.public_key(), Some("alice".into()))
        .unwrap();
    assert!(!alice.engine.is_authorized_to_forward(&bob.id()));

    handshake(&alice, &bob).await;
    assert_eq!(alice.store.status(&bob.id()), Some(TrustStatus::Authorized));
    assert_eq!(bob.store.status(&alice.id()), Some(TrustStatus::Authorized));
    assert_eq!(alice.store.get(&bob.id()).unwrap().display_name, "bob");
}

#[tokio::test]
async fn test_unblock_requires_fresh_approval() {
    let alice = TestPeer::ephemeral();
    let bob = TestPeer::ephemeral();
    handshake(&alice, &bob).await;
    alice.store.approve(&bob.id()).unwrap();
    alice.store.block(&bob.id()).unwrap();
    alice.store.unblock(&bob.id()).unwrap();

    let (inbound, _) = handshake(&alice, &bob).await;
    assert!(inbound.accepted);
    assert_eq!(inbound.status, Some(TrustStatus::PendingInbound));
    assert!(!alice.engine.is_authorized_to_forward(&bob.id()));
}

#[tokio::test]
async fn test_gate_tracks_operator_decisions() {
    let alice = TestPeer::ephemeral();
    let bob = TestPeer::ephemeral();
    handshake(&alice, &bob).await;
    alice
        .store
        .assign_address(&bob.id(), Some("10.66.0.9".parse().unwrap()))
        .unwrap();

    let gate = ForwardingGate::new(alice.store.clone(), alice.engine.clone());
    let mut packet = vec![0u8; 20];
    packet[0] = 0x45;
    packet[16..20].copy_from_slice(&[10, 66, 0, 9]);

    assert!(!gate.should_forward_packet(&packet).allow);
    alice.store.approve(&bob.id()).unwrap();
    let decision = gate.should_forward_packet(&packet);
    assert!(decision.allow);
    assert_eq!(decision.peer_id, Some(bob.id()));
    alice.store.block(&bob.id()).unwrap();
    assert!(!gate.should_forward_packet(&packet).allow);

    // Unassigned destinations never forward.
    packet[19] = 10;
    assert!(!gate.should_forward_packet(&packet).allow);
}

#[tokio::test]
async fn test_concurrent_block_during_handshakes() {
    let alice = Arc::new(TestPeer::ephemeral());
    let bob = Arc::new(TestPeer::ephemeral());
    handshake(&alice, &bob).await;
    alice.store.approve(&bob.id()).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let (a, b) = (alice.clone(), bob.clone());
        tasks.push(tokio::spawn(async move {
            handshake(&a, &b).await;
        }));
    }
    alice.store.block(&bob.id()).unwrap();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(alice.store.status(&bob.id()), Some(TrustStatus::Blocked));
    assert!(!alice.engine.is_authorized_to_forward(&bob.id()));
}
