//! Integration test: identity and trust decisions survive a restart.

use meshtrust_core::TrustStatus;
use meshtrust_crypto::Identity;
use meshtrust_integration_tests::{handshake, temp_dir, TestPeer};

#[tokio::test]
async fn test_decisions_survive_restart() {
    let dir = temp_dir("meshtrust-persist");
    let bob = TestPeer::ephemeral();
    let carol = TestPeer::ephemeral();

    let alice_id = {
        let alice = TestPeer::persistent(&dir);
        handshake(&alice, &bob).await;
        handshake(&alice, &carol).await;
        alice.store.approve(&bob.id()).unwrap();
        alice.store.reject(&carol.id()).unwrap();
        alice.id()
    };

    let alice = TestPeer::persistent(&dir);
    assert_eq!(alice.id(), alice_id);
    assert_eq!(alice.store.status(&bob.id()), Some(TrustStatus::Authorized));
    assert_eq!(alice.store.status(&carol.id()), Some(TrustStatus::Blocked));
    assert!(alice.engine.is_authorized_to_forward(&bob.id()));

    let order: Vec<_> = alice.store.list().into_iter().map(|r| r.peer_id).collect();
    assert_eq!(order, vec![bob.id(), carol.id()]);

    // Bob still authenticates against the restored identity.
    let (inbound, outbound) = handshake(&alice, &bob).await;
    assert!(inbound.accepted && outbound.accepted);
    assert_eq!(outbound.peer_id, Some(alice_id));

    drop(alice);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_identity_reset_makes_peer_a_stranger() {
    let dir = temp_dir("meshtrust-reset");
    let bob = TestPeer::ephemeral();

    let old_id = {
        let alice = TestPeer::persistent(&dir);
        handshake(&bob, &alice).await;
        bob.store.approve(&alice.id()).unwrap();
        alice.id()
    };

    assert!(Identity::reset(&dir.join("identity.key")).unwrap());
    let alice = TestPeer::persistent(&dir);
    assert_ne!(alice.id(), old_id);

    let (inbound, _) = handshake(&bob, &alice).await;
    assert_eq!(inbound.status, Some(TrustStatus::PendingInbound));
    assert!(!bob.engine.is_authorized_to_forward(&alice.id()));
    assert!(bob.engine.is_authorized_to_forward(&old_id));

    drop(alice);
    std::fs::remove_dir_all(&dir).ok();
}
