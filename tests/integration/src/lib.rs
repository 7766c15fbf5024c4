//! Shared harness for the meshtrust integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use meshtrust_auth::{AuthEngine, AuthOutcome, MemoryConnection};
use meshtrust_core::{AuthConfig, PeerId};
use meshtrust_crypto::Identity;
use meshtrust_store::TrustStore;

/// One node's identity, store, and engine.
pub struct TestPeer {
    pub identity: Arc<Identity>,
    pub store: Arc<TrustStore>,
    pub engine: Arc<AuthEngine>,
}

impl TestPeer {
    /// A peer with a fresh identity and an in-memory store.
    pub fn ephemeral() -> Self {
        Self::with_config(AuthConfig::default())
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let identity = Arc::new(Identity::generate().expect("identity"));
        Self::assemble(identity, Arc::new(TrustStore::in_memory()), config)
    }

    /// A peer whose identity and trust records live under `dir`.
    pub fn persistent(dir: &Path) -> Self {
        let identity = Arc::new(Identity::load_or_generate(&dir.join("identity.key")).expect("identity"));
        let store = Arc::new(TrustStore::open_rocksdb(&dir.join("trust")).expect("store"));
        Self::assemble(identity, store, AuthConfig::default())
    }

    fn assemble(identity: Arc<Identity>, store: Arc<TrustStore>, config: AuthConfig) -> Self {
        let engine = Arc::new(AuthEngine::new(identity.clone(), store.clone(), config));
        Self {
            identity,
            store,
            engine,
        }
    }

    pub fn id(&self) -> PeerId {
        self.identity.id().clone()
    }

    pub fn public_key(&self) -> [u8; 32] {
        *self.identity.public_key().as_bytes()
    }
}

/// Run a full handshake where `initiator` dials `acceptor`.
///
/// Returns `(acceptor outcome, initiator outcome)`.
pub async fn handshake(acceptor: &TestPeer, initiator: &TestPeer) -> (AuthOutcome, AuthOutcome) {
    let (mut accept_side, mut dial_side) = MemoryConnection::pair("192.0.2.1:7600", "192.0.2.2:7600");
    let engine = initiator.engine.clone();
    let dial = tokio::spawn(async move { engine.handle_outbound_handshake(&mut dial_side).await });
    let inbound = acceptor.engine.handle_inbound_handshake(&mut accept_side).await;
    let outbound = dial.await.expect("dial task");
    (inbound, outbound)
}

/// A unique scratch directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
