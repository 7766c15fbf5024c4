//! The meshtrust node orchestrator.
//!
//! Opens the identity and trust store, accepts peer connections, dials the
//! configured peers, runs a handshake on every connection, and serves the
//! local admin API.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use meshtrust_auth::{AuthEngine, Connection, ForwardingGate, RoutingTable};
use meshtrust_crypto::Identity;
use meshtrust_store::TrustStore;

use crate::api::ApiState;
use crate::config::MeshtrustConfig;
use crate::transport::TcpConnection;

/// How often stale challenges and limiter entries are swept.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

pub struct MeshtrustNode {
    config: MeshtrustConfig,
    engine: Arc<AuthEngine>,
    store: Arc<TrustStore>,
    routes: Arc<RoutingTable>,
    gate: ForwardingGate,
    local_addr: Option<SocketAddr>,
    api_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MeshtrustNode {
    /// Open storage and identity from `config`.
    pub fn new(config: MeshtrustConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let identity = Arc::new(Identity::load_or_generate(&config.keypair_path())?);
        let store = Arc::new(TrustStore::open_rocksdb(&config.trust_db_path())?);
        Ok(Self::with_parts(config, identity, store))
    }

    /// Build a node around an existing identity and store.
    pub fn with_parts(config: MeshtrustConfig, identity: Arc<Identity>, store: Arc<TrustStore>) -> Self {
        let engine = Arc::new(AuthEngine::new(identity, store.clone(), config.auth.clone()));
        let routes = Arc::new(RoutingTable::new());
        let gate = ForwardingGate::new(routes.clone(), engine.clone());
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(
            peer_id = %engine.identity().id(),
            peers = store.len(),
            "meshtrust node created"
        );
        Self {
            config,
            engine,
            store,
            routes,
            gate,
            local_addr: None,
            api_addr: None,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Arc<AuthEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn gate(&self) -> &ForwardingGate {
        &self.gate
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Address the admin API is bound to, once started.
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api_addr
    }

    /// Bind the listener and start background tasks.
    pub async fn start(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_socket_addr()?).await?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        tracing::info!(%local_addr, "listening for peer connections");

        self.tasks.push(self.routes.clone().spawn_sync(self.store.clone()));
        self.tasks.push(self.spawn_accept_loop(listener));
        self.tasks.push(self.spawn_change_logger());
        self.tasks.push(self.spawn_maintenance());
        if self.config.api.enabled {
            let api_listener = TcpListener::bind(self.config.api_socket_addr()?).await?;
            self.api_addr = Some(api_listener.local_addr()?);
            self.tasks.push(self.spawn_api(api_listener));
        }
        for peer in self.config.network.peers.clone() {
            self.tasks.push(self.spawn_dialer(peer));
        }
        Ok(())
    }

    /// Wait until shutdown is requested.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Stop background tasks.
    pub async fn shutdown(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        tracing::info!("meshtrust node stopped");
        Ok(())
    }

    fn spawn_accept_loop(&self, listener: TcpListener) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            tracing::debug!(%remote, "inbound connection");
                            let engine = engine.clone();
                            tokio::spawn(async move {
                                let mut conn = TcpConnection::new(stream);
                                let outcome = engine.handle_inbound_handshake(&mut conn).await;
                                if outcome.accepted {
                                    // Session traffic is handled by the tunnel, not here.
                                    conn.close().await;
                                }
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    },
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("accept loop exited");
        })
    }

    fn spawn_dialer(&self, peer: String) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let interval = Duration::from_secs(self.config.network.redial_secs.max(1));
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match TcpConnection::connect(&peer).await {
                            Ok(mut conn) => {
                                let outcome = engine.handle_outbound_handshake(&mut conn).await;
                                if outcome.accepted {
                                    conn.close().await;
                                }
                            }
                            Err(e) => tracing::debug!(peer = %peer, error = %e, "dial failed"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_change_logger(&self) -> JoinHandle<()> {
        let mut changes = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => tracing::info!(
                        peer_id = %change.peer_id(),
                        forwarding = change.affects_forwarding(),
                        change = ?change,
                        "trust change"
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "trust change log lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_api(&self, listener: TcpListener) -> JoinHandle<()> {
        let state = Arc::new(ApiState {
            store: self.store.clone(),
            peer_id: self.engine.identity().id().clone(),
            start_time: Instant::now(),
        });
        tokio::spawn(async move {
            if let Err(e) = crate::api::serve(listener, state).await {
                tracing::error!(error = %e, "admin API error");
            }
        })
    }

    fn spawn_maintenance(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                ticker.tick().await;
                engine.maintenance();
            }
        })
    }
}
