//! Narrow connection capability the auth engine runs on.

use std::net::SocketAddr;

use async_trait::async_trait;
use meshtrust_crypto::PublicKey;
use tokio::sync::mpsc;

use crate::error::AuthError;

/// An established, identity-unverified connection to a remote party.
///
/// Transports implement this so the auth engine never depends on a concrete
/// socket type.
#[async_trait]
pub trait Connection: Send {
    /// Send one frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), AuthError>;

    /// Receive one frame. `Ok(None)` means the remote closed the connection.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, AuthError>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&mut self);

    /// The remote's public key as established by the transport, if it has one.
    fn remote_public_key(&self) -> Option<PublicKey>;

    /// Remote address for logs.
    fn remote_addr(&self) -> String;

    /// Remote host without the port. Failure budgets are kept per host, so
    /// reconnecting from a fresh source port does not reset them.
    fn remote_host(&self) -> String {
        let addr = self.remote_addr();
        match addr.parse::<SocketAddr>() {
            Ok(socket) => socket.ip().to_string(),
            Err(_) => addr,
        }
    }
}

/// In-process connection over a pair of channels.
pub struct MemoryConnection {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
    remote_addr: String,
    remote_key: Option<PublicKey>,
}

impl MemoryConnection {
    /// Two connected ends. `a` sees `b_addr` as its remote, and vice versa.
    pub fn pair(a_addr: &str, b_addr: &str) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(16);
        let (b_tx, a_rx) = mpsc::channel(16);
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
                remote_addr: b_addr.to_string(),
                remote_key: None,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
                remote_addr: a_addr.to_string(),
                remote_key: None,
            },
        )
    }

    /// Pretend the transport authenticated the remote with `key`.
    pub fn with_remote_key(mut self, key: PublicKey) -> Self {
        self.remote_key = Some(key);
        self
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), AuthError> {
        let tx = self.tx.as_ref().ok_or(AuthError::Closed)?;
        tx.send(frame).await.map_err(|_| AuthError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, AuthError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }

    fn remote_public_key(&self) -> Option<PublicKey> {
        self.remote_key
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }
}
