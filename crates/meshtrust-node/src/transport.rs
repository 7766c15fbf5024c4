//! Length-delimited TCP transport for handshake frames.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use meshtrust_auth::{AuthError, Connection};
use meshtrust_crypto::PublicKey;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// A TCP stream carrying length-prefixed frames.
///
/// Plain TCP establishes no peer identity, so `remote_public_key` is always
/// `None` and the handshake learns the claimed key from the response.
pub struct TcpConnection {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    remote_addr: String,
    closed: bool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> Self {
        let remote_addr = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LENGTH)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
            remote_addr,
            closed: false,
        }
    }

    pub async fn connect(addr: &str) -> Result<Self, AuthError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), AuthError> {
        if self.closed {
            return Err(AuthError::Closed);
        }
        self.framed.send(Bytes::from(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, AuthError> {
        if self.closed {
            return Ok(None);
        }
        match self.framed.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes.to_vec())),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = SinkExt::<Bytes>::close(&mut self.framed).await {
            tracing::debug!(remote = %self.remote_addr, error = %e, "error closing connection");
        }
    }

    fn remote_public_key(&self) -> Option<PublicKey> {
        None
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpConnection, TcpConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (dialed, accepted) = tokio::join!(TcpConnection::connect(&addr), listener.accept());
        (dialed.unwrap(), TcpConnection::new(accepted.unwrap().0))
    }

    #[tokio::test]
    async fn test_frames_round_trip_over_tcp() {
        let (mut a, mut b) = pair().await;
        a.send(b"hello".to_vec()).await.unwrap();
        a.send(Vec::new()).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(b.recv().await.unwrap(), Some(Vec::new()));
        assert!(a.remote_public_key().is_none());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let (mut a, mut b) = pair().await;
        a.close().await;
        assert_eq!(b.recv().await.unwrap(), None);
        assert!(a.send(vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (raw, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut raw = raw.unwrap();
        let mut conn = TcpConnection::new(accepted.unwrap().0);

        let len = (MAX_FRAME_LENGTH as u32 + 1).to_be_bytes();
        raw.write_all(&len).await.unwrap();
        assert!(conn.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_failure_budget_spans_source_ports() {
        use meshtrust_auth::{AuthEngine, AuthReason};
        use meshtrust_core::AuthConfig;
        use meshtrust_crypto::Identity;
        use meshtrust_store::TrustStore;
        use std::sync::Arc;

        let config = AuthConfig {
            max_failures: 1,
            ..AuthConfig::default()
        };
        let engine = AuthEngine::new(
            Arc::new(Identity::generate().unwrap()),
            Arc::new(TrustStore::in_memory()),
            config,
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut ports = Vec::new();
        let mut reasons = Vec::new();
        for _ in 0..3 {
            let mut client = TcpConnection::connect(&addr).await.unwrap();
            let (stream, remote) = listener.accept().await.unwrap();
            ports.push(remote.port());
            let mut server = TcpConnection::new(stream);

            let garbage = async {
                let _ = client.recv().await;
                let _ = client.send(b"junk".to_vec()).await;
            };
            let (outcome, ()) = tokio::join!(engine.handle_inbound_handshake(&mut server), garbage);
            reasons.push(outcome.reason);
        }

        assert_ne!(ports[0], ports[1]);
        assert_eq!(
            reasons,
            vec![AuthReason::Malformed, AuthReason::Malformed, AuthReason::RateLimited]
        );
        assert_eq!(engine.limiter().failures("127.0.0.1"), 2);
    }
}
