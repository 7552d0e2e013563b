//! Minimal relay client.
//!
//! Speaks the same framed JSON envelopes as the server. A background task
//! reads and decodes frames into a queue, so [`RelayClient::recv_timeout`]
//! never loses a partially read frame. Connection state is published through
//! a [`watch`] channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::codec::{CodecError, Envelope, decode_envelope, encode_envelope};
use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};

/// Envelopes buffered before the reader task waits for the caller.
const INBOUND_QUEUE: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing.
    Connecting,
    /// Connected and reading.
    Connected,
    /// Closed by either side.
    Disconnected,
}

/// Observable [`ConnectionState`].
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Starts as [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Publish a new state.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Current state.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Client-side failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Framing or socket error.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Envelope could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The server closed the connection.
    #[error("connection closed")]
    Closed,
}

/// A connection to a relay server.
pub struct RelayClient {
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Envelope>,
    state: Arc<ConnectionStateWatch>,
    frame: FrameConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayClient {
    /// Connect with the default frame limit.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        Self::connect_with(addr, FrameConfig::default()).await
    }

    /// Connect and start the reader task.
    pub async fn connect_with(addr: SocketAddr, frame: FrameConfig) -> std::io::Result<Self> {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                state.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        stream.set_nodelay(true)?;
        state.set(ConnectionState::Connected);

        let (reader, writer) = stream.into_split();
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reader_state = Arc::clone(&state);
        tokio::spawn(async move {
            Self::read_loop(reader, frame, inbound_tx, &reader_state, shutdown_rx).await;
        });

        Ok(Self {
            writer,
            inbound,
            state,
            frame,
            shutdown_tx,
        })
    }

    /// Connection state.
    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Send one event.
    pub async fn send(&mut self, event: &str, data: Value) -> Result<(), ClientError> {
        let payload = encode_envelope(&Envelope::new(event, data))?;
        write_frame(&mut self.writer, &payload, &self.frame).await?;
        Ok(())
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Result<Envelope, ClientError> {
        self.inbound.recv().await.ok_or(ClientError::Closed)
    }

    /// Wait up to `timeout` for the next event. `Ok(None)` if none arrived.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Envelope>, ClientError> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => Err(ClientError::Closed),
            Err(_) => Ok(None),
        }
    }

    /// Close the write side and stop reading.
    pub async fn close(mut self) -> Result<(), ClientError> {
        let _ = self.shutdown_tx.send(true);
        self.writer.shutdown().await.map_err(FrameError::from)?;
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        frame: FrameConfig,
        inbound: mpsc::Sender<Envelope>,
        state: &ConnectionStateWatch,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                result = read_frame(&mut reader, &frame) => {
                    let payload = match result {
                        Ok(payload) => payload,
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            tracing::debug!("Relay connection lost: {e}");
                            break;
                        }
                    };
                    if payload.is_empty() {
                        continue;
                    }
                    match decode_envelope(&payload) {
                        Ok(envelope) => {
                            if inbound.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring undecodable frame: {e}"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        state.set(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Accepts one connection and echoes every frame back.
    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let config = FrameConfig::default();
            while let Ok(payload) = read_frame(&mut stream, &config).await {
                if write_frame(&mut stream, &payload, &config).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[test]
    fn test_state_starts_disconnected() {
        assert_eq!(
            ConnectionStateWatch::new().current(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let addr = echo_server().await;
        let mut client = RelayClient::connect(addr).await.unwrap();
        assert_eq!(client.state().current(), ConnectionState::Connected);

        client
            .send("player-update", json!({ "x": 1 }))
            .await
            .unwrap();
        let envelope = client.recv().await.unwrap();
        assert_eq!(envelope, Envelope::new("player-update", json!({ "x": 1 })));
    }

    #[tokio::test]
    async fn test_recv_timeout_without_traffic() {
        let addr = echo_server().await;
        let mut client = RelayClient::connect(addr).await.unwrap();
        let got = client
            .recv_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_server_close_is_observed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut client = RelayClient::connect(addr).await.unwrap();
        let mut state = client.state().subscribe();
        assert!(matches!(client.recv().await, Err(ClientError::Closed)));
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_is_clean() {
        let addr = echo_server().await;
        let client = RelayClient::connect(addr).await.unwrap();
        let state = Arc::clone(client.state());
        client.close().await.unwrap();
        assert_eq!(state.current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(RelayClient::connect(addr).await.is_err());
    }
}
