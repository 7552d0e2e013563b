//! TCP front end for the relay.
//!
//! Each accepted connection becomes one session. A reader task decodes
//! frames in order and hands them to [`Relay::on_event`]; a writer task
//! drains that session's bounded outbound queue. [`ConnectionMap`] holds the
//! queue senders and is the relay's [`Transport`], so delivery never waits on
//! a socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use pewpew_relay::{
    DeliveryError, IdentityGenerator, OutboundEvent, Relay, RelayOptions, SessionId, Transport,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::codec::{Envelope, decode_envelope, frame_envelope};
use crate::framing::{FrameConfig, FrameError, read_frame};
use crate::platform::{SocketConfig, configure_stream, create_listener, ipv4_bind_address};

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 5000;

/// Atomic source of monotonically increasing [`SessionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Start at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unused id.
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// The connection map is full.
#[derive(Debug, thiserror::Error)]
#[error("connection limit of {0} reached")]
pub struct ConnectionLimitReached(pub usize);

// ---------------------------------------------------------------------------
// ConnectionMap
// ---------------------------------------------------------------------------

/// Outbound queues of the live connections, keyed by session.
pub struct ConnectionMap {
    queues: DashMap<SessionId, mpsc::Sender<Bytes>>,
    max_connections: usize,
    frame: FrameConfig,
}

impl ConnectionMap {
    /// Create an empty map holding at most `max_connections` entries.
    pub fn new(max_connections: usize, frame: FrameConfig) -> Self {
        Self {
            queues: DashMap::new(),
            max_connections,
            frame,
        }
    }

    /// Register a connection's outbound queue.
    pub fn insert(
        &self,
        id: SessionId,
        queue: mpsc::Sender<Bytes>,
    ) -> Result<(), ConnectionLimitReached> {
        if self.queues.len() >= self.max_connections {
            return Err(ConnectionLimitReached(self.max_connections));
        }
        self.queues.insert(id, queue);
        Ok(())
    }

    /// Drop a connection's queue. Its writer drains what is left and exits.
    pub fn remove(&self, id: SessionId) -> Option<mpsc::Sender<Bytes>> {
        self.queues.remove(&id).map(|(_, queue)| queue)
    }

    /// Whether `id` has a live queue.
    pub fn contains(&self, id: SessionId) -> bool {
        self.queues.contains_key(&id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether there are no live connections.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    fn encode(&self, event: &OutboundEvent) -> Result<Bytes, String> {
        frame_envelope(&Envelope::from(event), &self.frame).map_err(|e| e.to_string())
    }

    /// Queue an already framed event for `session`.
    fn enqueue(&self, session: SessionId, frame: Bytes) -> Result<(), DeliveryError> {
        let queue = self
            .queues
            .get(&session)
            .ok_or(DeliveryError::Disconnected(session))?;

        queue.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull(session),
            TrySendError::Closed(_) => DeliveryError::Disconnected(session),
        })
    }
}

impl Transport for ConnectionMap {
    fn send_to(&self, session: SessionId, event: &OutboundEvent) -> Result<(), DeliveryError> {
        if !self.contains(session) {
            return Err(DeliveryError::Disconnected(session));
        }
        let frame = self
            .encode(event)
            .map_err(|reason| DeliveryError::Encode { session, reason })?;
        self.enqueue(session, frame)
    }

    /// Encodes `event` once; every queue gets a handle to the same buffer.
    fn send_to_all(&self, sessions: &[SessionId], event: &OutboundEvent) -> Vec<DeliveryError> {
        let frame = match self.encode(event) {
            Ok(frame) => frame,
            Err(reason) => {
                return sessions
                    .iter()
                    .map(|&session| DeliveryError::Encode {
                        session,
                        reason: reason.clone(),
                    })
                    .collect();
            }
        };
        sessions
            .iter()
            .filter_map(|&session| self.enqueue(session, frame.clone()).err())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Settings for [`RelayServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on. Default: `0.0.0.0:5000`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. Default: 256.
    pub max_connections: usize,
    /// Frames buffered per connection before sends to it fail. Default: 256.
    pub outbound_queue: usize,
    /// Frame size limit.
    pub frame: FrameConfig,
    /// Per-socket options.
    pub socket: SocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ipv4_bind_address(DEFAULT_PORT),
            max_connections: 256,
            outbound_queue: 256,
            frame: FrameConfig::default(),
            socket: SocketConfig::default(),
        }
    }
}

/// Accepts connections and feeds their events into a [`Relay`].
pub struct RelayServer {
    config: ServerConfig,
    relay: Arc<Relay>,
    /// Live connections (public for test inspection).
    pub connections: Arc<ConnectionMap>,
    id_gen: IdGenerator,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RelayServer {
    /// Build a relay delivering through a fresh [`ConnectionMap`] and a
    /// server in front of it.
    pub fn new(
        config: ServerConfig,
        ids: Arc<dyn IdentityGenerator>,
        options: RelayOptions,
    ) -> Self {
        let connections = Arc::new(ConnectionMap::new(config.max_connections, config.frame));
        let relay = Arc::new(Relay::new(connections.clone(), ids, options));
        Self::with_relay(config, relay, connections)
    }

    /// Serve an existing relay. `connections` must be the relay's transport.
    pub fn with_relay(
        config: ServerConfig,
        relay: Arc<Relay>,
        connections: Arc<ConnectionMap>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            relay,
            connections,
            id_gen: IdGenerator::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// The relay this server feeds.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Bind the configured address with the configured socket options.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        create_listener(self.config.bind_addr, &self.config.socket).await
    }

    /// Bind the configured address and serve until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = self.bind().await?;
        tracing::info!("Relay listening on {}", listener.local_addr()?);
        self.run_with_listener(listener).await
    }

    /// Serve on a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = configure_stream(&stream, &self.config.socket) {
                        tracing::warn!("Could not configure socket for {peer_addr}: {e}");
                    }

                    let id = self.id_gen.next_id();
                    let (queue_tx, queue_rx) = mpsc::channel(self.config.outbound_queue.max(1));
                    if let Err(e) = self.connections.insert(id, queue_tx) {
                        tracing::warn!("Rejecting {peer_addr}: {e}");
                        continue;
                    }

                    tracing::info!("Accepted connection {id} from {peer_addr}");

                    let (reader, writer) = stream.into_split();
                    let connection = Connection {
                        id,
                        relay: Arc::clone(&self.relay),
                        connections: Arc::clone(&self.connections),
                        frame: self.config.frame,
                        shutdown_rx: self.shutdown_rx.clone(),
                    };
                    tokio::spawn(connection.serve(reader, writer, queue_rx));
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Relay shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Per-connection task state.
struct Connection {
    id: SessionId,
    relay: Arc<Relay>,
    connections: Arc<ConnectionMap>,
    frame: FrameConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl Connection {
    async fn serve(
        mut self,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        outbound: mpsc::Receiver<Bytes>,
    ) {
        let id = self.id;
        if self.relay.on_connect(id).await.is_err() {
            self.connections.remove(id);
            return;
        }

        let writer_task = tokio::spawn(write_loop(id, writer, outbound));
        self.read_loop(reader).await;

        self.relay.on_disconnect(id).await;
        self.connections.remove(id);
        let _ = writer_task.await;
        tracing::info!("Connection {id} closed");
    }

    /// Decode frames in arrival order until the peer leaves, a frame is bad,
    /// or the server shuts down.
    async fn read_loop(&mut self, mut reader: OwnedReadHalf) {
        let id = self.id;
        loop {
            tokio::select! {
                frame = read_frame(&mut reader, &self.frame) => {
                    let payload = match frame {
                        Ok(payload) => payload,
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            tracing::warn!("Closing connection {id}: {e}");
                            break;
                        }
                    };
                    if payload.is_empty() {
                        continue;
                    }
                    match decode_envelope(&payload) {
                        Ok(envelope) => {
                            tracing::trace!("Connection {id} sent {}", envelope.event);
                            self.relay.on_event(id, &envelope.event, envelope.data).await;
                        }
                        Err(e) => {
                            tracing::warn!("Closing connection {id}: {e}");
                            break;
                        }
                    }
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Write queued frames until the queue is closed and empty.
async fn write_loop(id: SessionId, mut writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<Bytes>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!("Write to connection {id} failed: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pewpew_relay::{OutboundEvent, UuidGenerator};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn start_test_server(max_connections: usize) -> (SocketAddr, Arc<RelayServer>) {
        let config = ServerConfig {
            max_connections,
            ..ServerConfig::default()
        };
        let server = Arc::new(RelayServer::new(
            config,
            Arc::new(UuidGenerator),
            RelayOptions::default(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });
        (addr, server)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_session_ids_are_sequential() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next_id(), SessionId(1));
        assert_eq!(ids.next_id(), SessionId(2));
        assert_eq!(ids.next_id(), SessionId(3));
    }

    #[test]
    fn test_connection_map_capacity() {
        let map = ConnectionMap::new(1, FrameConfig::default());
        let (tx, _rx) = mpsc::channel(1);
        map.insert(SessionId(1), tx.clone()).unwrap();
        assert!(map.insert(SessionId(2), tx).is_err());
        assert_eq!(map.len(), 1);

        map.remove(SessionId(1));
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_queues_a_frame() {
        let map = ConnectionMap::new(4, FrameConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        map.insert(SessionId(1), tx).unwrap();

        let event = OutboundEvent::reply("hello-reply", json!({ "message": "hello, x" }));
        map.send_to(SessionId(1), &event).unwrap();

        let frame = rx.recv().await.unwrap();
        let envelope = decode_envelope(&frame[crate::framing::LENGTH_PREFIX..]).unwrap();
        assert_eq!(envelope.event, "hello-reply");
        assert_eq!(envelope.data["message"], "hello, x");
    }

    #[test]
    fn test_send_to_failures() {
        let map = ConnectionMap::new(4, FrameConfig::default());
        let event = OutboundEvent::reply("hello-reply", json!(null));

        assert_eq!(
            map.send_to(SessionId(9), &event),
            Err(DeliveryError::Disconnected(SessionId(9)))
        );

        let (tx, rx) = mpsc::channel(1);
        map.insert(SessionId(1), tx).unwrap();
        map.send_to(SessionId(1), &event).unwrap();
        assert_eq!(
            map.send_to(SessionId(1), &event),
            Err(DeliveryError::QueueFull(SessionId(1)))
        );

        drop(rx);
        assert_eq!(
            map.send_to(SessionId(1), &event),
            Err(DeliveryError::Disconnected(SessionId(1)))
        );
    }

    #[test]
    fn test_fanout_shares_one_frame() {
        let map = ConnectionMap::new(4, FrameConfig::default());
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        map.insert(SessionId(1), tx1).unwrap();
        map.insert(SessionId(2), tx2).unwrap();

        let event = OutboundEvent::reply("hello-reply", json!({ "message": "hi" }));
        let failures = map.send_to_all(&[SessionId(1), SessionId(2), SessionId(3)], &event);
        assert_eq!(failures, vec![DeliveryError::Disconnected(SessionId(3))]);

        let first = rx1.try_recv().unwrap();
        let second = rx2.try_recv().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_ptr(), second.as_ptr(), "frame was encoded twice");
    }

    #[test]
    fn test_fanout_encode_failure_reported_per_recipient() {
        let map = ConnectionMap::new(4, FrameConfig { max_payload_size: 8 });
        let (tx, mut rx) = mpsc::channel(1);
        map.insert(SessionId(1), tx).unwrap();

        let event = OutboundEvent::reply("hello-reply", json!({ "message": "too long" }));
        let failures = map.send_to_all(&[SessionId(1), SessionId(2)], &event);
        assert_eq!(failures.len(), 2);
        assert!(
            failures
                .iter()
                .all(|e| matches!(e, DeliveryError::Encode { .. }))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_oversized_event_is_an_encode_failure() {
        let map = ConnectionMap::new(4, FrameConfig { max_payload_size: 8 });
        let (tx, _rx) = mpsc::channel(1);
        map.insert(SessionId(1), tx).unwrap();

        let event = OutboundEvent::reply("hello-reply", json!({ "message": "too long" }));
        assert!(matches!(
            map.send_to(SessionId(1), &event),
            Err(DeliveryError::Encode { .. })
        ));
    }

    #[tokio::test]
    async fn test_accepted_connection_becomes_session() {
        let (addr, server) = start_test_server(16).await;
        let _stream = TcpStream::connect(addr).await.unwrap();

        let relay = Arc::clone(server.relay());
        for _ in 0..100 {
            if relay.stats().await.sessions == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(relay.stats().await.sessions, 1);
        assert_eq!(server.connections.len(), 1);
    }

    #[tokio::test]
    async fn test_max_connections_enforced() {
        let (addr, server) = start_test_server(2).await;

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();
        wait_for(|| server.connections.len() == 2).await;

        let mut c3 = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(1), c3.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0, "third connection should be closed");
        assert_eq!(server.connections.len(), 2);
    }

    #[tokio::test]
    async fn test_peer_close_removes_connection() {
        let (addr, server) = start_test_server(16).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for(|| server.connections.len() == 1).await;

        drop(stream);
        wait_for(|| server.connections.is_empty()).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (addr, server) = start_test_server(16).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        wait_for(|| server.connections.len() == 1).await;

        server.shutdown();

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "client should see EOF after shutdown");
        wait_for(|| server.connections.is_empty()).await;
    }
}
