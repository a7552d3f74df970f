//! The connection registry and its per-connection read tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use blocktalk_crypto::EncryptionEngine;
use blocktalk_protocol::{Envelope, RawFrame, WireCodec};
use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::{ConnectionEvent, ConnectionId, ConnectionMode, TransportError};

/// Pause after a failed `accept` so a persistent error (such as running
/// out of file descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type Writer = Arc<Mutex<FramedWrite<OwnedWriteHalf, WireCodec>>>;

/// One live connection.
struct ConnectionEntry {
    remote: SocketAddr,
    mode: ConnectionMode,
    writer: Writer,
    reader: JoinHandle<()>,
}

struct Inner {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    engine: RwLock<Option<EncryptionEngine>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    acceptors: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns every connection of one node.
///
/// Cheap to clone; clones share the same registry. Whoever removes a
/// connection from the registry is the one who reports it, which keeps
/// `Closed` events exactly-once even when a read failure and a write
/// failure race each other.
#[derive(Clone)]
pub struct PeerConnectionManager {
    inner: Arc<Inner>,
}

impl PeerConnectionManager {
    /// Creates an empty manager and the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(Inner {
                connections: Mutex::new(HashMap::new()),
                engine: RwLock::new(None),
                events,
                acceptors: Mutex::new(Vec::new()),
            }),
        };
        (manager, rx)
    }

    /// Installs the room key used by every [`ConnectionMode::Peer`]
    /// connection, existing ones included.
    pub async fn set_engine(&self, engine: EncryptionEngine) {
        *self.inner.engine.write().await = Some(engine);
    }

    /// Spawns an accept loop on `listener`. Accepted connections use
    /// `mode` and are announced with [`ConnectionEvent::Accepted`].
    pub async fn listen(&self, listener: TcpListener, mode: ConnectionMode) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let id = manager.register(stream, remote, mode, true).await;
                        tracing::debug!(%id, %remote, %mode, "accepted connection");
                    }
                    Err(source) => {
                        let e = TransportError::AcceptFailed(source);
                        tracing::warn!(error = %e, "accept failed, backing off");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        });
        self.inner.acceptors.lock().await.push(handle);
    }

    /// Opens an outbound connection and starts reading from it.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        mode: ConnectionMode,
    ) -> Result<ConnectionId, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::ConnectFailed { addr, source })?;
        let id = self.register(stream, addr, mode, false).await;
        tracing::debug!(%id, %addr, %mode, "connected");
        Ok(id)
    }

    /// Sends one envelope, sealing it first on peer connections.
    ///
    /// A write failure drops the connection: the caller gets the error
    /// and the event channel gets [`ConnectionEvent::Closed`].
    pub async fn send(&self, id: ConnectionId, envelope: &Envelope) -> Result<(), TransportError> {
        let (writer, mode) = {
            let connections = self.inner.connections.lock().await;
            let entry = connections
                .get(&id)
                .ok_or(TransportError::UnknownConnection(id))?;
            (Arc::clone(&entry.writer), entry.mode)
        };

        let frame = match mode {
            ConnectionMode::Server => envelope.to_frame(),
            ConnectionMode::Peer => {
                let engine = self.inner.engine.read().await;
                let engine = engine.as_ref().ok_or(TransportError::NoEngine)?;
                engine.seal(envelope)?.to_frame()
            }
        };

        let result = writer.lock().await.send(frame).await;
        if let Err(source) = result {
            tracing::warn!(%id, error = %source, "send failed, dropping connection");
            let reason = format!("send failed: {source}");
            self.drop_connection(id, Some(TransportError::ConnectionClosed(reason)))
                .await;
            return Err(TransportError::SendFailed { id, source });
        }
        tracing::trace!(%id, kind = envelope.message.label(), "sent");
        Ok(())
    }

    /// Closes a connection. No `Closed` event is emitted for it.
    ///
    /// Closing an unknown or already-closed id is a no-op.
    pub async fn close(&self, id: ConnectionId) {
        let entry = self.inner.connections.lock().await.remove(&id);
        if let Some(entry) = entry {
            entry.reader.abort();
            let mut writer = entry.writer.lock().await;
            let _ = SinkExt::<RawFrame>::close(&mut *writer).await;
            tracing::debug!(%id, remote = %entry.remote, "closed connection");
        }
    }

    /// Closes every connection and stops every accept loop.
    pub async fn shutdown(&self) {
        for handle in self.inner.acceptors.lock().await.drain(..) {
            handle.abort();
        }
        let ids: Vec<_> = self.inner.connections.lock().await.keys().copied().collect();
        for id in ids {
            self.close(id).await;
        }
    }

    /// The address at the other end of `id`.
    pub async fn remote_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.inner.connections.lock().await.get(&id).map(|e| e.remote)
    }

    /// The mode `id` was opened with.
    pub async fn mode(&self, id: ConnectionId) -> Option<ConnectionMode> {
        self.inner.connections.lock().await.get(&id).map(|e| e.mode)
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.inner.connections.lock().await.len()
    }

    /// Returns `true` if there are no live connections.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn register(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
        mode: ConnectionMode,
        announce: bool,
    ) -> ConnectionId {
        let id = ConnectionId::next();
        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, WireCodec::new());
        let writer = Arc::new(Mutex::new(FramedWrite::new(write_half, WireCodec::new())));

        // Hold the registry lock across the spawn so the read task cannot
        // finish and look for its entry before it exists.
        let mut connections = self.inner.connections.lock().await;
        if announce {
            // Sent before the read task exists so it precedes any Received.
            let _ = self
                .inner
                .events
                .send(ConnectionEvent::Accepted { id, remote });
        }
        let inner = Arc::clone(&self.inner);
        let reader = tokio::spawn(read_loop(id, mode, reader, inner));
        connections.insert(
            id,
            ConnectionEntry {
                remote,
                mode,
                writer,
                reader,
            },
        );
        id
    }

    async fn drop_connection(&self, id: ConnectionId, error: Option<TransportError>) {
        self.inner.drop_connection(id, error).await;
    }
}

impl Inner {
    async fn drop_connection(&self, id: ConnectionId, error: Option<TransportError>) {
        let entry = self.connections.lock().await.remove(&id);
        if let Some(entry) = entry {
            entry.reader.abort();
            let _ = self.events.send(ConnectionEvent::Closed { id, error });
        }
    }

    async fn decode(
        &self,
        mode: ConnectionMode,
        frame: &RawFrame,
    ) -> Result<Envelope, TransportError> {
        match mode {
            ConnectionMode::Server => Ok(Envelope::from_frame(frame)?),
            ConnectionMode::Peer => {
                let sealed = Envelope::from_sealed_frame(frame)?;
                let engine = self.engine.read().await;
                let engine = engine.as_ref().ok_or(TransportError::NoEngine)?;
                Ok(engine.open(&sealed)?)
            }
        }
    }
}

async fn read_loop(
    id: ConnectionId,
    mode: ConnectionMode,
    mut reader: FramedRead<OwnedReadHalf, WireCodec>,
    inner: Arc<Inner>,
) {
    let error = loop {
        let frame = match reader.next().await {
            None => break None,
            Some(Err(e)) => break Some(TransportError::from(e)),
            Some(Ok(frame)) => frame,
        };
        match inner.decode(mode, &frame).await {
            Ok(envelope) => {
                tracing::trace!(%id, kind = envelope.message.label(), "received");
                if inner
                    .events
                    .send(ConnectionEvent::Received { id, envelope })
                    .is_err()
                {
                    // Nobody is listening any more.
                    return;
                }
            }
            Err(e) => break Some(e),
        }
    };

    match &error {
        None => tracing::debug!(%id, "connection closed by remote"),
        Some(e) => tracing::warn!(%id, error = %e, "connection failed"),
    }

    // `drop_connection` aborts this task's own handle; that only takes
    // effect at the next await point, and there is none after it.
    inner.drop_connection(id, error).await;
}
