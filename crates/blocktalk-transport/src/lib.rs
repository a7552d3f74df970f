//! Connection layer for BlockTalk.
//!
//! [`PeerConnectionManager`] owns every TCP stream a node has open. Each
//! stream gets a read task that turns frames into [`Envelope`]s and
//! pushes them onto a single event channel, so the owner of the manager
//! sees one ordered stream of [`ConnectionEvent`]s no matter how many
//! peers are connected.
//!
//! Connections are referred to by [`ConnectionId`] only. Nothing outside
//! this crate holds a socket.

mod error;
mod manager;

pub use error::TransportError;
pub use manager::PeerConnectionManager;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use blocktalk_protocol::Envelope;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Mints the next process-wide id.
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How bodies on a connection are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    /// Plaintext frames. Used for the directory.
    Server,
    /// Every body is encrypted with the room key. Used between peers.
    Peer,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Peer => f.write_str("peer"),
        }
    }
}

/// What the manager reports to its owner.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A new inbound connection was accepted.
    Accepted {
        id: ConnectionId,
        remote: std::net::SocketAddr,
    },
    /// A frame arrived and was decoded (and decrypted, in peer mode).
    Received { id: ConnectionId, envelope: Envelope },
    /// The connection is gone. `error` is `None` on a clean EOF.
    ///
    /// Emitted at most once per connection, and never for a connection
    /// the owner closed itself.
    Closed {
        id: ConnectionId,
        error: Option<TransportError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_connection_mode_display() {
        assert_eq!(ConnectionMode::Server.to_string(), "server");
        assert_eq!(ConnectionMode::Peer.to_string(), "peer");
    }

    #[test]
    fn test_accept_failed_keeps_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::Other, "too many open files");
        let err = TransportError::AcceptFailed(io);
        assert!(err.to_string().contains("too many open files"));
        assert!(err.source().is_some());
    }
}
