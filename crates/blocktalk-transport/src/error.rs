use blocktalk_crypto::CryptoError;
use blocktalk_protocol::ProtocolError;

use crate::ConnectionId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Opening an outbound connection failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Writing a frame failed. The connection has been dropped.
    #[error("send on {id} failed: {source}")]
    SendFailed {
        id: ConnectionId,
        #[source]
        source: ProtocolError,
    },

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// No live connection has this id.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// An encrypted connection was used before a room key was installed.
    #[error("no room key installed")]
    NoEngine,

    /// A frame could not be split or parsed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A frame could not be decrypted.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
