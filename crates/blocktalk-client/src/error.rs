//! Error types for the client layer.

use blocktalk_transport::TransportError;

/// Errors returned by [`crate::ClientHandle`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The display name is empty or contains whitespace.
    #[error("invalid display name {0:?}")]
    InvalidName(String),

    /// Binding the peer listener failed.
    #[error("failed to bind peer listener: {0}")]
    Bind(#[source] std::io::Error),

    /// `join_room` while already in a room.
    #[error("already in a room")]
    AlreadyJoined,

    /// The operation needs a room and there is none.
    #[error("not in a room")]
    NotJoined,

    /// A connection could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The client's command channel is closed.
    #[error("client is unavailable")]
    Unavailable,
}
