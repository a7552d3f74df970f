//! Error types for the directory layer.

use std::net::SocketAddr;

use blocktalk_protocol::{ProtocolError, Uuid};

/// Errors raised by the relay or a backend.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Binding or accepting failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be split, parsed or written.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A backend closed its connection to the relay.
    #[error("replica {0} closed the connection")]
    ReplicaClosed(SocketAddr),

    /// Every backend has been pruned.
    #[error("no directory replicas available")]
    NoReplicas,

    /// `Process` named an operation this backend never queued.
    #[error("unknown operation {0}")]
    UnknownOperation(Uuid),

    /// The message type has no meaning for the directory.
    #[error("unsupported directory request: {0}")]
    Unsupported(&'static str),
}
