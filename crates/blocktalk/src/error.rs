//! Unified error type for BlockTalk.

use blocktalk_client::ClientError;
use blocktalk_crypto::CryptoError;
use blocktalk_directory::DirectoryError;
use blocktalk_protocol::ProtocolError;
use blocktalk_transport::TransportError;

/// Top-level error wrapping every crate-specific error, so `?` works
/// across layers.
#[derive(Debug, thiserror::Error)]
pub enum BlockTalkError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_protocol_error() {
        let err: BlockTalkError = ProtocolError::UnknownType("ZZZ".into()).into();
        assert!(matches!(err, BlockTalkError::Protocol(_)));
        assert!(err.to_string().contains("ZZZ"));
    }

    #[test]
    fn test_from_crypto_error() {
        let err: BlockTalkError = CryptoError::Padding.into();
        assert!(matches!(err, BlockTalkError::Crypto(_)));
    }

    #[test]
    fn test_from_transport_error() {
        let err: BlockTalkError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, BlockTalkError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_client_error() {
        let err: BlockTalkError = ClientError::NotJoined.into();
        assert!(matches!(err, BlockTalkError::Client(_)));
    }

    #[test]
    fn test_from_directory_error() {
        let err: BlockTalkError = DirectoryError::NoReplicas.into();
        assert!(matches!(err, BlockTalkError::Directory(_)));
    }
}
