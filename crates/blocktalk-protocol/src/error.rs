//! Error types for the protocol layer.
//!
//! Each crate in BlockTalk defines its own error enum. A `ProtocolError`
//! always means the bytes on the wire were wrong: the frame could not be
//! split, the type code is unknown, or a payload field did not parse.
//! These errors are fatal for the connection that produced them, never
//! for the process.

use crate::MessageType;

/// Errors that can occur while framing or parsing messages.
///
/// `#[derive(thiserror::Error)]` generates the `std::error::Error` impl;
/// the `#[error("...")]` attribute is what shows up in logs.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The body did not start with a known 3-letter type code.
    #[error("unknown message type code: {0:?}")]
    UnknownType(String),

    /// The type code was recognised but its payload was not.
    ///
    /// Typical causes: wrong field count in `<name> <ip> <port>`, a
    /// non-numeric timestamp, or a missing separator.
    #[error("malformed {kind} payload: {reason}")]
    Malformed {
        kind: MessageType,
        reason: String,
    },

    /// The body (or a decrypted body) was not valid UTF-8 text.
    #[error("body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A Base64 field could not be decoded.
    #[error("invalid base64 field: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// A directory operation id was not a valid UUID.
    #[error("invalid operation id: {0}")]
    InvalidOperationId(#[from] uuid::Error),

    /// The header carried a port number that does not fit in 16 bits.
    #[error("header port {0} is out of range")]
    InvalidPort(u32),

    /// The declared body length exceeds the codec's limit.
    #[error("frame body of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The underlying stream failed while reading or writing a frame.
    ///
    /// `tokio_util`'s `Decoder`/`Encoder` traits require the error type to
    /// be constructible from `std::io::Error`, so the variant lives here.
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Shorthand for building a [`ProtocolError::Malformed`].
    pub(crate) fn malformed(kind: MessageType, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}
