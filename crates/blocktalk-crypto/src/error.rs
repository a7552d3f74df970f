//! Error types for the encryption layer.

use blocktalk_protocol::ProtocolError;

/// Errors raised while sealing or opening room traffic.
///
/// A wrong passphrase usually shows up as [`CryptoError::Padding`], but
/// can occasionally survive unpadding and surface as
/// [`CryptoError::Protocol`] once the garbage body fails to parse.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ciphertext was empty or not a whole number of AES blocks.
    #[error("ciphertext of {0} bytes is not a whole number of blocks")]
    BlockSize(usize),

    /// PKCS#7 padding was invalid after decryption.
    #[error("decryption failed: invalid padding")]
    Padding,

    /// `open` was handed a message that is not ciphertext.
    #[error("expected an encrypted message, got {0}")]
    NotSealed(&'static str),

    /// `seal` was handed a message that is already ciphertext.
    #[error("message is already encrypted")]
    AlreadySealed,

    /// The decrypted body was not a valid message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
