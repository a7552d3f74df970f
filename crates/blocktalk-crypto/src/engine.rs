//! Key derivation and AES-128-CBC.

use std::fmt;

use aes::Aes128;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use blocktalk_protocol::{Envelope, Message, MessageType, PeerIdentity};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

use crate::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_LEN: usize = 16;

/// Initialisation vector shared by every room.
///
/// All peers must agree on it without a handshake, so it cannot be random.
const IV: [u8; BLOCK_LEN] = [10, 10, 19, 94, 3, 56, 19, 120, 20, 1, 77, 69, 9, 14, 99, 111];

/// Encrypts and decrypts room traffic with a passphrase-derived key.
///
/// Cheap to clone (the key is 16 bytes). Cipher state is rebuilt on every
/// call, so one engine can be shared by any number of connections.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionEngine {
    key: [u8; BLOCK_LEN],
}

impl EncryptionEngine {
    /// Derives the room key from `passphrase`.
    ///
    /// The same passphrase always yields the same key, on every platform.
    pub fn new(passphrase: impl AsRef<[u8]>) -> Self {
        let seed: [u8; 32] = Sha256::digest(passphrase.as_ref()).into();
        let mut rng = ChaCha20Rng::from_seed(seed);
        let mut key = [0u8; BLOCK_LEN];
        rng.fill_bytes(&mut key);
        Self { key }
    }

    /// Encrypts `plaintext`. Output length is the next multiple of 16.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.into(), &IV.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypts `ciphertext`.
    ///
    /// # Errors
    /// [`CryptoError::BlockSize`] if the input is not whole blocks,
    /// [`CryptoError::Padding`] if the padding is wrong (typically a
    /// different passphrase).
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::BlockSize(ciphertext.len()));
        }
        Aes128CbcDec::new(&self.key.into(), &IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Padding)
    }

    /// Encrypts an envelope's body. The sender address stays in the clear.
    pub fn seal(&self, envelope: &Envelope) -> Result<Envelope, CryptoError> {
        if matches!(envelope.message, Message::Encrypted { .. }) {
            return Err(CryptoError::AlreadySealed);
        }
        let body = envelope.message.render_body();
        Ok(Envelope::new(
            envelope.sender,
            Message::Encrypted {
                ciphertext: self.encrypt(body.as_bytes()),
            },
        ))
    }

    /// Decrypts an [`Message::Encrypted`] envelope and parses the inner
    /// message.
    pub fn open(&self, envelope: &Envelope) -> Result<Envelope, CryptoError> {
        let Message::Encrypted { ciphertext } = &envelope.message else {
            return Err(CryptoError::NotSealed(envelope.message.label()));
        };
        let body = self.decrypt(ciphertext)?;
        Ok(Envelope::new(envelope.sender, Message::parse_body(&body)?))
    }

    /// Encrypts a room advert: the host's identity, as stored in the
    /// directory.
    pub fn encrypt_advert(&self, host: &PeerIdentity) -> Vec<u8> {
        self.encrypt(host.to_wire().as_bytes())
    }

    /// Decrypts a directory entry back into the host's identity.
    pub fn decrypt_advert(&self, entry: &[u8]) -> Result<PeerIdentity, CryptoError> {
        let plain = self.decrypt(entry)?;
        let text = std::str::from_utf8(&plain).map_err(blocktalk_protocol::ProtocolError::from)?;
        Ok(PeerIdentity::from_wire(MessageType::HostRoom, text)?)
    }
}

impl fmt::Debug for EncryptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionEngine")
            .field("key", &"<redacted>")
            .finish()
    }
}
