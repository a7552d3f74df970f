//! Room encryption for BlockTalk.
//!
//! A room is nothing more than a passphrase. Every peer derives the same
//! AES-128 key from it, so two peers that know the passphrase can talk
//! without any handshake, and a peer that doesn't sees only noise.
//!
//! ```text
//! passphrase ──SHA-256──▶ seed ──ChaCha20──▶ 16 key bytes ──▶ AES-128-CBC
//! ```
//!
//! [`EncryptionEngine`] works on raw bytes ([`encrypt`](EncryptionEngine::encrypt),
//! [`decrypt`](EncryptionEngine::decrypt)) and on whole envelopes
//! ([`seal`](EncryptionEngine::seal), [`open`](EncryptionEngine::open)).

mod engine;
mod error;

pub use engine::EncryptionEngine;
pub use error::CryptoError;
