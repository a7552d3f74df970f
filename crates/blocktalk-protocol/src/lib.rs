//! Wire protocol for BlockTalk.
//!
//! This crate defines the "language" that chat peers, the directory relay
//! and the directory backends speak:
//!
//! - **Types** ([`Message`], [`Envelope`], [`PeerIdentity`]) — the
//!   closed set of messages and the identity they carry.
//! - **Framing** ([`WireCodec`], [`RawFrame`]) — the 12-byte header and
//!   length-delimited body, as a `tokio_util` codec.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while framing or
//!   parsing.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets or keys. Transport
//! feeds it bytes, crypto feeds it decrypted bodies.
//!
//! ```text
//! TcpStream → WireCodec (RawFrame) → Envelope::from_frame (Message)
//! ```

mod error;
mod frame;
mod types;

pub use error::ProtocolError;
pub use frame::{HEADER_LEN, MAX_BODY_LEN, RawFrame, WireCodec};
pub use types::{Envelope, Message, MessageType, PeerIdentity};

// Re-exported so downstream crates name operation ids without a direct
// `uuid` dependency.
pub use uuid::Uuid;
