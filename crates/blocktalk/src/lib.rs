//! # BlockTalk
//!
//! Decentralized, encrypted group chat.
//!
//! Peers find a room through a replicated directory, then talk to each
//! other directly over connections encrypted with a key derived from the
//! room passphrase. Chat lines are ordered with a Lamport clock, and when
//! the room host disappears the survivors elect a new one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blocktalk::prelude::*;
//!
//! # async fn demo() -> Result<(), BlockTalkError> {
//! blocktalk::telemetry::init();
//!
//! let (events, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let client = spawn_client(ClientConfig::new("alice"), events).await?;
//! client.join_room("correct horse battery staple").await?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let ClientEvent::DirectoryResult { .. } = event {
//!         client.send_chat("hello").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod error;
pub mod telemetry;

pub use error::BlockTalkError;

pub use blocktalk_client as client;
pub use blocktalk_crypto as crypto;
pub use blocktalk_directory as directory;
pub use blocktalk_protocol as protocol;
pub use blocktalk_transport as transport;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::BlockTalkError;
    pub use blocktalk_client::{
        ClientConfig, ClientEvent, ClientHandle, ClientListener, ClientSnapshot, spawn_client,
    };
    pub use blocktalk_crypto::EncryptionEngine;
    pub use blocktalk_directory::{Backend, BackendConfig, Relay, RelayConfig};
    pub use blocktalk_protocol::{Envelope, Message, PeerIdentity};
}
