//! Chat client core for BlockTalk.
//!
//! The client finds a room through the directory, then talks to the
//! other members directly over encrypted connections.
//!
//! - [`ClientState`] — the protocol state machine. Pure: every handler
//!   returns [`Effect`]s instead of doing I/O.
//! - [`spawn_client`] / [`ClientHandle`] — the actor that owns the state
//!   and the connections and carries the effects out.
//! - [`LogicalClock`] / [`PendingDeliveryQueue`] — Lamport ordering of
//!   chat lines.
//! - [`RankOrderList`] / [`Election`] — who takes over when the host goes.
//! - [`ClientListener`] — callbacks for the embedding application.

mod actor;
mod clock;
mod config;
mod election;
mod error;
mod listener;
mod peers;
mod rank;
mod state;

pub use actor::{ClientHandle, spawn_client};
pub use clock::{Arrival, LogicalClock, PendingDeliveryQueue};
pub use config::{ClientConfig, DEFAULT_DIRECTORY_PORT};
pub use election::{Election, threshold_reached};
pub use error::ClientError;
pub use listener::{ClientEvent, ClientListener};
pub use peers::PeerTable;
pub use rank::RankOrderList;
pub use state::{ClientSnapshot, ClientState, ConnectRole, Effect, Recipient};
