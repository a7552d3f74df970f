//! # blocktalk-directory
//!
//! The replicated room directory. Clients talk to a single [`Relay`];
//! the relay fans every mutating request out to all [`Backend`] replicas
//! in two phases (queue, then process) so every replica applies the same
//! operation under the same id. A replica that fails is dropped from the
//! relay's list and the rest carry on.
//!
//! ```text
//! client ──HST/ROM/RPL──▶ Relay ──QUE(id, msg)──▶ Backend × N
//!                           │   ◀──PRC(id)───────┘
//!                           │   ──PRC(id)───────▶
//!        ◀──ACK/LST─────────┘   ◀──QUE(id, result)
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

mod backend;
mod config;
mod error;
mod relay;
mod state;

pub use backend::Backend;
pub use config::{BackendConfig, DEFAULT_COMPLETED_CACHE, DEFAULT_RELAY_PORT, RelayConfig};
pub use error::DirectoryError;
pub use relay::{DirectoryContext, Relay};
pub use state::DirectoryState;

/// Frame headers only carry IPv4 addresses.
pub(crate) fn header_addr(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(v6) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, v6.port()),
    }
}
