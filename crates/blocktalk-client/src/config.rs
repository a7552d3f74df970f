//! Client configuration.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port of the directory relay.
pub const DEFAULT_DIRECTORY_PORT: u16 = 9999;

/// Configuration for one chat client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Display name announced to the room. No whitespace.
    pub name: String,

    /// Where to accept peer connections. Port 0 picks a free port.
    pub listen_addr: SocketAddrV4,

    /// Address of the directory relay.
    pub directory_addr: SocketAddr,

    /// How often deferred chats are re-checked for delivery.
    pub poll_interval: Duration,

    /// Capacity of the command channel behind [`crate::ClientHandle`].
    pub channel_size: usize,

    /// How long an outbound connect may take before the peer counts as
    /// unreachable.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "anonymous".into(),
            listen_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            directory_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_DIRECTORY_PORT)),
            poll_interval: Duration::from_millis(150),
            channel_size: 64,
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_listen_addr(mut self, addr: SocketAddrV4) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_directory_addr(mut self, addr: SocketAddr) -> Self {
        self.directory_addr = addr;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(150));
        assert_eq!(config.channel_size, 64);
        assert_eq!(config.directory_addr.port(), DEFAULT_DIRECTORY_PORT);
        assert_eq!(config.listen_addr.port(), 0);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_builder_overrides() {
        let dir: SocketAddr = "10.1.1.1:4000".parse().unwrap();
        let config = ClientConfig::new("alice")
            .with_directory_addr(dir)
            .with_poll_interval(Duration::from_millis(10))
            .with_channel_size(8)
            .with_connect_timeout(Duration::from_millis(250));
        assert_eq!(config.name, "alice");
        assert_eq!(config.directory_addr, dir);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.channel_size, 8);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }
}
