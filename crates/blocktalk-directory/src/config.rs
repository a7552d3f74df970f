//! Relay and backend configuration.

use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Default port the relay listens on.
pub const DEFAULT_RELAY_PORT: u16 = 9999;

/// Default number of completed operations a backend remembers.
pub const DEFAULT_COMPLETED_CACHE: usize = 256;

/// Configuration for the client-facing relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Where clients connect.
    pub listen_addr: SocketAddr,
    /// Backend replicas to fan out to. Unreachable ones are skipped at
    /// startup.
    pub backends: Vec<SocketAddr>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_RELAY_PORT)),
            backends: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_backend(mut self, addr: SocketAddr) -> Self {
        self.backends.push(addr);
        self
    }

    pub fn with_backends(mut self, addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.backends.extend(addrs);
        self
    }
}

/// Configuration for one backend replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Where the relay connects.
    pub listen_addr: SocketAddr,
    /// How many completed operations are kept for replay.
    pub completed_cache: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            completed_cache: DEFAULT_COMPLETED_CACHE,
        }
    }
}

impl BackendConfig {
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_completed_cache(mut self, size: usize) -> Self {
        self.completed_cache = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_default_port() {
        let config = RelayConfig::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_RELAY_PORT);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_relay_with_backends_appends() {
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let config = RelayConfig::default().with_backend(a).with_backends([b]);
        assert_eq!(config.backends, vec![a, b]);
    }

    #[test]
    fn test_backend_default_cache() {
        assert_eq!(BackendConfig::default().completed_cache, DEFAULT_COMPLETED_CACHE);
        assert_eq!(
            BackendConfig::default().with_completed_cache(4).completed_cache,
            4
        );
    }
}
