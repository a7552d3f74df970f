//! Which connection belongs to which peer.

use std::collections::HashMap;
use std::net::SocketAddrV4;

use blocktalk_protocol::PeerIdentity;
use blocktalk_transport::ConnectionId;

/// Maps live connections to the peers on the other end.
///
/// At most one connection per peer address: registering a second one
/// displaces the first, and the caller is told so it can close it.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<ConnectionId, PeerIdentity>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `user` on `id`. Returns the connection it displaced, if
    /// another one was open to the same address.
    pub fn insert(&mut self, id: ConnectionId, user: PeerIdentity) -> Option<ConnectionId> {
        let displaced = self
            .peers
            .iter()
            .find(|(other, u)| **other != id && u.addr == user.addr)
            .map(|(other, _)| *other);
        if let Some(old) = displaced {
            self.peers.remove(&old);
        }
        self.peers.insert(id, user);
        displaced
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<PeerIdentity> {
        self.peers.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PeerIdentity> {
        self.peers.get(&id)
    }

    /// The connection open to `addr`, if any.
    pub fn find(&self, addr: SocketAddrV4) -> Option<ConnectionId> {
        self.peers
            .iter()
            .find(|(_, u)| u.addr == addr)
            .map(|(id, _)| *id)
    }

    /// A sorted snapshot of connection ids, for fan-out.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.peers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn identities(&self) -> Vec<PeerIdentity> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.peers.get(&id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
