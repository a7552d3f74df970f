//! The client protocol state machine.
//!
//! [`ClientState`] is synchronous and does no I/O. Every handler takes an
//! input (a received message, a closed connection, a finished connect)
//! and returns the [`Effect`]s the caller must carry out. The client
//! actor is the only caller; tests drive it directly.
//!
//! Three flags shape the behaviour: whether this client hosts the room,
//! whether an election is running, and whether the room token is known.

use std::collections::VecDeque;
use std::net::{SocketAddr, SocketAddrV4};

use blocktalk_crypto::EncryptionEngine;
use blocktalk_protocol::{Envelope, Message, PeerIdentity};
use blocktalk_transport::{ConnectionId, ConnectionMode};
use serde::Serialize;

use crate::clock::{Arrival, LogicalClock, PendingDeliveryQueue};
use crate::election::Election;
use crate::peers::PeerTable;
use crate::rank::RankOrderList;
use crate::{ClientError, ClientEvent};

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Who a [`Effect::Send`] goes to. Resolved against the peer table when
/// the effect runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Connection(ConnectionId),
    AllPeers,
    AllPeersExcept(ConnectionId),
    Directory,
}

/// Why a connection is being opened. Handed back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectRole {
    /// Directory lookup at the start of a join.
    Discover,
    /// Register (or re-register) this client's room with the directory.
    Advertise,
    /// The host of the room being joined.
    RoomHost(PeerIdentity),
    /// A member the host told us about.
    Member(PeerIdentity),
}

/// An action the state machine asks its owner to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send { to: Recipient, message: Message },
    Connect {
        addr: SocketAddr,
        mode: ConnectionMode,
        role: ConnectRole,
    },
    Disconnect(ConnectionId),
    Notify(ClientEvent),
}

impl Effect {
    fn send(to: Recipient, message: Message) -> Self {
        Self::Send { to, message }
    }
}

/// A point-in-time view of a client, for callers and tests.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub me: String,
    pub addr: SocketAddrV4,
    pub in_room: bool,
    pub is_host: bool,
    pub in_election: bool,
    pub room_token: Option<String>,
    pub host: Option<SocketAddrV4>,
    pub clock: LogicalClock,
    pub rank: Vec<SocketAddrV4>,
    pub peers: Vec<SocketAddrV4>,
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// ClientState
// ---------------------------------------------------------------------------

type Deferred = (Option<PeerIdentity>, Message);

pub struct ClientState {
    me: PeerIdentity,
    directory_addr: SocketAddr,
    directory: Option<ConnectionId>,
    peers: PeerTable,
    rank: RankOrderList,
    clock: LogicalClock,
    pending: PendingDeliveryQueue<Deferred>,
    election: Election,
    is_host: bool,
    /// Address of the current host, when known.
    host: Option<SocketAddrV4>,
    room_token: Option<String>,
    /// Present while in a room.
    engine: Option<EncryptionEngine>,
    /// Joinable rooms not tried yet.
    candidates: VecDeque<PeerIdentity>,
}

impl ClientState {
    pub fn new(me: PeerIdentity, directory_addr: SocketAddr) -> Self {
        Self {
            rank: RankOrderList::new(me.clone()),
            me,
            directory_addr,
            directory: None,
            peers: PeerTable::new(),
            clock: LogicalClock::new(),
            pending: PendingDeliveryQueue::new(),
            election: Election::new(),
            is_host: false,
            host: None,
            room_token: None,
            engine: None,
            candidates: VecDeque::new(),
        }
    }

    pub fn me(&self) -> &PeerIdentity {
        &self.me
    }

    pub fn peer(&self, id: ConnectionId) -> Option<&PeerIdentity> {
        self.peers.get(id)
    }

    pub fn in_room(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn clock(&self) -> LogicalClock {
        self.clock
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            me: self.me.name.clone(),
            addr: self.me.addr,
            in_room: self.in_room(),
            is_host: self.is_host,
            in_election: self.election.is_active(),
            room_token: self.room_token.clone(),
            host: self.host,
            clock: self.clock,
            rank: self.rank.iter().map(|u| u.addr).collect(),
            peers: self.peers.identities().into_iter().map(|u| u.addr).collect(),
            pending: self.pending.len(),
        }
    }

    /// The connections a send to `to` reaches right now.
    pub fn resolve(&self, to: Recipient) -> Vec<ConnectionId> {
        match to {
            Recipient::Connection(id) => vec![id],
            Recipient::AllPeers => self.peers.ids(),
            Recipient::AllPeersExcept(skip) => {
                self.peers.ids().into_iter().filter(|id| *id != skip).collect()
            }
            Recipient::Directory => self.directory.into_iter().collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Enters a room keyed by `engine`. The caller then connects to the
    /// directory and reports back with [`ConnectRole::Discover`].
    pub fn begin_join(&mut self, engine: EncryptionEngine) -> Result<(), ClientError> {
        if self.in_room() {
            return Err(ClientError::AlreadyJoined);
        }
        self.engine = Some(engine);
        self.clock = LogicalClock::new();
        Ok(())
    }

    /// Undoes [`begin_join`](Self::begin_join) when the directory was
    /// unreachable.
    pub fn abort_join(&mut self) {
        self.engine = None;
    }

    pub fn send_chat(&mut self, text: String) -> Result<Vec<Effect>, ClientError> {
        if !self.in_room() {
            return Err(ClientError::NotJoined);
        }
        let timestamp = self.clock.stamp();
        Ok(vec![Effect::send(
            Recipient::AllPeers,
            Message::Chat { timestamp, text },
        )])
    }

    /// Says goodbye to every peer and forgets the room.
    pub fn leave(&mut self) -> Vec<Effect> {
        let ids = self.peers.ids();
        let mut effects: Vec<Effect> = ids
            .iter()
            .map(|id| Effect::send(Recipient::Connection(*id), Message::Bye))
            .collect();
        effects.extend(ids.into_iter().map(Effect::Disconnect));
        effects.extend(self.directory.take().map(Effect::Disconnect));

        self.peers.clear();
        self.rank.reset();
        self.clock = LogicalClock::new();
        self.pending.clear();
        self.election.end();
        self.is_host = false;
        self.host = None;
        self.room_token = None;
        self.engine = None;
        self.candidates.clear();
        tracing::info!(me = %self.me, "left room");
        effects
    }

    /// Delivers every deferred chat the clock has caught up with.
    pub fn poll(&mut self) -> Vec<Effect> {
        self.pending
            .drain_ready(&mut self.clock)
            .into_iter()
            .map(|(_, (from, message))| Effect::Notify(ClientEvent::MessageReceived { from, message }))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    pub fn handle_connected(&mut self, id: ConnectionId, role: ConnectRole) -> Vec<Effect> {
        match role {
            ConnectRole::Discover => {
                self.directory = Some(id);
                vec![
                    Effect::send(
                        Recipient::Directory,
                        Message::Hello {
                            user: self.me.clone(),
                        },
                    ),
                    Effect::send(Recipient::Directory, Message::RequestRoomList),
                ]
            }
            ConnectRole::Advertise => {
                self.directory = Some(id);
                match self.advert_message() {
                    Some(message) => vec![Effect::send(Recipient::Directory, message)],
                    None => {
                        self.directory = None;
                        vec![Effect::Disconnect(id)]
                    }
                }
            }
            ConnectRole::RoomHost(host) => {
                tracing::info!(%host, "joining room");
                self.candidates.clear();
                self.clock = LogicalClock::Unsynced;
                self.host = Some(host.addr);
                let mut effects = self.register_peer(id, host.clone());
                self.rank.push(host.clone());
                effects.push(Effect::send(
                    Recipient::Connection(id),
                    Message::Hello {
                        user: self.me.clone(),
                    },
                ));
                effects.push(Effect::Notify(ClientEvent::PeerJoined(host)));
                effects.push(Effect::Notify(ClientEvent::DirectoryResult { became_host: false }));
                effects
            }
            ConnectRole::Member(user) => {
                let mut effects = self.register_peer(id, user.clone());
                self.rank.push(user.clone());
                effects.push(Effect::send(
                    Recipient::Connection(id),
                    Message::Hello {
                        user: self.me.clone(),
                    },
                ));
                effects.push(Effect::Notify(ClientEvent::PeerJoined(user)));
                effects
            }
        }
    }

    pub fn handle_connect_failed(&mut self, role: ConnectRole) -> Vec<Effect> {
        match role {
            ConnectRole::Discover | ConnectRole::Advertise => Vec::new(),
            ConnectRole::RoomHost(host) => {
                tracing::warn!(%host, "room host unreachable, trying next room");
                self.try_next_candidate()
            }
            ConnectRole::Member(user) => {
                tracing::warn!(%user, "member unreachable");
                self.rank.remove(user.addr);
                Vec::new()
            }
        }
    }

    /// A connection died without us closing it.
    pub fn handle_closed(&mut self, id: ConnectionId) -> Vec<Effect> {
        if self.directory == Some(id) {
            self.directory = None;
            return Vec::new();
        }
        match self.peers.remove(id) {
            Some(user) => self.forget(user, true),
            None => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------------

    pub fn handle_message(&mut self, id: ConnectionId, envelope: Envelope) -> Vec<Effect> {
        let from = self.peers.get(id).cloned();
        let from_directory = self.directory == Some(id);

        if let Message::Chat { timestamp, .. } = envelope.message {
            return self.handle_chat(timestamp, from, envelope.message);
        }

        let mut effects = vec![Effect::Notify(ClientEvent::MessageReceived {
            from,
            message: envelope.message.clone(),
        })];

        let more = match envelope.message {
            Message::Hello { user } => self.handle_hello(id, user),
            Message::UserInfo { user } => self.handle_user_info(user),
            Message::YourInfo { user } if from_directory => {
                self.set_me(user);
                Vec::new()
            }
            Message::RoomList { entries } if from_directory => self.handle_room_list(&entries),
            Message::Ack { info } => self.handle_ack(info),
            Message::RankOrder { users } => {
                self.rank.replace_all(users, &self.me);
                Vec::new()
            }
            Message::DeadUser { user } => self.handle_dead_user(user),
            Message::Bye => self.handle_bye(id),
            Message::LeaderVote => self.handle_vote(),
            Message::Leader => self.handle_leader(id, envelope.sender),
            other => {
                tracing::debug!(%id, kind = other.label(), "ignoring message");
                Vec::new()
            }
        };
        effects.extend(more);
        effects
    }

    fn handle_chat(&mut self, timestamp: u64, from: Option<PeerIdentity>, message: Message) -> Vec<Effect> {
        match self.clock.observe(timestamp) {
            Arrival::Deliver => vec![Effect::Notify(ClientEvent::MessageReceived { from, message })],
            Arrival::Defer => {
                tracing::debug!(timestamp, clock = %self.clock, "deferring chat");
                self.pending.push(timestamp, (from, message));
                Vec::new()
            }
        }
    }

    fn handle_hello(&mut self, id: ConnectionId, user: PeerIdentity) -> Vec<Effect> {
        let known = self.peers.get(id).is_some_and(|u| *u == user);
        let mut effects = self.register_peer(id, user.clone());
        if !known {
            effects.push(Effect::Notify(ClientEvent::PeerJoined(user.clone())));
        }

        if self.is_host {
            tracing::info!(peer = %user, "admitting peer");
            effects.push(Effect::send(
                Recipient::AllPeersExcept(id),
                Message::UserInfo { user: user.clone() },
            ));
            self.rank.push(user);
            effects.push(Effect::send(
                Recipient::Connection(id),
                Message::Hello {
                    user: self.me.clone(),
                },
            ));
            effects.push(Effect::send(
                Recipient::Connection(id),
                Message::RankOrder {
                    users: self.rank.to_vec(),
                },
            ));
            effects.push(Effect::send(
                Recipient::Connection(id),
                Message::Ack {
                    info: self.room_token.clone().unwrap_or_default(),
                },
            ));
        }
        effects
    }

    fn handle_user_info(&mut self, user: PeerIdentity) -> Vec<Effect> {
        if user == self.me || self.peers.find(user.addr).is_some() {
            return Vec::new();
        }
        vec![Effect::Connect {
            addr: SocketAddr::V4(user.addr),
            mode: ConnectionMode::Peer,
            role: ConnectRole::Member(user),
        }]
    }

    fn handle_room_list(&mut self, entries: &[Vec<u8>]) -> Vec<Effect> {
        let Some(engine) = &self.engine else {
            return Vec::new();
        };
        self.candidates = entries
            .iter()
            .filter_map(|entry| engine.decrypt_advert(entry).ok())
            .filter(|host| host.addr != self.me.addr)
            .collect();
        tracing::debug!(
            entries = entries.len(),
            usable = self.candidates.len(),
            "room list received"
        );
        self.try_next_candidate()
    }

    fn handle_ack(&mut self, info: String) -> Vec<Effect> {
        if !info.is_empty() {
            tracing::info!(token = %info, "room token recorded");
            self.room_token = Some(info);
        }
        self.directory.take().map(Effect::Disconnect).into_iter().collect()
    }

    fn handle_dead_user(&mut self, user: PeerIdentity) -> Vec<Effect> {
        if user == self.me {
            return Vec::new();
        }
        match self.peers.find(user.addr) {
            Some(dead) => {
                let user = self.peers.remove(dead).unwrap_or(user);
                let mut effects = vec![Effect::Disconnect(dead)];
                effects.extend(self.forget(user, false));
                effects
            }
            None if self.rank.contains(user.addr) => self.forget(user, false),
            None => Vec::new(),
        }
    }

    fn handle_bye(&mut self, id: ConnectionId) -> Vec<Effect> {
        let mut effects = vec![Effect::Disconnect(id)];
        if let Some(user) = self.peers.remove(id) {
            effects.extend(self.forget(user, false));
        }
        effects
    }

    fn handle_vote(&mut self) -> Vec<Effect> {
        let mut effects = self.start_election();
        if self.election.record_vote(self.peers.len()) {
            effects.extend(self.become_leader());
        }
        effects
    }

    fn handle_leader(&mut self, id: ConnectionId, sender: SocketAddrV4) -> Vec<Effect> {
        self.election.end();
        self.is_host = false;
        let leader = self
            .peers
            .get(id)
            .cloned()
            .or_else(|| self.rank.iter().find(|u| u.addr == sender).cloned());
        let Some(leader) = leader else {
            self.host = Some(sender);
            return Vec::new();
        };
        tracing::info!(%leader, "new host elected");
        self.host = Some(leader.addr);
        vec![Effect::Notify(ClientEvent::LeaderElected(leader))]
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn register_peer(&mut self, id: ConnectionId, user: PeerIdentity) -> Vec<Effect> {
        self.peers
            .insert(id, user)
            .map(Effect::Disconnect)
            .into_iter()
            .collect()
    }

    /// Drops a departed peer from the ranking. A host that noticed the
    /// death itself tells the others; losing the host starts an election.
    fn forget(&mut self, user: PeerIdentity, announce: bool) -> Vec<Effect> {
        tracing::info!(peer = %user, "peer left");
        self.rank.remove(user.addr);
        let mut effects = vec![Effect::Notify(ClientEvent::PeerLeft(user.clone()))];

        if announce && self.is_host {
            effects.push(Effect::send(
                Recipient::AllPeers,
                Message::DeadUser { user: user.clone() },
            ));
        }
        if !self.is_host && self.host == Some(user.addr) {
            self.host = None;
            effects.extend(self.start_election());
        }
        effects
    }

    fn start_election(&mut self) -> Vec<Effect> {
        if !self.election.start() {
            return Vec::new();
        }
        let head = self.rank.head().clone();
        tracing::info!(%head, "election started");
        if head == self.me {
            return Vec::new();
        }
        match self.peers.find(head.addr) {
            Some(id) => vec![Effect::send(Recipient::Connection(id), Message::LeaderVote)],
            None => {
                tracing::warn!(%head, "no connection to election candidate");
                Vec::new()
            }
        }
    }

    fn become_leader(&mut self) -> Vec<Effect> {
        tracing::info!(votes = self.election.votes(), "won election");
        self.election.end();
        self.is_host = true;
        self.host = Some(self.me.addr);
        let mut effects = vec![
            Effect::send(Recipient::AllPeers, Message::Leader),
            Effect::Notify(ClientEvent::LeaderElected(self.me.clone())),
        ];
        if self.room_token.is_some() && self.directory.is_none() {
            effects.push(self.connect_directory(ConnectRole::Advertise));
        }
        effects
    }

    fn become_host(&mut self) -> Vec<Effect> {
        tracing::info!(me = %self.me, "no joinable room, hosting a new one");
        self.is_host = true;
        self.host = Some(self.me.addr);
        self.clock = LogicalClock::new();
        let mut effects = match (self.directory, self.advert_message()) {
            (Some(_), Some(message)) => vec![Effect::send(Recipient::Directory, message)],
            _ => vec![self.connect_directory(ConnectRole::Advertise)],
        };
        effects.push(Effect::Notify(ClientEvent::DirectoryResult { became_host: true }));
        effects
    }

    fn try_next_candidate(&mut self) -> Vec<Effect> {
        match self.candidates.pop_front() {
            Some(host) => vec![Effect::Connect {
                addr: SocketAddr::V4(host.addr),
                mode: ConnectionMode::Peer,
                role: ConnectRole::RoomHost(host),
            }],
            None => self.become_host(),
        }
    }

    /// `HostRoom` for a new room, `HostUpdated` once the token is known.
    fn advert_message(&self) -> Option<Message> {
        let payload = self.engine.as_ref()?.encrypt_advert(&self.me);
        Some(match &self.room_token {
            Some(token) => Message::HostUpdated {
                token: token.clone(),
                payload,
            },
            None => Message::HostRoom { payload },
        })
    }

    fn connect_directory(&self, role: ConnectRole) -> Effect {
        Effect::Connect {
            addr: self.directory_addr,
            mode: ConnectionMode::Server,
            role,
        }
    }

    fn set_me(&mut self, user: PeerIdentity) {
        if user.addr != self.me.addr {
            tracing::info!(old = %self.me.addr, new = %user.addr, "external address updated");
        }
        if self.host == Some(self.me.addr) {
            self.host = Some(user.addr);
        }
        self.rank.set_local(user.clone());
        self.me = user;
    }
}
