//! How a client reports what happened to whoever is driving it.

use blocktalk_protocol::{Message, PeerIdentity};
use tokio::sync::mpsc;

/// Something the embedding application may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A message went out. `to` is `None` for the directory.
    MessageSent {
        to: Option<PeerIdentity>,
        message: Message,
    },
    /// A message came in. Chats are reported in delivery order, which may
    /// differ from arrival order.
    MessageReceived {
        from: Option<PeerIdentity>,
        message: Message,
    },
    PeerJoined(PeerIdentity),
    PeerLeft(PeerIdentity),
    /// The directory lookup finished: either a room was found and joined,
    /// or none was and this client now hosts one.
    DirectoryResult { became_host: bool },
    LeaderElected(PeerIdentity),
}

/// Callbacks for client activity.
///
/// Called from the client's actor task, so implementations should return
/// quickly.
pub trait ClientListener: Send + 'static {
    fn on_message_sent(&mut self, to: Option<&PeerIdentity>, message: &Message);

    fn on_message_received(&mut self, from: Option<&PeerIdentity>, message: &Message);

    fn on_peer_joined(&mut self, peer: &PeerIdentity);

    fn on_directory_result(&mut self, became_host: bool);

    fn on_peer_left(&mut self, _peer: &PeerIdentity) {}

    fn on_leader_elected(&mut self, _leader: &PeerIdentity) {}
}

impl ClientEvent {
    /// Invokes the matching callback on `listener`.
    pub fn dispatch(&self, listener: &mut dyn ClientListener) {
        match self {
            Self::MessageSent { to, message } => listener.on_message_sent(to.as_ref(), message),
            Self::MessageReceived { from, message } => {
                listener.on_message_received(from.as_ref(), message)
            }
            Self::PeerJoined(peer) => listener.on_peer_joined(peer),
            Self::PeerLeft(peer) => listener.on_peer_left(peer),
            Self::DirectoryResult { became_host } => listener.on_directory_result(*became_host),
            Self::LeaderElected(leader) => listener.on_leader_elected(leader),
        }
    }
}

/// Forwards every callback as a [`ClientEvent`]. Dropped receivers are
/// ignored.
impl ClientListener for mpsc::UnboundedSender<ClientEvent> {
    fn on_message_sent(&mut self, to: Option<&PeerIdentity>, message: &Message) {
        let _ = self.send(ClientEvent::MessageSent {
            to: to.cloned(),
            message: message.clone(),
        });
    }

    fn on_message_received(&mut self, from: Option<&PeerIdentity>, message: &Message) {
        let _ = self.send(ClientEvent::MessageReceived {
            from: from.cloned(),
            message: message.clone(),
        });
    }

    fn on_peer_joined(&mut self, peer: &PeerIdentity) {
        let _ = self.send(ClientEvent::PeerJoined(peer.clone()));
    }

    fn on_directory_result(&mut self, became_host: bool) {
        let _ = self.send(ClientEvent::DirectoryResult { became_host });
    }

    fn on_peer_left(&mut self, peer: &PeerIdentity) {
        let _ = self.send(ClientEvent::PeerLeft(peer.clone()));
    }

    fn on_leader_elected(&mut self, leader: &PeerIdentity) {
        let _ = self.send(ClientEvent::LeaderElected(leader.clone()));
    }
}

/// Ignores everything.
impl ClientListener for () {
    fn on_message_sent(&mut self, _to: Option<&PeerIdentity>, _message: &Message) {}
    fn on_message_received(&mut self, _from: Option<&PeerIdentity>, _message: &Message) {}
    fn on_peer_joined(&mut self, _peer: &PeerIdentity) {}
    fn on_directory_result(&mut self, _became_host: bool) {}
}
