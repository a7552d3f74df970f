//! Core protocol types for BlockTalk's wire format.
//!
//! This module defines every message that travels "on the wire" between
//! peers, the directory relay, and the directory backends. The body of a
//! frame is text: a 3-letter type code, a space, and a type-specific
//! payload. [`Message::render_body`] produces that text and
//! [`Message::parse_body`] reads it back.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, SocketAddrV4};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use uuid::Uuid;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A chat participant: a display name plus the address they listen on.
///
/// Equality and hashing only look at `addr`. The name is metadata, so a
/// peer that renames itself keeps the same identity. This is why
/// `PartialEq`/`Hash` are implemented by hand instead of derived.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    /// Display name. Must not contain whitespace (it is a single field
    /// in `<name> <ip> <port>`).
    pub name: String,
    /// The address other peers connect to.
    pub addr: SocketAddrV4,
}

impl PeerIdentity {
    /// Creates a new identity.
    ///
    /// The name is not checked. Only identities whose name passes
    /// [`is_valid_name`](Self::is_valid_name) survive `to_wire` followed by
    /// `from_wire`.
    pub fn new(name: impl Into<String>, addr: SocketAddrV4) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }

    /// A name can travel on the wire if it is non-empty and has no
    /// whitespace.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && !name.chars().any(char::is_whitespace)
    }

    /// Renders the identity as `<name> <ip> <port>`.
    pub fn to_wire(&self) -> String {
        format!("{} {} {}", self.name, self.addr.ip(), self.addr.port())
    }

    /// Parses `<name> <ip> <port>`. Any other field count is an error.
    pub fn from_wire(kind: MessageType, text: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        let [name, ip, port] = fields.as_slice() else {
            return Err(ProtocolError::malformed(
                kind,
                format!("expected <name> <ip> <port>, got {} fields", fields.len()),
            ));
        };
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| ProtocolError::malformed(kind, format!("bad IPv4 address {ip:?}")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ProtocolError::malformed(kind, format!("bad port {port:?}")))?;
        Ok(Self::new(*name, SocketAddrV4::new(ip, port)))
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.addr)
    }
}

// ---------------------------------------------------------------------------
// MessageType — the 3-letter codes
// ---------------------------------------------------------------------------

/// The type code at the start of every plaintext body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    UserInfo,
    YourInfo,
    Chat,
    Ack,
    Bye,
    RoomList,
    HostRoom,
    RequestRoomList,
    RankOrder,
    DeadUser,
    LeaderVote,
    Leader,
    Process,
    Queue,
    HostUpdated,
}

impl MessageType {
    /// Every coded type, in table order.
    pub const ALL: [MessageType; 16] = [
        Self::Hello,
        Self::UserInfo,
        Self::YourInfo,
        Self::Chat,
        Self::Ack,
        Self::Bye,
        Self::RoomList,
        Self::HostRoom,
        Self::RequestRoomList,
        Self::RankOrder,
        Self::DeadUser,
        Self::LeaderVote,
        Self::Leader,
        Self::Process,
        Self::Queue,
        Self::HostUpdated,
    ];

    /// The 3-letter wire code, e.g. `"HLO"`.
    pub fn code(self) -> &'static str {
        match self {
            Self::Hello => "HLO",
            Self::UserInfo => "USR",
            Self::YourInfo => "YOU",
            Self::Chat => "MSG",
            Self::Ack => "ACK",
            Self::Bye => "BYE",
            Self::RoomList => "LST",
            Self::HostRoom => "HST",
            Self::RequestRoomList => "ROM",
            Self::RankOrder => "ORD",
            Self::DeadUser => "DED",
            Self::LeaderVote => "VOT",
            Self::Leader => "LDR",
            Self::Process => "PRC",
            Self::Queue => "QUE",
            Self::HostUpdated => "RPL",
        }
    }

    /// Looks up a type by its wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Message — the closed set of variants
// ---------------------------------------------------------------------------

/// Every message BlockTalk nodes exchange.
///
/// The sender's address is not part of the variant: it travels in the
/// frame header and lives on [`Envelope`]. Messages are immutable once
/// built; handlers match on them and never mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `HLO` — "this is who I am". Sent when opening a peer connection.
    Hello { user: PeerIdentity },
    /// `USR` — host → members: "a new peer joined, connect to them".
    UserInfo { user: PeerIdentity },
    /// `YOU` — relay → client: "this is how the outside sees you".
    YourInfo { user: PeerIdentity },
    /// `MSG` — a chat line stamped with the sender's Lamport clock.
    Chat { timestamp: u64, text: String },
    /// `ACK` — free-text acknowledgement; carries the room token.
    Ack { info: String },
    /// `BYE` — the sender is leaving.
    Bye,
    /// `LST` — directory → client: encrypted room adverts.
    RoomList { entries: Vec<Vec<u8>> },
    /// `HST` — client → directory: register an encrypted room advert.
    HostRoom { payload: Vec<u8> },
    /// `ROM` — client → directory: "list the rooms".
    RequestRoomList,
    /// `ORD` — host → joiner: the room's rank order, oldest first.
    RankOrder { users: Vec<PeerIdentity> },
    /// `DED` — "this peer is gone".
    DeadUser { user: PeerIdentity },
    /// `VOT` — a vote for the receiver in a leader election.
    LeaderVote,
    /// `LDR` — the sender won the election.
    Leader,
    /// `PRC` — directory phase two, or the backend's queue-phase echo.
    Process { operation_id: Uuid },
    /// `QUE` — a directory operation id paired with a message. Relay →
    /// backend it queues a request; backend → relay it carries the
    /// operation's result.
    Queue {
        operation_id: Uuid,
        inner: Box<Message>,
    },
    /// `RPL` — replace the advert stored under an existing room token.
    HostUpdated { token: String, payload: Vec<u8> },
    /// Ciphertext of another message's body. Has no type code: the body
    /// is the Base64 text alone, so it is only decoded through
    /// [`Envelope::from_sealed_frame`].
    Encrypted { ciphertext: Vec<u8> },
}

impl Message {
    /// Returns the wire type, or `None` for [`Message::Encrypted`].
    pub fn message_type(&self) -> Option<MessageType> {
        let t = match self {
            Self::Hello { .. } => MessageType::Hello,
            Self::UserInfo { .. } => MessageType::UserInfo,
            Self::YourInfo { .. } => MessageType::YourInfo,
            Self::Chat { .. } => MessageType::Chat,
            Self::Ack { .. } => MessageType::Ack,
            Self::Bye => MessageType::Bye,
            Self::RoomList { .. } => MessageType::RoomList,
            Self::HostRoom { .. } => MessageType::HostRoom,
            Self::RequestRoomList => MessageType::RequestRoomList,
            Self::RankOrder { .. } => MessageType::RankOrder,
            Self::DeadUser { .. } => MessageType::DeadUser,
            Self::LeaderVote => MessageType::LeaderVote,
            Self::Leader => MessageType::Leader,
            Self::Process { .. } => MessageType::Process,
            Self::Queue { .. } => MessageType::Queue,
            Self::HostUpdated { .. } => MessageType::HostUpdated,
            Self::Encrypted { .. } => return None,
        };
        Some(t)
    }

    /// A short label for logs.
    pub fn label(&self) -> &'static str {
        self.message_type().map_or("ENC", MessageType::code)
    }

    /// Renders the body text: `<code>` or `<code> <payload>`.
    pub fn render_body(&self) -> String {
        let kind = match (self, self.message_type()) {
            // Encrypted bodies are bare Base64.
            (Self::Encrypted { ciphertext }, _) => return BASE64.encode(ciphertext),
            (_, Some(kind)) => kind,
            (_, None) => return String::new(),
        };

        let payload = match self {
            Self::Hello { user }
            | Self::UserInfo { user }
            | Self::YourInfo { user }
            | Self::DeadUser { user } => Some(user.to_wire()),
            Self::Chat { timestamp, text } => Some(format!("{timestamp} {text}")),
            Self::Ack { info } => Some(info.clone()),
            Self::RoomList { entries } => Some(
                entries
                    .iter()
                    .map(|e| BASE64.encode(e))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Self::HostRoom { payload } => Some(BASE64.encode(payload)),
            Self::RankOrder { users } => Some(
                users
                    .iter()
                    .map(PeerIdentity::to_wire)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Self::Process { operation_id } => Some(operation_id.to_string()),
            Self::Queue {
                operation_id,
                inner,
            } => Some(format!("{operation_id}\n{}", inner.render_body())),
            Self::HostUpdated { token, payload } => {
                Some(format!("{token} {}", BASE64.encode(payload)))
            }
            Self::Bye
            | Self::RequestRoomList
            | Self::LeaderVote
            | Self::Leader
            | Self::Encrypted { .. } => None,
        };

        match payload {
            Some(p) => format!("{} {p}", kind.code()),
            None => kind.code().to_string(),
        }
    }

    /// Parses a plaintext body. The inverse of [`Message::render_body`]
    /// for every coded variant.
    pub fn parse_body(body: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(body)?;
        Self::parse_text(text)
    }

    fn parse_text(text: &str) -> Result<Self, ProtocolError> {
        let code = text.get(..3).unwrap_or(text);
        let kind = MessageType::from_code(code)
            .ok_or_else(|| ProtocolError::UnknownType(code.to_string()))?;

        // The code is followed by end-of-body or by one space.
        let rest = &text[code.len()..];
        let payload = match rest.strip_prefix(' ') {
            Some(p) => p,
            None if rest.is_empty() => "",
            None => return Err(ProtocolError::UnknownType(text.chars().take(4).collect())),
        };

        let msg = match kind {
            MessageType::Hello => Self::Hello {
                user: PeerIdentity::from_wire(kind, payload)?,
            },
            MessageType::UserInfo => Self::UserInfo {
                user: PeerIdentity::from_wire(kind, payload)?,
            },
            MessageType::YourInfo => Self::YourInfo {
                user: PeerIdentity::from_wire(kind, payload)?,
            },
            MessageType::DeadUser => Self::DeadUser {
                user: PeerIdentity::from_wire(kind, payload)?,
            },
            MessageType::Chat => {
                let (ts, text) = payload.split_once(' ').unwrap_or((payload, ""));
                let timestamp = ts.parse().map_err(|_| {
                    ProtocolError::malformed(kind, format!("bad timestamp {ts:?}"))
                })?;
                Self::Chat {
                    timestamp,
                    text: text.to_string(),
                }
            }
            MessageType::Ack => Self::Ack {
                info: payload.to_string(),
            },
            MessageType::Bye => Self::Bye,
            MessageType::RoomList => Self::RoomList {
                entries: non_empty_lines(payload)
                    .map(|line| BASE64.decode(line))
                    .collect::<Result<_, _>>()?,
            },
            MessageType::HostRoom => Self::HostRoom {
                payload: BASE64.decode(payload.trim())?,
            },
            MessageType::RequestRoomList => Self::RequestRoomList,
            MessageType::RankOrder => Self::RankOrder {
                users: non_empty_lines(payload)
                    .map(|line| PeerIdentity::from_wire(kind, line))
                    .collect::<Result<_, _>>()?,
            },
            MessageType::LeaderVote => Self::LeaderVote,
            MessageType::Leader => Self::Leader,
            MessageType::Process => Self::Process {
                operation_id: Uuid::parse_str(payload.trim())?,
            },
            MessageType::Queue => {
                let (id, inner) = payload.split_once('\n').ok_or_else(|| {
                    ProtocolError::malformed(kind, "missing newline after operation id")
                })?;
                // Operations never nest; recursion stays one level deep.
                if inner.get(..3) == Some(MessageType::Queue.code()) {
                    return Err(ProtocolError::malformed(kind, "nested QUE"));
                }
                Self::Queue {
                    operation_id: Uuid::parse_str(id.trim())?,
                    inner: Box::new(Self::parse_text(inner)?),
                }
            }
            MessageType::HostUpdated => {
                let (token, encoded) = payload.split_once(' ').ok_or_else(|| {
                    ProtocolError::malformed(kind, "expected <token> <payload>")
                })?;
                if token.is_empty() {
                    return Err(ProtocolError::malformed(kind, "empty room token"));
                }
                Self::HostUpdated {
                    token: token.to_string(),
                    payload: BASE64.decode(encoded.trim())?,
                }
            }
        };
        Ok(msg)
    }
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

// ---------------------------------------------------------------------------
// Envelope — a message plus the header's sender address
// ---------------------------------------------------------------------------

/// A decoded frame: who sent it (from the 12-byte header) and what.
///
/// ```text
/// ┌──────────────────────────────┐
/// │ sender: 10.0.0.7:5000        │  ← header bytes 0..8
/// │ ┌──────────────────────────┐ │
/// │ │ message: Chat { 3, "hi" } │ │  ← body
/// │ └──────────────────────────┘ │
/// └──────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The sender address carried in the header. Used for routing and
    /// identification only; it is never encrypted.
    pub sender: SocketAddrV4,
    /// The message itself.
    pub message: Message,
}

impl Envelope {
    /// Creates a new envelope.
    pub fn new(sender: SocketAddrV4, message: Message) -> Self {
        Self { sender, message }
    }

    /// Converts the envelope into a frame ready for the codec.
    pub fn to_frame(&self) -> crate::RawFrame {
        crate::RawFrame {
            sender: self.sender,
            body: self.message.render_body().into_bytes().into(),
        }
    }

    /// Parses a plaintext frame, dispatching on the body's type code.
    pub fn from_frame(frame: &crate::RawFrame) -> Result<Self, ProtocolError> {
        Ok(Self {
            sender: frame.sender,
            message: Message::parse_body(&frame.body)?,
        })
    }

    /// Parses a frame from an encrypted connection. The body is Base64
    /// ciphertext, so the result is always [`Message::Encrypted`].
    pub fn from_sealed_frame(frame: &crate::RawFrame) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(&frame.body)?;
        Ok(Self {
            sender: frame.sender,
            message: Message::Encrypted {
                ciphertext: BASE64.decode(text.trim())?,
            },
        })
    }
}

// =========================================================================
// Tests
// =========================================================================
