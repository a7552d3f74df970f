//! The client-facing relay and the replica list it fans out to.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use blocktalk_protocol::{Envelope, Message, PeerIdentity, Uuid, WireCodec};
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::{DirectoryError, RelayConfig, header_addr};

/// One backend connection. Requests on it are strictly one at a time.
struct Replica {
    addr: SocketAddr,
    conn: Mutex<Framed<TcpStream, WireCodec>>,
}

impl Replica {
    async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            addr,
            conn: Mutex::new(Framed::new(stream, WireCodec::new())),
        })
    }

    /// Sends `request` and waits for a reply echoing `id`. Replies for
    /// other ids are discarded and the request is sent again; both phases
    /// are safe to repeat on a backend.
    async fn exchange(
        &self,
        sender: SocketAddrV4,
        request: &Message,
        id: Uuid,
    ) -> Result<Message, DirectoryError> {
        let mut conn = self.conn.lock().await;
        loop {
            conn.send(Envelope::new(sender, request.clone())).await?;
            let frame = conn
                .next()
                .await
                .ok_or(DirectoryError::ReplicaClosed(self.addr))??;
            let reply = Envelope::from_frame(&frame)?.message;
            match echoed_id(&reply) {
                Some(echo) if echo == id => return Ok(reply),
                echo => {
                    tracing::warn!(
                        replica = %self.addr,
                        expected = %id,
                        got = ?echo,
                        "mismatched echo, resending"
                    );
                }
            }
        }
    }
}

fn echoed_id(message: &Message) -> Option<Uuid> {
    match message {
        Message::Process { operation_id } | Message::Queue { operation_id, .. } => {
            Some(*operation_id)
        }
        _ => None,
    }
}

/// The live replica list. Fan-out works on a snapshot, so replicas pruned
/// mid-operation never block other requests.
pub struct DirectoryContext {
    sender: SocketAddrV4,
    replicas: Mutex<Vec<Arc<Replica>>>,
}

impl DirectoryContext {
    /// Connects to every address in `backends`. Unreachable ones are
    /// logged and left out.
    async fn connect(sender: SocketAddrV4, backends: &[SocketAddr]) -> Self {
        let mut replicas = Vec::with_capacity(backends.len());
        for &addr in backends {
            match Replica::connect(addr).await {
                Ok(replica) => {
                    tracing::info!(%addr, "connected to replica");
                    replicas.push(Arc::new(replica));
                }
                Err(e) => tracing::warn!(%addr, error = %e, "replica unreachable, skipping"),
            }
        }
        Self {
            sender,
            replicas: Mutex::new(replicas),
        }
    }

    /// Number of replicas still in the list.
    pub async fn replica_count(&self) -> usize {
        self.replicas.lock().await.len()
    }

    /// Addresses of the replicas still in the list.
    pub async fn replica_addrs(&self) -> Vec<SocketAddr> {
        self.replicas.lock().await.iter().map(|r| r.addr).collect()
    }

    /// Runs `message` through both phases on every replica and returns
    /// the first result collected.
    pub async fn replicate(&self, message: Message) -> Result<Message, DirectoryError> {
        let id = Uuid::new_v4();
        tracing::debug!(operation_id = %id, kind = message.label(), "replicating");

        self.fan_out(
            &Message::Queue {
                operation_id: id,
                inner: Box::new(message),
            },
            id,
        )
        .await;

        self.fan_out(&Message::Process { operation_id: id }, id)
            .await
            .into_iter()
            .find_map(|reply| match reply {
                Message::Queue { inner, .. } => Some(*inner),
                _ => None,
            })
            .ok_or(DirectoryError::NoReplicas)
    }

    /// Sends `request` to every replica at once. Replicas that fail are
    /// pruned; the replies of the rest are returned in list order.
    async fn fan_out(&self, request: &Message, id: Uuid) -> Vec<Message> {
        let snapshot: Vec<Arc<Replica>> = self.replicas.lock().await.clone();
        let results = join_all(
            snapshot
                .iter()
                .map(|replica| replica.exchange(self.sender, request, id)),
        )
        .await;

        let mut replies = Vec::with_capacity(results.len());
        for (replica, result) in snapshot.iter().zip(results) {
            match result {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    tracing::warn!(replica = %replica.addr, error = %e, "replica failed, pruning");
                    self.prune(replica).await;
                }
            }
        }
        replies
    }

    async fn prune(&self, failed: &Arc<Replica>) {
        self.replicas
            .lock()
            .await
            .retain(|replica| !Arc::ptr_eq(replica, failed));
    }
}

/// A bound relay. Call [`run()`](Self::run) to start serving clients.
pub struct Relay {
    listener: TcpListener,
    context: Arc<DirectoryContext>,
}

impl Relay {
    /// Binds the client listener and connects to the configured backends.
    pub async fn bind(config: &RelayConfig) -> Result<Self, DirectoryError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local = listener.local_addr()?;
        let context = DirectoryContext::connect(header_addr(local), &config.backends).await;
        tracing::info!(
            addr = %local,
            replicas = context.replica_count().await,
            "relay listening"
        );
        Ok(Self {
            listener,
            context: Arc::new(context),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<DirectoryContext> {
        Arc::clone(&self.context)
    }

    /// Accepts client connections until the task is dropped.
    pub async fn run(self) -> Result<(), DirectoryError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    tracing::debug!(%remote, "client connected");
                    let context = Arc::clone(&self.context);
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(stream, remote, context).await {
                            tracing::warn!(%remote, error = %e, "client connection ended with error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "accept failed"),
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    remote: SocketAddr,
    context: Arc<DirectoryContext>,
) -> Result<(), DirectoryError> {
    let mut framed = Framed::new(stream, WireCodec::new());

    while let Some(frame) = framed.next().await {
        let request = Envelope::from_frame(&frame?)?;
        let reply = match request.message {
            Message::Hello { user } => Message::YourInfo {
                user: observed_identity(user, remote),
            },
            message @ (Message::HostRoom { .. }
            | Message::RequestRoomList
            | Message::HostUpdated { .. }) => context.replicate(message).await?,
            Message::Bye => {
                tracing::debug!(%remote, "client said goodbye");
                break;
            }
            other => return Err(DirectoryError::Unsupported(other.label())),
        };
        framed.send(Envelope::new(context.sender, reply)).await?;
    }
    Ok(())
}

/// The announced name and port with the address the connection came
/// from. Clients behind NAT learn their outside address this way.
fn observed_identity(user: PeerIdentity, remote: SocketAddr) -> PeerIdentity {
    let ip = match remote {
        SocketAddr::V4(v4) => *v4.ip(),
        SocketAddr::V6(_) => *user.addr.ip(),
    };
    PeerIdentity::new(user.name, SocketAddrV4::new(ip, user.addr.port()))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_observed_identity_keeps_port_and_takes_remote_ip() {
        let user = PeerIdentity::new("bob", SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4000));
        let remote: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        let seen = observed_identity(user, remote);
        assert_eq!(seen.name, "bob");
        assert_eq!(seen.addr, "10.0.0.7:4000".parse::<SocketAddrV4>().unwrap());
    }

    #[test]
    fn test_echoed_id_matches_both_phases() {
        let id = Uuid::new_v4();
        assert_eq!(
            echoed_id(&Message::Process { operation_id: id }),
            Some(id)
        );
        assert_eq!(
            echoed_id(&Message::Queue {
                operation_id: id,
                inner: Box::new(Message::Bye)
            }),
            Some(id)
        );
        assert_eq!(echoed_id(&Message::Bye), None);
    }
}
