//! Client actor: one Tokio task that owns a [`ClientState`] and the
//! connections it talks over.
//!
//! Commands from [`ClientHandle`], events from the connection manager and
//! a periodic poll tick are all handled on this one task, so the state
//! machine never needs a lock. Outbound connects run on their own tasks
//! and report back through a channel, so a slow peer never stalls the
//! loop.

use std::collections::VecDeque;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use blocktalk_crypto::EncryptionEngine;
use blocktalk_protocol::{Envelope, PeerIdentity};
use blocktalk_transport::{
    ConnectionEvent, ConnectionId, ConnectionMode, PeerConnectionManager, TransportError,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::state::{ClientSnapshot, ClientState, ConnectRole, Effect};
use crate::{ClientConfig, ClientError, ClientListener};

/// Commands sent to a client actor through its channel.
enum ClientCommand {
    JoinRoom {
        passphrase: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Snapshot {
        reply: oneshot::Sender<ClientSnapshot>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// A finished outbound connect, sent back to the actor.
struct ConnectOutcome {
    role: ConnectRole,
    result: Result<ConnectionId, TransportError>,
}

/// Handle to a running client. Cheap to clone.
#[derive(Clone)]
pub struct ClientHandle {
    me: PeerIdentity,
    sender: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    /// The identity the client started with. The directory may later
    /// correct its address; see [`ClientHandle::snapshot`].
    pub fn identity(&self) -> &PeerIdentity {
        &self.me
    }

    /// Looks up the room for `passphrase` and joins it, or hosts a new
    /// one if none exists.
    ///
    /// Returns once the directory request is on its way. The outcome is
    /// reported through [`ClientListener::on_directory_result`].
    pub async fn join_room(&self, passphrase: impl Into<String>) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::JoinRoom {
            passphrase: passphrase.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Unavailable)?
    }

    /// Sends a chat line to every peer in the room.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::SendChat {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Unavailable)?
    }

    pub async fn snapshot(&self) -> Result<ClientSnapshot, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| ClientError::Unavailable)
    }

    /// Says goodbye to the room and closes every connection. The client
    /// keeps running and can join again.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::Leave { reply }).await?;
        rx.await.map_err(|_| ClientError::Unavailable)
    }

    /// Leaves the room (if any) and stops the actor.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.request(ClientCommand::Shutdown).await
    }

    async fn request(&self, cmd: ClientCommand) -> Result<(), ClientError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| ClientError::Unavailable)
    }
}

struct ClientActor {
    config: ClientConfig,
    state: ClientState,
    manager: PeerConnectionManager,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    commands: mpsc::Receiver<ClientCommand>,
    outcomes_tx: mpsc::UnboundedSender<ConnectOutcome>,
    outcomes: mpsc::UnboundedReceiver<ConnectOutcome>,
    listener: Box<dyn ClientListener>,
}

impl ClientActor {
    async fn run(mut self) {
        tracing::info!(me = %self.state.me(), "client started");
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(event) = self.events.recv() => {
                    let effects = self.handle_event(event);
                    self.execute(effects).await;
                }
                Some(outcome) = self.outcomes.recv() => {
                    let effects = self.handle_outcome(outcome).await;
                    self.execute(effects).await;
                }
                _ = tick.tick() => {
                    let effects = self.state.poll();
                    self.execute(effects).await;
                }
            }
        }

        if self.state.in_room() {
            let effects = self.state.leave();
            self.execute(effects).await;
        }
        self.manager.shutdown().await;
        tracing::info!(me = %self.state.me(), "client stopped");
    }

    /// Returns `false` when the actor should stop.
    async fn handle_command(&mut self, cmd: ClientCommand) -> bool {
        match cmd {
            ClientCommand::JoinRoom { passphrase, reply } => {
                let result = self.join_room(passphrase).await;
                let _ = reply.send(result);
            }
            ClientCommand::SendChat { text, reply } => {
                let result = match self.state.send_chat(text) {
                    Ok(effects) => {
                        self.execute(effects).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            ClientCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
            ClientCommand::Leave { reply } => {
                let effects = self.state.leave();
                self.execute(effects).await;
                let _ = reply.send(());
            }
            ClientCommand::Shutdown => {
                tracing::info!(me = %self.state.me(), "client shutting down");
                return false;
            }
        }
        true
    }

    async fn join_room(&mut self, passphrase: String) -> Result<(), ClientError> {
        let engine = EncryptionEngine::new(&passphrase);
        self.state.begin_join(engine.clone())?;
        self.manager.set_engine(engine).await;

        let id = match connect_within(
            &self.manager,
            self.config.directory_addr,
            ConnectionMode::Server,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                self.state.abort_join();
                return Err(e.into());
            }
        };
        let effects = self.state.handle_connected(id, ConnectRole::Discover);
        self.execute(effects).await;
        Ok(())
    }

    fn handle_event(&mut self, event: ConnectionEvent) -> Vec<Effect> {
        match event {
            ConnectionEvent::Accepted { id, remote } => {
                tracing::debug!(%id, %remote, "peer connected");
                Vec::new()
            }
            ConnectionEvent::Received { id, envelope } => {
                tracing::debug!(%id, kind = envelope.message.label(), "message received");
                self.state.handle_message(id, envelope)
            }
            ConnectionEvent::Closed { id, error } => {
                match error {
                    Some(e) => tracing::warn!(%id, error = %e, "connection lost"),
                    None => tracing::debug!(%id, "connection closed"),
                }
                self.state.handle_closed(id)
            }
        }
    }

    async fn handle_outcome(&mut self, outcome: ConnectOutcome) -> Vec<Effect> {
        let ConnectOutcome { role, result } = outcome;
        match result {
            // The room was left while the connect was in flight.
            Ok(id) if !self.state.in_room() => {
                self.manager.close(id).await;
                Vec::new()
            }
            Ok(id) => self.state.handle_connected(id, role),
            Err(e) => {
                tracing::warn!(?role, error = %e, "connect failed");
                if self.state.in_room() {
                    self.state.handle_connect_failed(role)
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Runs effects in order. Effects produced while running are
    /// appended to the same queue.
    async fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Send { to, message } => {
                    let envelope = Envelope::new(self.state.me().addr, message);
                    for id in self.state.resolve(to) {
                        match self.manager.send(id, &envelope).await {
                            Ok(()) => {
                                let peer = self.state.peer(id);
                                self.listener.on_message_sent(peer, &envelope.message);
                            }
                            // The manager reports the dead connection as a
                            // Closed event; removal happens there.
                            Err(e) => tracing::warn!(%id, error = %e, "send failed"),
                        }
                    }
                }
                Effect::Connect { addr, mode, role } => {
                    tracing::debug!(%addr, %mode, "connecting");
                    let manager = self.manager.clone();
                    let outcomes = self.outcomes_tx.clone();
                    let timeout = self.config.connect_timeout;
                    tokio::spawn(async move {
                        let result = connect_within(&manager, addr, mode, timeout).await;
                        let _ = outcomes.send(ConnectOutcome { role, result });
                    });
                }
                Effect::Disconnect(id) => self.manager.close(id).await,
                Effect::Notify(event) => event.dispatch(self.listener.as_mut()),
            }
        }
    }
}

/// Connects, giving up after `timeout`.
async fn connect_within(
    manager: &PeerConnectionManager,
    addr: SocketAddr,
    mode: ConnectionMode,
    timeout: Duration,
) -> Result<ConnectionId, TransportError> {
    match tokio::time::timeout(timeout, manager.connect(addr, mode)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::ConnectFailed {
            addr,
            source: std::io::ErrorKind::TimedOut.into(),
        }),
    }
}

/// Binds the peer listener and spawns a client actor.
///
/// The client starts outside any room; call [`ClientHandle::join_room`].
pub async fn spawn_client(
    config: ClientConfig,
    listener: impl ClientListener,
) -> Result<ClientHandle, ClientError> {
    if !PeerIdentity::is_valid_name(&config.name) {
        return Err(ClientError::InvalidName(config.name));
    }

    let socket = TcpListener::bind(config.listen_addr)
        .await
        .map_err(ClientError::Bind)?;
    let port = socket.local_addr().map_err(ClientError::Bind)?.port();
    let me = PeerIdentity::new(
        config.name.clone(),
        SocketAddrV4::new(*config.listen_addr.ip(), port),
    );

    let (manager, events) = PeerConnectionManager::new();
    manager.listen(socket, ConnectionMode::Peer).await;

    let (tx, rx) = mpsc::channel(config.channel_size);
    let (outcomes_tx, outcomes) = mpsc::unbounded_channel();
    let actor = ClientActor {
        state: ClientState::new(me.clone(), config.directory_addr),
        config,
        manager,
        events,
        commands: rx,
        outcomes_tx,
        outcomes,
        listener: Box::new(listener),
    };
    tokio::spawn(actor.run());

    Ok(ClientHandle { me, sender: tx })
}
