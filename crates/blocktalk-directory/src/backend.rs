//! A backend replica: holds a [`DirectoryState`] and answers the relay's
//! queue and process requests.

use std::net::SocketAddr;
use std::sync::Arc;

use blocktalk_protocol::{Envelope, Message, WireCodec};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::{BackendConfig, DirectoryError, DirectoryState, header_addr};

/// A bound backend. Call [`run()`](Self::run) to start serving.
pub struct Backend {
    listener: TcpListener,
    state: Arc<Mutex<DirectoryState>>,
}

impl Backend {
    pub async fn bind(config: &BackendConfig) -> Result<Self, DirectoryError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "backend listening");
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(DirectoryState::new(config.completed_cache))),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The replica's room table. Shared with every relay connection.
    pub fn state(&self) -> Arc<Mutex<DirectoryState>> {
        Arc::clone(&self.state)
    }

    /// Accepts relay connections until the task is dropped. Each
    /// connection is served on its own task against the shared table.
    pub async fn run(self) -> Result<(), DirectoryError> {
        let local = self.listener.local_addr()?;
        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    tracing::debug!(%remote, "relay connected");
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = serve_relay(stream, local, state).await {
                            tracing::warn!(%remote, error = %e, "relay connection ended with error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "accept failed"),
            }
        }
    }
}

async fn serve_relay(
    stream: TcpStream,
    local: SocketAddr,
    state: Arc<Mutex<DirectoryState>>,
) -> Result<(), DirectoryError> {
    let sender = header_addr(local);
    let mut framed = Framed::new(stream, WireCodec::new());

    while let Some(frame) = framed.next().await {
        let request = Envelope::from_frame(&frame?)?;
        let reply = match request.message {
            Message::Queue {
                operation_id,
                inner,
            } => {
                tracing::debug!(%operation_id, kind = inner.label(), "operation queued");
                state.lock().await.queue(operation_id, *inner)
            }
            Message::Process { operation_id } => {
                let result = state.lock().await.process(operation_id)?;
                tracing::debug!(%operation_id, kind = result.label(), "operation processed");
                Message::Queue {
                    operation_id,
                    inner: Box::new(result),
                }
            }
            Message::Bye => break,
            other => return Err(DirectoryError::Unsupported(other.label())),
        };
        framed.send(Envelope::new(sender, reply)).await?;
    }
    Ok(())
}
