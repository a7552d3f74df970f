//! Loopback tests for the connection manager.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use blocktalk_crypto::EncryptionEngine;
use blocktalk_protocol::{Envelope, Message};
use blocktalk_transport::{
    ConnectionEvent, ConnectionId, ConnectionMode, PeerConnectionManager, TransportError,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

fn me() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4100)
}

async fn next_event(rx: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Starts a listening manager and returns it with its address.
async fn listening(
    mode: ConnectionMode,
) -> (
    PeerConnectionManager,
    UnboundedReceiver<ConnectionEvent>,
    std::net::SocketAddr,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (manager, rx) = PeerConnectionManager::new();
    manager.listen(listener, mode).await;
    (manager, rx, addr)
}

async fn expect_accepted(rx: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionId {
    match next_event(rx).await {
        ConnectionEvent::Accepted { id, .. } => id,
        other => panic!("expected Accepted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_send_server_mode_delivers_plaintext() {
    let (_server, mut server_rx, addr) = listening(ConnectionMode::Server).await;
    let (client, _client_rx) = PeerConnectionManager::new();

    let id = client.connect(addr, ConnectionMode::Server).await.unwrap();
    let accepted = expect_accepted(&mut server_rx).await;

    let env = Envelope::new(me(), Message::RequestRoomList);
    client.send(id, &env).await.unwrap();

    match next_event(&mut server_rx).await {
        ConnectionEvent::Received { id, envelope } => {
            assert_eq!(id, accepted);
            assert_eq!(envelope, env);
        }
        other => panic!("expected Received, got {other:?}"),
    }
}

#[tokio::test]
async fn test_send_peer_mode_round_trips_through_encryption() {
    let (server, mut server_rx, addr) = listening(ConnectionMode::Peer).await;
    let (client, mut client_rx) = PeerConnectionManager::new();
    server.set_engine(EncryptionEngine::new("room")).await;
    client.set_engine(EncryptionEngine::new("room")).await;

    let id = client.connect(addr, ConnectionMode::Peer).await.unwrap();
    let accepted = expect_accepted(&mut server_rx).await;

    let chat = Envelope::new(
        me(),
        Message::Chat {
            timestamp: 5,
            text: "hello peer".into(),
        },
    );
    client.send(id, &chat).await.unwrap();
    match next_event(&mut server_rx).await {
        ConnectionEvent::Received { envelope, .. } => assert_eq!(envelope, chat),
        other => panic!("expected Received, got {other:?}"),
    }

    // And back the other way on the accepted side.
    let reply = Envelope::new(me(), Message::Leader);
    server.send(accepted, &reply).await.unwrap();
    match next_event(&mut client_rx).await {
        ConnectionEvent::Received { id: got, envelope } => {
            assert_eq!(got, id);
            assert_eq!(envelope, reply);
        }
        other => panic!("expected Received, got {other:?}"),
    }
}

#[tokio::test]
async fn test_read_loop_wrong_key_closes_with_error() {
    let (server, mut server_rx, addr) = listening(ConnectionMode::Peer).await;
    let (client, _client_rx) = PeerConnectionManager::new();
    server.set_engine(EncryptionEngine::new("room-a")).await;
    client.set_engine(EncryptionEngine::new("room-b")).await;

    let id = client.connect(addr, ConnectionMode::Peer).await.unwrap();
    let accepted = expect_accepted(&mut server_rx).await;

    let chat = Envelope::new(
        me(),
        Message::Chat {
            timestamp: 1,
            text: "you should not read this".into(),
        },
    );
    client.send(id, &chat).await.unwrap();

    match next_event(&mut server_rx).await {
        ConnectionEvent::Closed { id, error } => {
            assert_eq!(id, accepted);
            assert!(error.is_some());
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(server.remote_addr(accepted).await.is_none());
}

#[tokio::test]
async fn test_close_reports_eof_to_remote_only() {
    let (server, mut server_rx, addr) = listening(ConnectionMode::Server).await;
    let (client, mut client_rx) = PeerConnectionManager::new();

    let id = client.connect(addr, ConnectionMode::Server).await.unwrap();
    let accepted = expect_accepted(&mut server_rx).await;
    assert_eq!(client.len().await, 1);

    client.close(id).await;
    assert!(client.is_empty().await);

    match next_event(&mut server_rx).await {
        ConnectionEvent::Closed { id, error } => {
            assert_eq!(id, accepted);
            assert!(error.is_none());
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(server.is_empty().await);

    // The side that closed hears nothing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_send_unknown_connection_is_error() {
    let (manager, _rx) = PeerConnectionManager::new();
    let result = manager
        .send(ConnectionId::new(u64::MAX), &Envelope::new(me(), Message::Bye))
        .await;
    assert!(matches!(result, Err(TransportError::UnknownConnection(_))));
}

#[tokio::test]
async fn test_send_peer_mode_without_engine_is_error() {
    let (_server, mut server_rx, addr) = listening(ConnectionMode::Peer).await;
    let (client, _client_rx) = PeerConnectionManager::new();

    let id = client.connect(addr, ConnectionMode::Peer).await.unwrap();
    expect_accepted(&mut server_rx).await;

    let result = client.send(id, &Envelope::new(me(), Message::Bye)).await;
    assert!(matches!(result, Err(TransportError::NoEngine)));
}

#[tokio::test]
async fn test_connect_refused_is_error() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (manager, _rx) = PeerConnectionManager::new();
    let result = manager.connect(addr, ConnectionMode::Server).await;
    assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let (server, mut server_rx, addr) = listening(ConnectionMode::Server).await;
    let (client, _client_rx) = PeerConnectionManager::new();
    client.connect(addr, ConnectionMode::Server).await.unwrap();
    client.connect(addr, ConnectionMode::Server).await.unwrap();
    expect_accepted(&mut server_rx).await;
    expect_accepted(&mut server_rx).await;

    client.shutdown().await;
    assert!(client.is_empty().await);

    for _ in 0..2 {
        assert!(matches!(
            next_event(&mut server_rx).await,
            ConnectionEvent::Closed { error: None, .. }
        ));
    }
    assert!(server.is_empty().await);
}

#[tokio::test]
async fn test_send_to_dead_peer_closes_once_and_spares_live_peer() {
    let (_live_server, mut live_rx, live_addr) = listening(ConnectionMode::Server).await;
    let dead_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead_listener.local_addr().unwrap();
    let (client, mut client_rx) = PeerConnectionManager::new();

    let live = client.connect(live_addr, ConnectionMode::Server).await.unwrap();
    let dead = client.connect(dead_addr, ConnectionMode::Server).await.unwrap();
    expect_accepted(&mut live_rx).await;

    // The remote end of `dead` goes away.
    let (stream, _) = dead_listener.accept().await.unwrap();
    drop(stream);
    drop(dead_listener);

    let env = Envelope::new(me(), Message::RequestRoomList);
    let mut delivered = 0;
    let mut failure = None;
    for _ in 0..100 {
        for id in [dead, live] {
            match client.send(id, &env).await {
                Ok(()) if id == live => delivered += 1,
                Ok(()) => {}
                Err(e) => {
                    assert_eq!(id, dead, "send to the live peer failed: {e}");
                    failure.get_or_insert(e);
                }
            }
        }
        if failure.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Either the write hit the broken pipe, or the read loop saw the
    // close first and the id was already gone.
    match failure.expect("sending to a dead peer never failed") {
        TransportError::SendFailed { id, .. } | TransportError::UnknownConnection(id) => {
            assert_eq!(id, dead)
        }
        other => panic!("unexpected error {other:?}"),
    }

    for _ in 0..delivered {
        assert!(matches!(
            next_event(&mut live_rx).await,
            ConnectionEvent::Received { .. }
        ));
    }

    match next_event(&mut client_rx).await {
        ConnectionEvent::Closed { id, .. } => assert_eq!(id, dead),
        other => panic!("expected Closed, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client_rx.try_recv().is_err(), "Closed reported more than once");

    assert!(client.remote_addr(dead).await.is_none());
    assert!(client.remote_addr(live).await.is_some());
    assert_eq!(client.len().await, 1);
}
