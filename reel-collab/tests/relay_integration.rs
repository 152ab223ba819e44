//! Integration tests for the development relay.
//!
//! These start a real relay and talk to it with raw WebSocket clients.

use futures_util::{SinkExt, StreamExt};
use reel_collab::protocol::{CursorPosition, Envelope, SessionEvent, UserInfo};
use reel_collab::relay::{RelayConfig, RelayServer};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on a free port, return the port and the server.
async fn start_test_relay() -> (u16, Arc<RelayServer>) {
    let port = free_port().await;
    let server = Arc::new(RelayServer::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
    }));
    let running = server.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });
    // Give the relay time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (port, server)
}

async fn connect(port: u16, session: &str) -> Client {
    let url = format!("ws://127.0.0.1:{port}/{session}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send(client: &mut Client, event: SessionEvent) {
    let text = Envelope::new(event).encode().unwrap();
    client.send(Message::Text(text.into())).await.unwrap();
}

/// Next session event, or `None` if nothing arrives within `wait`.
async fn recv_within(client: &mut Client, wait: Duration) -> Option<SessionEvent> {
    loop {
        match timeout(wait, client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(Envelope::decode(text.as_str()).unwrap().event),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

async fn recv(client: &mut Client) -> SessionEvent {
    recv_within(client, Duration::from_secs(2))
        .await
        .expect("Should receive an event within timeout")
}

fn join(id: &str, name: &str) -> SessionEvent {
    SessionEvent::JoinSession {
        user: UserInfo::new(id, name),
    }
}

fn cursor(user_id: &str, x: f64) -> SessionEvent {
    SessionEvent::CursorUpdate {
        user_id: user_id.into(),
        cursor: CursorPosition {
            x,
            y: 10.0,
            component: Some("video".into()),
            timestamp: None,
        },
    }
}

#[tokio::test]
async fn test_relay_accepts_connections() {
    let (port, server) = start_test_relay().await;
    let _client = connect(port, "s1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.active_rooms, 1);
}

#[tokio::test]
async fn test_join_is_announced_and_replayed() {
    let (port, _server) = start_test_relay().await;

    let mut alice = connect(port, "s1").await;
    send(&mut alice, join("alice", "Alice")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut bob = connect(port, "s1").await;
    send(&mut bob, join("bob", "Bob")).await;

    // Bob is told who is already here.
    match recv(&mut bob).await {
        SessionEvent::UserJoined { user } => assert_eq!(user.id, "alice"),
        other => panic!("Expected user_joined for alice, got {other:?}"),
    }
    // Alice is told about Bob.
    match recv(&mut alice).await {
        SessionEvent::UserJoined { user } => assert_eq!(user.name, "Bob"),
        other => panic!("Expected user_joined for bob, got {other:?}"),
    }
}

#[tokio::test]
async fn test_frames_forwarded_without_echo() {
    let (port, _server) = start_test_relay().await;
    let mut alice = connect(port, "s1").await;
    let mut bob = connect(port, "s1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send(&mut alice, cursor("alice", 5.0)).await;

    assert_eq!(recv(&mut bob).await, cursor("alice", 5.0));
    assert!(recv_within(&mut alice, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (port, _server) = start_test_relay().await;
    let mut alice = connect(port, "s1").await;
    let mut carol = connect(port, "s2").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send(&mut alice, cursor("alice", 1.0)).await;
    assert!(recv_within(&mut carol, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_user_left_on_disconnect() {
    let (port, server) = start_test_relay().await;
    let mut alice = connect(port, "s1").await;
    send(&mut alice, join("alice", "Alice")).await;
    let mut bob = connect(port, "s1").await;
    send(&mut bob, join("bob", "Bob")).await;
    recv(&mut bob).await; // replayed alice
    recv(&mut alice).await; // bob joined

    alice.close(None).await.unwrap();
    drop(alice);

    match recv(&mut bob).await {
        SessionEvent::UserLeft { user_id, user_name } => {
            assert_eq!(user_id, "alice");
            assert_eq!(user_name.as_deref(), Some("Alice"));
        }
        other => panic!("Expected user_left, got {other:?}"),
    }

    drop(bob);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.stats().await.active_rooms, 0);
}

#[tokio::test]
async fn test_malformed_frames_dropped() {
    let (port, server) = start_test_relay().await;
    let mut alice = connect(port, "s1").await;
    let mut bob = connect(port, "s1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice.send(Message::Text("not json".into())).await.unwrap();
    alice
        .send(Message::Text(r#"{"type":"connection_lost"}"#.into()))
        .await
        .unwrap();
    send(&mut alice, cursor("alice", 2.0)).await;

    assert_eq!(recv(&mut bob).await, cursor("alice", 2.0));
    assert_eq!(server.stats().await.frames_rejected, 2);
}
