//! Integration tests for the session bus against a real relay.

use reel_collab::bus::{BusConfig, ConnectionState, SessionBus};
use reel_collab::protocol::{SessionEvent, UserInfo};
use reel_collab::relay::{RelayConfig, RelayServer};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on `port` that stops when the returned token is cancelled.
async fn start_relay_on(port: u16) -> CancellationToken {
    let server = Arc::new(RelayServer::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..Default::default()
    }));
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        server.run_until(token).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown
}

fn bus_config(port: u16) -> BusConfig {
    BusConfig {
        server_url: format!("ws://127.0.0.1:{port}"),
        reconnect_delay_ms: 100,
        ..Default::default()
    }
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
    timeout(Duration::from_secs(2), rx.wait_for(|s| *s == wanted))
        .await
        .expect("Should reach state within timeout")
        .unwrap();
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Should receive event within timeout")
        .unwrap()
}

fn style_update(user: &str) -> SessionEvent {
    SessionEvent::StyleUpdate {
        project_id: "p1".into(),
        user_id: user.into(),
        user_name: user.into(),
        timestamp: 1,
    }
}

#[tokio::test]
async fn test_bus_connects_and_announces() {
    let port = free_port().await;
    let _relay = start_relay_on(port).await;

    let bus = SessionBus::connect(bus_config(port), "s1");
    let (_sub, mut events) = bus.subscribe_channel();
    let mut state = bus.watch_state();

    wait_for_state(&mut state, ConnectionState::Connected).await;
    assert_eq!(next_event(&mut events).await, SessionEvent::ConnectionRestored);
    assert_eq!(bus.stats().connect_attempts, 1);
    bus.close().await;
}

#[tokio::test]
async fn test_two_buses_exchange_events() {
    let port = free_port().await;
    let _relay = start_relay_on(port).await;

    let alice = SessionBus::connect(bus_config(port), "s1");
    let bob = SessionBus::connect(bus_config(port), "s1");
    let (_sub, mut bob_events) = bob.subscribe_channel();
    wait_for_state(&mut alice.watch_state(), ConnectionState::Connected).await;
    wait_for_state(&mut bob.watch_state(), ConnectionState::Connected).await;
    assert_eq!(next_event(&mut bob_events).await, SessionEvent::ConnectionRestored);
    // Let the relay register both connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice
        .send(SessionEvent::JoinSession {
            user: UserInfo::new("alice", "Alice"),
        })
        .unwrap();
    alice.send(style_update("alice")).unwrap();

    match next_event(&mut bob_events).await {
        SessionEvent::UserJoined { user } => assert_eq!(user.id, "alice"),
        other => panic!("Expected user_joined, got {other:?}"),
    }
    assert_eq!(next_event(&mut bob_events).await, style_update("alice"));

    // Only wire events are kept in history.
    assert_eq!(bob.history().len(), 2);
    assert_eq!(bob.stats().frames_received, 2);
}

#[tokio::test]
async fn test_events_before_first_connect_are_flushed() {
    let port = free_port().await;
    let _relay = start_relay_on(port).await;

    let bob = SessionBus::connect(bus_config(port), "s1");
    let (_sub, mut bob_events) = bob.subscribe_channel();
    wait_for_state(&mut bob.watch_state(), ConnectionState::Connected).await;
    next_event(&mut bob_events).await; // connection_restored
    tokio::time::sleep(Duration::from_millis(50)).await;

    let alice = SessionBus::connect(bus_config(port), "s1");
    alice.send(style_update("early")).unwrap();

    assert_eq!(next_event(&mut bob_events).await, style_update("early"));
    alice.close().await;
}

#[tokio::test]
async fn test_reconnects_after_relay_restart() {
    let port = free_port().await;
    let relay = start_relay_on(port).await;

    let bus = SessionBus::connect(bus_config(port), "s1");
    let (_sub, mut events) = bus.subscribe_channel();
    let mut state = bus.watch_state();
    wait_for_state(&mut state, ConnectionState::Connected).await;
    assert_eq!(next_event(&mut events).await, SessionEvent::ConnectionRestored);

    relay.cancel();
    assert_eq!(next_event(&mut events).await, SessionEvent::ConnectionLost);

    // Sent while down: discarded, not replayed later.
    bus.send(style_update("lost")).unwrap();
    assert_eq!(bus.stats().events_discarded, 1);

    let _relay = start_relay_on(port).await;
    assert_eq!(next_event(&mut events).await, SessionEvent::ConnectionRestored);
    assert_eq!(bus.state(), ConnectionState::Connected);
    assert!(bus.stats().connect_attempts >= 2);
    bus.close().await;
}

#[tokio::test]
async fn test_one_attempt_per_backoff_interval() {
    let port = free_port().await;
    let relay = start_relay_on(port).await;

    let config = BusConfig {
        reconnect_delay_ms: 400,
        ..bus_config(port)
    };
    let bus = SessionBus::connect(config, "s1");
    let (_sub, mut events) = bus.subscribe_channel();
    assert_eq!(next_event(&mut events).await, SessionEvent::ConnectionRestored);

    relay.cancel();
    assert_eq!(next_event(&mut events).await, SessionEvent::ConnectionLost);
    let after_loss = bus.stats().connect_attempts;
    assert_eq!(after_loss, 1);

    // Halfway through the delay nothing has been tried yet.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bus.stats().connect_attempts, after_loss);

    // Past one delay but short of two: exactly one new attempt.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(bus.stats().connect_attempts, after_loss + 1);
    assert_ne!(bus.state(), ConnectionState::Connected);
    bus.close().await;
}
