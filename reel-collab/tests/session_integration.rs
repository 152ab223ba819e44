//! End-to-end tests: two editor sessions talking through a real relay.

use async_trait::async_trait;
use reel_collab::bus::SessionBus;
use reel_collab::config::CollabConfig;
use reel_collab::protocol::{SessionEvent, UserInfo};
use reel_collab::relay::{RelayConfig, RelayServer};
use reel_collab::render::RenderRequest;
use reel_collab::services::{InMemoryProjectStore, RenderBackend, RenderStatusReport, ServiceError};
use reel_collab::session::{EditorSession, SessionHandle, SessionIdentity, SessionServices, SessionSnapshot};
use reel_core::{SyncProposal, SyncSource};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

/// Backend that accepts renders but never reports progress.
struct IdleBackend;

#[async_trait]
impl RenderBackend for IdleBackend {
    async fn start_render(&self, _request: &RenderRequest) -> Result<String, ServiceError> {
        Ok("render-1".into())
    }

    async fn status(&self, render_id: &str) -> Result<RenderStatusReport, ServiceError> {
        Err(ServiceError::NotFound(render_id.to_string()))
    }
}

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_test_relay() -> u16 {
    let port = free_port().await;
    let server = RelayServer::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..Default::default()
    });
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    sleep(Duration::from_millis(50)).await;
    port
}

fn start_session(port: u16, id: &str, name: &str) -> SessionHandle {
    let mut config = CollabConfig::default();
    config.bus.server_url = format!("ws://127.0.0.1:{port}");
    let identity = SessionIdentity {
        session_id: "review".into(),
        project_id: "p1".into(),
        user: UserInfo::new(id, name),
    };
    let services = SessionServices {
        render: Arc::new(IdleBackend),
        projects: Arc::new(InMemoryProjectStore::new()),
    };
    let (session, handle) = EditorSession::connect(identity, &config, services);
    session.spawn();
    handle
}

/// Poll snapshots until `check` passes or two seconds elapse.
async fn eventually(handle: &SessionHandle, check: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = handle.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "Condition not met in time: {snapshot:?}");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_sessions_see_each_other() {
    let port = start_test_relay().await;
    let alice = start_session(port, "alice", "Alice");
    eventually(&alice, |s| s.connection == reel_collab::ConnectionState::Connected).await;
    let bob = start_session(port, "bob", "Bob");

    let snapshot = eventually(&bob, |s| s.collaborators.iter().any(|c| c.id == "alice")).await;
    assert_eq!(snapshot.collaborators[0].name, "Alice");
    eventually(&alice, |s| s.collaborators.iter().any(|c| c.id == "bob")).await;

    alice.shutdown().await.unwrap();
    let snapshot = eventually(&bob, |s| s.collaborators.is_empty()).await;
    assert!(snapshot.notifications.iter().any(|n| n.title == "User Left"));
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_playback_follows_collaborator() {
    let port = start_test_relay().await;
    let alice = start_session(port, "alice", "Alice");
    let bob = start_session(port, "bob", "Bob");
    for handle in [&alice, &bob] {
        assert!(handle.set_duration(300.0).await.unwrap());
        eventually(handle, |s| s.connection == reel_collab::ConnectionState::Connected).await;
    }
    sleep(Duration::from_millis(50)).await;

    let outcome = alice.propose(SyncProposal::time(95.0, SyncSource::Video)).await.unwrap();
    assert!(outcome.is_applied());
    alice.key("Space", false).await.unwrap();

    let snapshot = eventually(&bob, |s| {
        s.playback.state.current_time == 95.0 && s.playback.state.is_playing
    })
    .await;
    assert!(snapshot.notifications.iter().any(|n| n.title == "Playback Sync"));

    // Alice never sees her own playback notices.
    let snapshot = alice.snapshot().await.unwrap();
    assert!(snapshot.notifications.iter().all(|n| n.title != "Playback Sync"));
}

#[tokio::test]
async fn test_edits_and_cursors_reach_collaborator() {
    let port = start_test_relay().await;
    let alice = start_session(port, "alice", "Alice");
    let bob = start_session(port, "bob", "Bob");
    for handle in [&alice, &bob] {
        eventually(handle, |s| s.connection == reel_collab::ConnectionState::Connected).await;
    }
    eventually(&bob, |s| !s.collaborators.is_empty()).await;

    alice
        .transcript_edited(serde_json::json!([{"start": 0.0, "text": "Hello"}]))
        .await
        .unwrap();
    alice.move_cursor(120.0, 48.0, Some("transcript".into())).await.unwrap();

    let snapshot = eventually(&bob, |s| {
        !s.cursors.is_empty() && s.notifications.iter().any(|n| n.title == "Transcript Updated")
    })
    .await;
    let cursor = &snapshot.cursors[0];
    assert_eq!(cursor.user_id, "alice");
    assert_eq!(cursor.name, "Alice");
    assert_eq!((cursor.x, cursor.y), (120.0, 48.0));
    assert_eq!(cursor.component.as_deref(), Some("transcript"));
}

#[tokio::test]
async fn test_render_started_is_shared() {
    let port = start_test_relay().await;
    let alice = start_session(port, "alice", "Alice");
    let bob = start_session(port, "bob", "Bob");
    for handle in [&alice, &bob] {
        eventually(handle, |s| s.connection == reel_collab::ConnectionState::Connected).await;
    }
    sleep(Duration::from_millis(50)).await;

    let job = alice.start_render(Default::default()).await.unwrap();
    assert_eq!(job.id, "render-1");
    assert!(alice.start_render(Default::default()).await.is_err());

    let snapshot = eventually(&bob, |s| s.notifications.iter().any(|n| n.title == "Render Started")).await;
    let notice = snapshot.notifications.iter().find(|n| n.title == "Render Started").unwrap();
    assert_eq!(notice.message, "Alice started rendering the video");

    assert_eq!(alice.cancel_render().await.unwrap().map(|j| j.id), Some("render-1".into()));
}

#[tokio::test]
async fn test_join_is_announced_once() {
    let port = start_test_relay().await;
    let mut config = CollabConfig::default();
    config.bus.server_url = format!("ws://127.0.0.1:{port}");
    let observer = SessionBus::connect(config.bus.clone(), "review");
    let (_sub, mut events) = observer.subscribe_channel();
    let mut state = observer.watch_state();
    state
        .wait_for(|s| *s == reel_collab::ConnectionState::Connected)
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let alice = start_session(port, "alice", "Alice");
    eventually(&alice, |s| s.connection == reel_collab::ConnectionState::Connected).await;
    sleep(Duration::from_millis(300)).await;

    let mut joins = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(&event, SessionEvent::UserJoined { user } if user.id == "alice") {
            joins += 1;
        }
    }
    assert_eq!(joins, 1);
    alice.shutdown().await.unwrap();
}
