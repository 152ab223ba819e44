//! Development relay for session buses.
//!
//! ```text
//! ws://host/{session_id}
//!
//! Client A ──┐                 ┌──► Client B
//!            ├── RelayRoom ────┤
//! Client C ──┘  (per session)  └──► Client C (not A)
//! ```
//!
//! The relay keeps no project state. It forwards each text frame to the
//! other connections of the same session, answers `join_session` with the
//! current member list, and announces joins and departures. Anything it
//! cannot decode is dropped.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broadcast::{RelayRoom, RoomManager};
use crate::protocol::{Envelope, ProtocolError, SessionEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// Frames buffered per connection before it starts lagging.
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_relayed: u64,
    pub frames_rejected: u64,
    pub active_rooms: usize,
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    frames_relayed: AtomicU64,
    frames_rejected: AtomicU64,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<AtomicRelayStats>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            rooms: Arc::new(RoomManager::new(config.broadcast_capacity)),
            stats: Arc::new(AtomicRelayStats::default()),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            frames_relayed: self.stats.frames_relayed.load(Ordering::Relaxed),
            frames_rejected: self.stats.frames_rejected.load(Ordering::Relaxed),
            active_rooms: self.rooms.room_count().await,
        }
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<(), RelayError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), RelayError> {
        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("Relay shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, rooms, stats, shutdown).await {
                    log::warn!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<RoomManager>,
    stats: Arc<AtomicRelayStats>,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    let mut path = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            Ok(response)
        },
    )
    .await?;

    let session_id = path.trim_matches('/').to_string();
    let (mut sink, mut frames) = ws.split();
    if session_id.is_empty() {
        log::warn!("Connection from {addr} did not name a session");
        sink.send(Message::Close(None)).await?;
        return Ok(());
    }

    stats.total_connections.fetch_add(1, Ordering::Relaxed);
    stats.active_connections.fetch_add(1, Ordering::Relaxed);

    let connection_id = Uuid::new_v4();
    let room = rooms.get_or_create(&session_id).await;
    let mut rx = room.join(connection_id).await;
    log::info!("Connection {connection_id} from {addr} joined session {session_id}");

    let conn = Connection {
        id: connection_id,
        session_id: &session_id,
        room: &room,
        stats: &stats,
    };

    let result = async {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    sink.send(Message::Close(None)).await?;
                    break;
                }

                msg = frames.next() => match msg {
                    Some(Ok(Message::Text(text))) => conn.relay(text.as_str(), &mut sink).await?,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => conn.relay(text, &mut sink).await?,
                        Err(_) => conn.reject("binary frame is not UTF-8"),
                    },
                    Some(Ok(Message::Ping(data))) => sink.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => return Err(RelayError::from(e)),
                    Some(Ok(_)) => {}
                },

                frame = rx.recv() => match frame {
                    Ok(frame) if frame.from == connection_id => {}
                    Ok(frame) => sink.send(Message::Text(frame.text.clone().into())).await?,
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Connection {connection_id} lagged by {n} frames");
                        room.record_lag(n);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        Ok::<(), RelayError>(())
    }
    .await;

    conn.leave().await;
    rooms.remove_if_empty(&session_id).await;
    stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    log::info!("Connection {connection_id} left session {session_id}");
    result
}

struct Connection<'a> {
    id: Uuid,
    session_id: &'a str,
    room: &'a RelayRoom,
    stats: &'a AtomicRelayStats,
}

impl Connection<'_> {
    fn encode(&self, event: SessionEvent) -> Result<String, ProtocolError> {
        Envelope::for_session(self.session_id, event).encode()
    }

    fn reject(&self, reason: &str) {
        self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
        log::warn!("Dropped frame from {}: {reason}", self.id);
    }

    async fn relay(&self, text: &str, sink: &mut Sink) -> Result<(), RelayError> {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.reject(&e.to_string());
                return Ok(());
            }
        };

        match envelope.event {
            SessionEvent::JoinSession { user } => {
                // Bring the newcomer up to date before announcing it.
                for member in self.room.users_except(self.id).await {
                    let frame = self.encode(SessionEvent::UserJoined { user: member })?;
                    sink.send(Message::Text(frame.into())).await?;
                }
                log::info!("{} ({}) joined session {}", user.name, user.id, self.session_id);
                self.room.identify(self.id, user.clone()).await;
                let frame = self.encode(SessionEvent::UserJoined { user })?;
                self.room.broadcast(self.id, frame);
            }
            _ => {
                self.room.broadcast(self.id, text.to_string());
            }
        }
        self.stats.frames_relayed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn leave(&self) {
        let Some(member) = self.room.leave(self.id).await else {
            return;
        };
        let Some(user) = member.user else {
            return;
        };
        // Still present through another connection.
        if self.room.has_user(&user.id).await {
            return;
        }
        match self.encode(SessionEvent::UserLeft {
            user_id: user.id,
            user_name: Some(user.name),
        }) {
            Ok(frame) => {
                self.room.broadcast(self.id, frame);
            }
            Err(e) => log::error!("Failed to encode user_left: {e}"),
        }
    }
}
