//! Session bus: one reconnecting WebSocket per collaboration session.
//!
//! ```text
//!  BusHandle::send ──► mpsc ──┐            ┌──► subscriber 1
//!                             ▼            │
//!                      ┌─────────────┐     ├──► subscriber 2
//!   ws://…/{session} ◄─┤ driver task ├─────┤
//!                      └─────────────┘     └──► history (last N)
//!                       owns the socket
//! ```
//!
//! The driver task is the only owner of the transport. Everyone else holds a
//! cloneable [`BusHandle`] that can send and subscribe.
//!
//! Delivery is at-most-once. Frames sent before the first successful connect
//! are held and flushed on connect; frames sent after a connection loss are
//! discarded rather than replayed.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::protocol::{Envelope, ProtocolError, SessionEvent};
use crate::scheduler::Scheduler;

/// Bus connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Bus configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Relay base URL; the session id is appended as the path.
    pub server_url: String,
    /// Fixed delay between a failure and the next connect attempt.
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Inbound events kept for late subscribers.
    pub history_capacity: usize,
    /// Frames held until the first connect succeeds.
    pub pending_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            reconnect_delay_ms: 5_000,
            connect_timeout_ms: 10_000,
            history_capacity: 100,
            pending_capacity: 256,
        }
    }
}

impl BusConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn session_url(&self, session_id: &str) -> String {
        format!("{}/{}", self.server_url.trim_end_matches('/'), session_id)
    }
}

/// Counters for monitoring bus health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub connect_attempts: u64,
    pub frames_received: u64,
    /// Malformed or foreign inbound frames.
    pub frames_dropped: u64,
    pub frames_sent: u64,
    /// Outbound events dropped because the connection was down.
    pub events_discarded: u64,
}

#[derive(Default)]
struct AtomicBusStats {
    connect_attempts: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    frames_sent: AtomicU64,
    events_discarded: AtomicU64,
}

impl AtomicBusStats {
    fn snapshot(&self) -> BusStats {
        BusStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Event type `{0}` is local-only and cannot be sent")]
    LocalOnly(&'static str),
    #[error("Session bus is closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct Shared {
    session_id: String,
    subscribers: Mutex<Vec<(u64, Handler)>>,
    next_subscriber: AtomicU64,
    history: Mutex<VecDeque<SessionEvent>>,
    history_capacity: usize,
    stats: AtomicBusStats,
    state: watch::Sender<ConnectionState>,
    ever_connected: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking subscriber must not take the bus down with it.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            log::debug!("Session {} bus: {prev:?} → {next:?}", self.session_id);
        }
    }

    /// Synchronous fan-out in subscription order.
    fn deliver(&self, event: &SessionEvent) {
        let handlers: Vec<Handler> = lock(&self.subscribers).iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(event);
        }
    }

    fn receive(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Session {}: dropping inbound frame: {e}", self.session_id);
                return;
            }
        };
        if let Some(sid) = envelope.session_id.as_deref() {
            if sid != self.session_id {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Session {}: dropping frame addressed to {sid}", self.session_id);
                return;
            }
        }

        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if self.history_capacity > 0 {
                while history.len() >= self.history_capacity {
                    history.pop_front();
                }
                history.push_back(envelope.event.clone());
            }
        }
        self.deliver(&envelope.event);
    }

    fn discard(&self, reason: &str) {
        self.stats.events_discarded.fetch_add(1, Ordering::Relaxed);
        log::debug!("Session {}: discarded outbound event ({reason})", self.session_id);
    }
}

/// Cloneable send/subscribe capability for one session bus.
#[derive(Clone)]
pub struct BusHandle {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
}

impl BusHandle {
    /// Fire-and-forget publish.
    ///
    /// Errors only for local-only events and after the bus is closed. An
    /// event sent while the connection is down is counted and dropped.
    pub fn send(&self, event: SessionEvent) -> Result<(), BusError> {
        if event.is_local_only() {
            return Err(BusError::LocalOnly(event.type_name()));
        }
        if self.shared.ever_connected.load(Ordering::Acquire) && self.state() != ConnectionState::Connected {
            self.shared.discard("disconnected");
            return Ok(());
        }
        let frame = Envelope::for_session(self.shared.session_id.clone(), event).encode()?;
        self.outbound.send(frame).map_err(|_| BusError::Closed)
    }

    /// Register a handler called for every event, in subscription order.
    ///
    /// Handlers run on the driver task and must not block.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.subscribers).push((id, Arc::new(handler)));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Subscribe by forwarding every event into an unbounded channel.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).len()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Recent inbound events, oldest first.
    pub fn history(&self) -> Vec<SessionEvent> {
        lock(&self.shared.history).iter().cloned().collect()
    }

    pub fn stats(&self) -> BusStats {
        self.shared.stats.snapshot()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }
}

/// Removes its handler from the bus when dropped.
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}

/// Owner of a session bus. Dropping it stops the driver.
pub struct SessionBus {
    handle: BusHandle,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl SessionBus {
    /// Start the driver task for `session_id`. Must be called inside a tokio runtime.
    pub fn connect(config: BusConfig, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let url = config.session_url(&session_id);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            session_id,
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity.min(1024))),
            history_capacity: config.history_capacity,
            stats: AtomicBusStats::default(),
            state,
            ever_connected: AtomicBool::new(false),
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let driver = Driver {
            url,
            config,
            shared: shared.clone(),
            outbound: outbound_rx,
            cancel: cancel.clone(),
            pending: VecDeque::new(),
            timers: Scheduler::new(),
        };
        let driver = tokio::spawn(driver.run());

        Self {
            handle: BusHandle {
                shared,
                outbound: outbound_tx,
            },
            cancel,
            driver: Some(driver),
        }
    }

    pub fn handle(&self) -> BusHandle {
        self.handle.clone()
    }

    pub fn send(&self, event: SessionEvent) -> Result<(), BusError> {
        self.handle.send(event)
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.handle.subscribe(handler)
    }

    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<SessionEvent>) {
        self.handle.subscribe_channel()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.handle.watch_state()
    }

    pub fn history(&self) -> Vec<SessionEvent> {
        self.handle.history()
    }

    pub fn stats(&self) -> BusStats {
        self.handle.stats()
    }

    /// Close the transport, stop reconnecting and wait for the driver to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                log::error!("Session bus driver panicked: {e}");
            }
        }
    }
}

impl Drop for SessionBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Disconnect {
    Lost,
    Shutdown,
}

struct Driver {
    url: String,
    config: BusConfig,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    /// Frames sent before the first connect.
    pending: VecDeque<String>,
    timers: Scheduler<()>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.shared.set_state(ConnectionState::Connecting);
            self.shared.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = tokio::time::timeout(
                    self.config.connect_timeout(),
                    tokio_tungstenite::connect_async(self.url.as_str()),
                ) => res,
            };

            match attempt {
                Ok(Ok((socket, _))) => {
                    log::info!("Session bus connected to {}", self.url);
                    self.shared.ever_connected.store(true, Ordering::Release);
                    self.shared.set_state(ConnectionState::Connected);
                    self.shared.deliver(&SessionEvent::ConnectionRestored);

                    match self.serve(socket).await {
                        Disconnect::Shutdown => break,
                        Disconnect::Lost => {
                            log::warn!("Session bus lost connection to {}", self.url);
                            self.shared.set_state(ConnectionState::Disconnected);
                            self.shared.deliver(&SessionEvent::ConnectionLost);
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::warn!("Session bus connect to {} failed: {e}", self.url);
                    self.shared.set_state(ConnectionState::Disconnected);
                }
                Err(_) => {
                    log::warn!("Session bus connect to {} timed out", self.url);
                    self.shared.set_state(ConnectionState::Disconnected);
                }
            }

            if !self.backoff().await {
                break;
            }
        }

        self.timers.cancel_all();
        self.shared.set_state(ConnectionState::Disconnected);
        log::debug!("Session {} bus driver stopped", self.shared.session_id);
    }

    async fn serve(&mut self, socket: Socket) -> Disconnect {
        let (mut sink, mut stream) = socket.split();

        while let Some(frame) = self.pending.pop_front() {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                log::warn!("Session bus flush failed: {e}");
                return Disconnect::Lost;
            }
            self.shared.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return Disconnect::Shutdown;
                }

                frame = self.outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            log::warn!("Session bus send failed: {e}");
                            self.shared.discard("send failed");
                            return Disconnect::Lost;
                        }
                        self.shared.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        let _ = sink.close().await;
                        return Disconnect::Shutdown;
                    }
                },

                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.shared.receive(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.shared.receive(text),
                        Err(_) => {
                            self.shared.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                            log::warn!("Session bus: {}", ProtocolError::InvalidUtf8);
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => return Disconnect::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("Session bus read error: {e}");
                        return Disconnect::Lost;
                    }
                },
            }
        }
    }

    /// Wait out the reconnect delay. Returns `false` on shutdown.
    async fn backoff(&mut self) -> bool {
        self.timers.schedule_once(self.config.reconnect_delay(), ());
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = self.timers.next_due() => return true,
                frame = self.outbound.recv() => match frame {
                    Some(frame) => self.hold(frame),
                    None => return false,
                },
            }
        }
    }

    fn hold(&mut self, frame: String) {
        if self.shared.ever_connected.load(Ordering::Acquire) {
            self.shared.discard("disconnected");
            return;
        }
        if self.pending.len() >= self.config.pending_capacity {
            self.pending.pop_front();
            self.shared.discard("pending buffer full");
        }
        if self.config.pending_capacity > 0 {
            self.pending.push_back(frame);
        }
    }
}
