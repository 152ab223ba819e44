//! # reel-collab: Real-time collaboration layer for the reel editor
//!
//! Keeps several viewers of one project in step: shared playback, live
//! cursors, edit and render notices.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   JSON / WebSocket   ┌──────────────┐
//! │ SessionBus    │ ◄──────────────────► │ RelayServer  │
//! │ (per viewer)  │   ws://…/{session}   │ (dev relay)  │
//! └──────┬────────┘                      └──────┬───────┘
//!        │ events                               │
//!        ▼                                      ▼
//! ┌───────────────┐                      ┌──────────────┐
//! │ EditorSession │──► coordinator       │ RelayRoom    │
//! │ (event loop)  │──► presence          │ (fan-out)    │
//! └───────────────┘──► notifications     └──────────────┘
//!                 └──► render tracker
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events
//! - [`scheduler`]: deadline scheduler for every session timer
//! - [`bus`]: reconnecting WebSocket pub/sub
//! - [`presence`]: collaborators and remote cursors
//! - [`notify`]: user-facing notices
//! - [`render`]: render job tracking (push + poll)
//! - [`services`]: render backend and project store interfaces
//! - [`session`]: the per-view event loop
//! - [`broadcast`], [`relay`]: development relay server

pub mod broadcast;
pub mod bus;
pub mod config;
pub mod notify;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod render;
pub mod scheduler;
pub mod services;
pub mod session;

pub use broadcast::{RelayFrame, RelayRoom, RoomManager, RoomStats};
pub use bus::{BusConfig, BusError, BusHandle, BusStats, ConnectionState, SessionBus, Subscription};
pub use config::{AutosaveConfig, CollabConfig, ConfigError};
pub use notify::{
    Notification, NotificationAction, NotificationDispatcher, NotificationDraft, NotificationKind, NotifyConfig,
};
pub use presence::{
    Collaborator, CursorColor, CursorState, CursorThrottle, CursorView, PresenceConfig, PresenceRegistry,
};
pub use protocol::{CursorPosition, Direction, Envelope, ProtocolError, RenderSettings, SessionEvent, UserInfo};
pub use relay::{RelayConfig, RelayError, RelayServer, RelayStats};
pub use render::{
    RenderConfig, RenderError, RenderJob, RenderRequest, RenderStatus, RenderTracker, RenderTransition, ResolvedBy,
};
pub use scheduler::{Scheduler, TaskHandle};
pub use services::{
    HttpRenderBackend, InMemoryProjectStore, ProjectDocument, ProjectStore, RenderBackend, RenderStatusReport,
    ServiceError, WaveformProvider,
};
pub use session::{
    EditorSession, RemotePublisher, SessionError, SessionHandle, SessionIdentity, SessionServices, SessionSnapshot,
};
