//! Notification dispatcher.
//!
//! Turns bus events and local signals into user-facing notices with a
//! per-kind lifetime. The session schedules one expiry task per notice.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

use crate::protocol::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
    Collaboration,
    Render,
    Playback,
}

impl NotificationKind {
    pub fn default_ttl(&self) -> Duration {
        let ms = match self {
            NotificationKind::Success => 4_000,
            NotificationKind::Error => 6_000,
            NotificationKind::Warning => 5_000,
            NotificationKind::Info => 3_000,
            NotificationKind::Collaboration => 3_000,
            NotificationKind::Render => 4_000,
            NotificationKind::Playback => 2_000,
        };
        Duration::from_millis(ms)
    }

    /// Identical notices of this kind raised closer together than this are
    /// collapsed into the one already showing.
    pub fn min_interval(&self) -> Option<Duration> {
        match self {
            NotificationKind::Playback | NotificationKind::Collaboration | NotificationKind::Info => {
                Some(self.default_ttl())
            }
            _ => None,
        }
    }
}

/// What the notice offers to do when clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NotificationAction {
    ViewChanges,
    ViewStyles,
    ViewProgress,
    Download { url: String },
    Retry,
    Resolve { section: String },
}

impl NotificationAction {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationAction::ViewChanges => "View Changes",
            NotificationAction::ViewStyles => "View Styles",
            NotificationAction::ViewProgress => "View Progress",
            NotificationAction::Download { .. } => "Download",
            NotificationAction::Retry => "Retry",
            NotificationAction::Resolve { .. } => "Resolve",
        }
    }
}

/// A classified notice that has not been queued yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub action: Option<NotificationAction>,
    pub ttl: Duration,
}

impl NotificationDraft {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            action: None,
            ttl: kind.default_ttl(),
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub created_at: Instant,
    pub ttl: Duration,
    pub action: Option<NotificationAction>,
}

impl Notification {
    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    /// Oldest notices are dropped beyond this many. `None` means unbounded.
    pub max_active: Option<usize>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_active: None,
        }
    }
}

pub struct NotificationDispatcher {
    local_user_id: String,
    enabled: bool,
    max_active: Option<usize>,
    /// Set by `connection_lost`, cleared by the following restore.
    connection_lost: bool,
    active: VecDeque<Notification>,
    next_id: u64,
}

impl NotificationDispatcher {
    pub fn new(local_user_id: impl Into<String>, config: &NotifyConfig) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            enabled: config.enabled,
            max_active: config.max_active,
            connection_lost: false,
            active: VecDeque::new(),
            next_id: 1,
        }
    }

    fn is_self(&self, user_id: &str) -> bool {
        !user_id.is_empty() && user_id == self.local_user_id
    }

    /// Map an event to a notice, if it warrants one.
    pub fn classify(&self, event: &SessionEvent) -> Option<NotificationDraft> {
        use NotificationKind::*;

        let draft = match event {
            SessionEvent::UserJoined { user } => NotificationDraft::new(
                Collaboration,
                "User Joined",
                format!("{} joined the session", user.name),
            ),
            SessionEvent::UserLeft { user_name, .. } => NotificationDraft::new(
                Collaboration,
                "User Left",
                format!("{} left the session", user_name.as_deref().unwrap_or("A user")),
            ),
            SessionEvent::TranscriptUpdate { user_id, user_name, .. } => {
                if self.is_self(user_id) {
                    return None;
                }
                NotificationDraft::new(Info, "Transcript Updated", format!("{user_name} updated the transcript"))
                    .with_action(NotificationAction::ViewChanges)
            }
            SessionEvent::StyleUpdate { user_id, user_name, .. } => {
                if self.is_self(user_id) {
                    return None;
                }
                NotificationDraft::new(Info, "Styles Updated", format!("{user_name} updated subtitle styles"))
                    .with_action(NotificationAction::ViewStyles)
            }
            SessionEvent::PlaybackSync { user_id, user_name, is_playing, .. } => {
                if self.is_self(user_id) {
                    return None;
                }
                let verb = if *is_playing { "started" } else { "paused" };
                NotificationDraft::new(Playback, "Playback Sync", format!("{user_name} {verb} playback"))
            }
            SessionEvent::RenderStarted { user_name, .. } => NotificationDraft::new(
                Render,
                "Render Started",
                format!("{} started rendering the video", user_name.as_deref().unwrap_or("Someone")),
            )
            .with_action(NotificationAction::ViewProgress),
            SessionEvent::RenderCompleted { output_url, .. } => {
                let draft = NotificationDraft::new(Success, "Render Completed", "Video render completed successfully");
                match output_url {
                    Some(url) => draft.with_action(NotificationAction::Download { url: url.clone() }),
                    None => draft,
                }
            }
            SessionEvent::RenderFailed { error, .. } => {
                NotificationDraft::new(Error, "Render Failed", format!("Render failed: {error}"))
                    .with_action(NotificationAction::Retry)
            }
            SessionEvent::ConnectionLost => NotificationDraft::new(
                Warning,
                "Connection Lost",
                "Lost connection to server. Attempting to reconnect...",
            ),
            SessionEvent::ConnectionRestored => {
                // The first connect is not a restore.
                if !self.connection_lost {
                    return None;
                }
                NotificationDraft::new(Success, "Connection Restored", "Successfully reconnected to server")
            }
            SessionEvent::AutoSave { .. } => {
                NotificationDraft::new(Info, "Auto-saved", "Your changes have been automatically saved")
            }
            SessionEvent::ConflictDetected { user_name, section } => {
                NotificationDraft::new(Warning, "Edit Conflict", format!("{user_name} is editing the same section"))
                    .with_action(NotificationAction::Resolve { section: section.clone() })
            }
            SessionEvent::ProjectError { operation, error } => {
                NotificationDraft::new(Error, "Project Error", format!("Failed to {operation} project: {error}"))
                    .with_action(NotificationAction::Retry)
            }
            SessionEvent::JoinSession { .. }
            | SessionEvent::CursorUpdate { .. }
            | SessionEvent::RenderProgress { .. } => return None,
        };
        Some(draft)
    }

    /// Classify and enqueue. Returns the queued notice.
    pub fn notify(&mut self, event: &SessionEvent, now: Instant) -> Option<&Notification> {
        let draft = if self.enabled { self.classify(event) } else { None };
        match event {
            SessionEvent::ConnectionLost => self.connection_lost = true,
            SessionEvent::ConnectionRestored => self.connection_lost = false,
            _ => {}
        }
        let draft = draft?;
        self.push(draft, now)
    }

    /// Enqueue a notice directly. Returns `None` when disabled or when an
    /// identical notice is still inside its kind's throttle window.
    pub fn push(&mut self, draft: NotificationDraft, now: Instant) -> Option<&Notification> {
        if !self.enabled {
            return None;
        }
        if self.is_throttled(&draft, now) {
            log::trace!("Throttled repeat notice: {}", draft.title);
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;

        if let Some(max) = self.max_active {
            while max > 0 && self.active.len() >= max {
                self.active.pop_front();
            }
        }

        log::debug!("Notification #{id}: {} ({:?})", draft.title, draft.kind);
        self.active.push_back(Notification {
            id,
            kind: draft.kind,
            title: draft.title,
            message: draft.message,
            created_at: now,
            ttl: draft.ttl,
            action: draft.action,
        });
        self.active.back()
    }

    fn is_throttled(&self, draft: &NotificationDraft, now: Instant) -> bool {
        let Some(interval) = draft.kind.min_interval() else {
            return false;
        };
        self.active.iter().any(|n| {
            n.kind == draft.kind
                && n.title == draft.title
                && n.message == draft.message
                && now.saturating_duration_since(n.created_at) < interval
        })
    }

    /// Drop every notice whose lifetime has passed. Returns removed ids.
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let mut removed = Vec::new();
        self.active.retain(|n| {
            let expired = n.is_expired(now);
            if expired {
                removed.push(n.id);
            }
            !expired
        });
        removed
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.active.len();
        self.active.retain(|n| n.id != id);
        before != self.active.len()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    /// Active notices, oldest first.
    pub fn active(&self) -> impl Iterator<Item = &Notification> {
        self.active.iter()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
