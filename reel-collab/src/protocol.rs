//! JSON wire protocol for session events.
//!
//! Every frame is a single JSON object with a `type` discriminator:
//! ```text
//! { "session_id": "abc",            <- optional envelope field
//!   "type": "playback_sync",        <- SessionEvent tag
//!   "current_time": 12.5, ... }     <- variant payload, flattened
//! ```
//!
//! A few event types never leave the process (`connection_lost`,
//! `connection_restored`, `auto_save`, `project_error`); the bus synthesizes
//! them locally and refuses to transmit them.

use serde::{Deserialize, Serialize};

/// Collaborator identity as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    /// CSS color string. Receivers derive one from `id` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl UserInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Pointer position within a named UI component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Sender's wall clock in milliseconds. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Output parameters for a render request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub format: String,
    pub quality: String,
    pub resolution: String,
    pub include_subtitles: bool,
    pub subtitle_burn_in: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            format: "mp4".to_string(),
            quality: "high".to_string(),
            resolution: "1920x1080".to_string(),
            include_subtitles: true,
            subtitle_burn_in: true,
        }
    }
}

/// Who may produce an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
    Both,
    /// Synthesized in-process, never transmitted.
    LocalOnly,
}

/// Every event that flows through the session bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    JoinSession {
        user: UserInfo,
    },
    UserJoined {
        user: UserInfo,
    },
    UserLeft {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    CursorUpdate {
        user_id: String,
        cursor: CursorPosition,
    },
    PlaybackSync {
        current_time: f64,
        is_playing: bool,
        user_id: String,
        user_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    TranscriptUpdate {
        project_id: String,
        #[serde(default)]
        user_id: String,
        user_name: String,
        timestamp: i64,
    },
    StyleUpdate {
        project_id: String,
        #[serde(default)]
        user_id: String,
        user_name: String,
        timestamp: i64,
    },
    RenderStarted {
        render_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<RenderSettings>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    RenderProgress {
        render_id: String,
        progress: f64,
    },
    RenderCompleted {
        render_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_url: Option<String>,
    },
    RenderFailed {
        render_id: String,
        error: String,
    },
    ConnectionLost,
    ConnectionRestored,
    ConflictDetected {
        user_name: String,
        section: String,
    },
    AutoSave {
        project_id: String,
    },
    ProjectError {
        operation: String,
        error: String,
    },
}

impl SessionEvent {
    /// The `type` tag as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            SessionEvent::JoinSession { .. } => "join_session",
            SessionEvent::UserJoined { .. } => "user_joined",
            SessionEvent::UserLeft { .. } => "user_left",
            SessionEvent::CursorUpdate { .. } => "cursor_update",
            SessionEvent::PlaybackSync { .. } => "playback_sync",
            SessionEvent::TranscriptUpdate { .. } => "transcript_update",
            SessionEvent::StyleUpdate { .. } => "style_update",
            SessionEvent::RenderStarted { .. } => "render_started",
            SessionEvent::RenderProgress { .. } => "render_progress",
            SessionEvent::RenderCompleted { .. } => "render_completed",
            SessionEvent::RenderFailed { .. } => "render_failed",
            SessionEvent::ConnectionLost => "connection_lost",
            SessionEvent::ConnectionRestored => "connection_restored",
            SessionEvent::ConflictDetected { .. } => "conflict_detected",
            SessionEvent::AutoSave { .. } => "auto_save",
            SessionEvent::ProjectError { .. } => "project_error",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            SessionEvent::JoinSession { .. } => Direction::ClientToServer,
            SessionEvent::UserJoined { .. }
            | SessionEvent::UserLeft { .. }
            | SessionEvent::RenderProgress { .. }
            | SessionEvent::RenderCompleted { .. }
            | SessionEvent::RenderFailed { .. }
            | SessionEvent::ConflictDetected { .. } => Direction::ServerToClient,
            SessionEvent::CursorUpdate { .. }
            | SessionEvent::PlaybackSync { .. }
            | SessionEvent::TranscriptUpdate { .. }
            | SessionEvent::StyleUpdate { .. }
            | SessionEvent::RenderStarted { .. } => Direction::Both,
            SessionEvent::ConnectionLost
            | SessionEvent::ConnectionRestored
            | SessionEvent::AutoSave { .. }
            | SessionEvent::ProjectError { .. } => Direction::LocalOnly,
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.direction() == Direction::LocalOnly
    }

    /// Id of the user who caused the event, when the event names one.
    pub fn origin_user_id(&self) -> Option<&str> {
        match self {
            SessionEvent::JoinSession { user } | SessionEvent::UserJoined { user } => Some(&user.id),
            SessionEvent::UserLeft { user_id, .. }
            | SessionEvent::CursorUpdate { user_id, .. }
            | SessionEvent::PlaybackSync { user_id, .. } => Some(user_id),
            SessionEvent::TranscriptUpdate { user_id, .. } | SessionEvent::StyleUpdate { user_id, .. } => {
                if user_id.is_empty() {
                    None
                } else {
                    Some(user_id)
                }
            }
            _ => None,
        }
    }

    /// Render id for render lifecycle events.
    pub fn render_id(&self) -> Option<&str> {
        match self {
            SessionEvent::RenderStarted { render_id, .. }
            | SessionEvent::RenderProgress { render_id, .. }
            | SessionEvent::RenderCompleted { render_id, .. }
            | SessionEvent::RenderFailed { render_id, .. } => Some(render_id),
            _ => None,
        }
    }
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl Envelope {
    pub fn new(event: SessionEvent) -> Self {
        Self { session_id: None, event }
    }

    pub fn for_session(session_id: impl Into<String>, event: SessionEvent) -> Self {
        Self {
            session_id: Some(session_id.into()),
            event,
        }
    }

    /// Serialize to a text frame. Local-only events are refused.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        if self.event.is_local_only() {
            return Err(ProtocolError::LocalOnly(self.event.type_name()));
        }
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    /// Parse a text frame. Local-only types are not accepted from the wire.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        if envelope.event.is_local_only() {
            return Err(ProtocolError::LocalOnly(envelope.event.type_name()));
        }
        Ok(envelope)
    }
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Event type `{0}` is local-only")]
    LocalOnly(&'static str),
    #[error("Binary frame is not valid UTF-8")]
    InvalidUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_sync_wire_shape() {
        let env = Envelope::for_session(
            "s1",
            SessionEvent::PlaybackSync {
                current_time: 12.5,
                is_playing: true,
                user_id: "u1".into(),
                user_name: "Ana".into(),
                timestamp: None,
            },
        );
        let json: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "playback_sync");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["current_time"], 12.5);
        assert_eq!(json["user_name"], "Ana");
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_decode_server_frames() {
        let joined = Envelope::decode(r##"{"type":"user_joined","user":{"id":"u2","name":"Bo","color":"#ff0000"}}"##)
            .unwrap();
        assert_eq!(
            joined.event,
            SessionEvent::UserJoined {
                user: UserInfo::new("u2", "Bo").with_color("#ff0000")
            }
        );
        assert!(joined.session_id.is_none());

        let done = Envelope::decode(r#"{"type":"render_completed","render_id":"r9","output_url":"/out.mp4"}"#).unwrap();
        assert_eq!(done.event.render_id(), Some("r9"));
        assert_eq!(done.event.direction(), Direction::ServerToClient);
    }

    #[test]
    fn test_cursor_update_optional_fields() {
        let env = Envelope::decode(r#"{"type":"cursor_update","user_id":"u3","cursor":{"x":1,"y":2}}"#).unwrap();
        match env.event {
            SessionEvent::CursorUpdate { user_id, cursor } => {
                assert_eq!(user_id, "u3");
                assert_eq!(cursor.x, 1.0);
                assert!(cursor.component.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_local_only_never_encoded() {
        let err = Envelope::new(SessionEvent::ConnectionLost).encode().unwrap_err();
        assert!(matches!(err, ProtocolError::LocalOnly("connection_lost")));

        let err = Envelope::decode(r#"{"type":"auto_save","project_id":"p"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::LocalOnly("auto_save")));
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(matches!(Envelope::decode("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(Envelope::decode(r#"{"type":"no_such_event"}"#), Err(ProtocolError::Malformed(_))));
        // Missing required payload field.
        assert!(Envelope::decode(r#"{"type":"render_failed","render_id":"r1"}"#).is_err());
    }

    #[test]
    fn test_render_settings_defaults() {
        let settings: RenderSettings = serde_json::from_str(r#"{"quality":"medium"}"#).unwrap();
        assert_eq!(settings.format, "mp4");
        assert_eq!(settings.quality, "medium");
        assert_eq!(settings.resolution, "1920x1080");
        assert!(settings.include_subtitles && settings.subtitle_burn_in);
    }

    #[test]
    fn test_origin_user_id() {
        let edit = SessionEvent::TranscriptUpdate {
            project_id: "p".into(),
            user_id: String::new(),
            user_name: "Ana".into(),
            timestamp: 0,
        };
        assert_eq!(edit.origin_user_id(), None);
        let left = SessionEvent::UserLeft { user_id: "u1".into(), user_name: None };
        assert_eq!(left.origin_user_id(), Some("u1"));
        assert_eq!(left.type_name(), "user_left");
    }
}
