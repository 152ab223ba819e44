//! Session configuration, loadable from a JSON file.
//!
//! Every section is optional; missing fields take their defaults. Durations
//! are plain millisecond integers:
//!
//! ```json
//! {
//!   "bus": { "server_url": "ws://relay.local:9090", "reconnect_delay_ms": 3000 },
//!   "sync": { "debounce_ms": 50 },
//!   "render": { "poll_interval_ms": 2000 },
//!   "autosave": { "delay_ms": 5000 }
//! }
//! ```

use reel_core::{SyncConfig, SyncConfigError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::bus::BusConfig;
use crate::notify::NotifyConfig;
use crate::presence::PresenceConfig;
use crate::render::RenderConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    pub sync: SyncConfig,
    pub bus: BusConfig,
    pub presence: PresenceConfig,
    pub notify: NotifyConfig,
    pub render: RenderConfig,
    pub autosave: AutosaveConfig,
}

/// Saving the loaded project after edits go quiet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub enabled: bool,
    /// Quiet period after the last transcript or style edit.
    pub delay_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 5_000,
        }
    }
}

impl AutosaveConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid sync settings: {0}")]
    Sync(#[from] SyncConfigError),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl CollabConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: CollabConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded collaboration config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync.validate()?;

        let url = &self.bus.server_url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                field: "bus.server_url",
                reason: format!("expected a ws:// or wss:// URL, got {url:?}"),
            });
        }
        if self.bus.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "bus.reconnect_delay_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.presence.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "presence.sweep_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.render.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "render.poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.autosave.enabled && self.autosave.delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "autosave.delay_ms",
                reason: "must be greater than zero when autosave is enabled".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config = CollabConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CollabConfig::default());
        assert_eq!(config.bus.reconnect_delay_ms, 5_000);
        assert_eq!(config.presence.cursor_timeout_ms, 5_000);
        assert_eq!(config.render.poll_interval_ms, 2_000);
        assert_eq!(config.sync.debounce_ms, 50);
        assert_eq!(config.autosave.delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_sections() {
        let config = CollabConfig::from_json_str(
            r#"{"bus":{"server_url":"wss://relay.example/ws","reconnect_delay_ms":250},"notify":{"max_active":5}}"#,
        )
        .unwrap();
        assert_eq!(config.bus.server_url, "wss://relay.example/ws");
        assert_eq!(config.bus.reconnect_delay_ms, 250);
        assert_eq!(config.bus.history_capacity, 100);
        assert_eq!(config.notify.max_active, Some(5));
        assert!(config.notify.enabled);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = CollabConfig::from_json_str(r#"{"bus":{"server_url":"http://x"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "bus.server_url", .. }));

        let err = CollabConfig::from_json_str(r#"{"sync":{"time_tolerance":-1.0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Sync(_)));

        assert!(matches!(CollabConfig::from_json_str("[1,2"), Err(ConfigError::Parse(_))));

        let err = CollabConfig::from_json_str(r#"{"autosave":{"delay_ms":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "autosave.delay_ms", .. }));
        let off = CollabConfig::from_json_str(r#"{"autosave":{"enabled":false,"delay_ms":0}}"#).unwrap();
        assert!(!off.autosave.enabled);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CollabConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
