//! Presence: who is in the session and where their cursors are.
//!
//! ```text
//! bus event ──► PresenceRegistry::apply()
//!                 ├─ user_joined   → collaborators (join order)
//!                 ├─ user_left     → drop collaborator + cursor
//!                 └─ cursor_update → cursors[user_id].last_seen = now
//!
//! every 1s   ──► PresenceRegistry::sweep(now)   evicts cursors idle > 5s
//! ```
//!
//! The registry is a pure reducer; the session loop feeds it events and time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

use crate::protocol::{CursorPosition, SessionEvent, UserInfo};

/// Presence tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Cursors not refreshed within this window are evicted.
    pub cursor_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    /// Minimum spacing of outbound cursor updates.
    pub cursor_throttle_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            cursor_timeout_ms: 5_000,
            sweep_interval_ms: 1_000,
            cursor_throttle_ms: 100,
        }
    }
}

impl PresenceConfig {
    pub fn cursor_timeout(&self) -> Duration {
        Duration::from_millis(self.cursor_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn cursor_throttle(&self) -> Duration {
        Duration::from_millis(self.cursor_throttle_ms)
    }
}

/// RGB cursor color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl CursorColor {
    /// Stable, saturated color derived from a user id.
    ///
    /// Uses FNV-1a so the color is identical across processes and runs.
    pub fn from_user_id(id: &str) -> Self {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in id.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        let hue = ((hash % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b }
    }

    /// `#rrggbb`.
    pub fn to_hex(&self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", channel(self.r), channel(self.g), channel(self.b))
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// A participant in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collaborator {
    pub id: String,
    pub name: String,
    pub color: String,
}

impl Collaborator {
    fn from_user(user: &UserInfo) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            color: user
                .color
                .clone()
                .unwrap_or_else(|| CursorColor::from_user_id(&user.id).to_hex()),
        }
    }
}

/// Last known pointer position of one remote user.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorState {
    pub user_id: String,
    pub x: f64,
    pub y: f64,
    pub component: Option<String>,
    pub last_seen: Instant,
}

/// Cursor resolved against the collaborator set, ready for an overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorView {
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub component: Option<String>,
}

/// Collaborators and their live cursors for one session.
pub struct PresenceRegistry {
    local_user_id: String,
    collaborators: Vec<Collaborator>,
    cursors: HashMap<String, CursorState>,
    cursor_timeout: Duration,
}

impl PresenceRegistry {
    pub fn new(local_user_id: impl Into<String>, config: &PresenceConfig) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            collaborators: Vec::new(),
            cursors: HashMap::new(),
            cursor_timeout: config.cursor_timeout(),
        }
    }

    /// Fold one bus event into the registry. Returns whether anything changed.
    pub fn apply(&mut self, event: &SessionEvent, now: Instant) -> bool {
        // Our own join and cursor echoes are not presence.
        if event.origin_user_id() == Some(self.local_user_id.as_str()) {
            return false;
        }

        match event {
            SessionEvent::UserJoined { user } => {
                let collaborator = Collaborator::from_user(user);
                match self.collaborators.iter_mut().find(|c| c.id == user.id) {
                    Some(existing) if *existing == collaborator => false,
                    Some(existing) => {
                        *existing = collaborator;
                        true
                    }
                    None => {
                        log::debug!("Presence: {} ({}) joined", user.name, user.id);
                        self.collaborators.push(collaborator);
                        true
                    }
                }
            }

            SessionEvent::UserLeft { user_id, .. } => {
                let before = self.collaborators.len();
                self.collaborators.retain(|c| &c.id != user_id);
                let had_cursor = self.cursors.remove(user_id).is_some();
                if before != self.collaborators.len() {
                    log::debug!("Presence: {user_id} left");
                }
                before != self.collaborators.len() || had_cursor
            }

            SessionEvent::CursorUpdate { user_id, cursor } => {
                self.upsert_cursor(user_id, cursor, now);
                true
            }

            // Leaves during the outage were never seen. The relay replays the
            // current members once we rejoin.
            SessionEvent::ConnectionRestored => {
                let changed = !self.collaborators.is_empty() || !self.cursors.is_empty();
                if changed {
                    log::debug!("Presence: reset {} collaborators after reconnect", self.collaborators.len());
                }
                self.clear();
                changed
            }

            _ => false,
        }
    }

    fn upsert_cursor(&mut self, user_id: &str, cursor: &CursorPosition, now: Instant) {
        let state = CursorState {
            user_id: user_id.to_string(),
            x: cursor.x,
            y: cursor.y,
            component: cursor.component.clone(),
            last_seen: now,
        };
        self.cursors.insert(user_id.to_string(), state);
    }

    /// Evict cursors idle for longer than the timeout. Returns evicted user ids.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.cursor_timeout;
        let mut evicted = Vec::new();
        self.cursors.retain(|user_id, cursor| {
            let keep = now.saturating_duration_since(cursor.last_seen) <= timeout;
            if !keep {
                evicted.push(user_id.clone());
            }
            keep
        });
        if !evicted.is_empty() {
            log::trace!("Presence: evicted {} idle cursors", evicted.len());
        }
        evicted
    }

    /// Collaborators in join order.
    pub fn collaborators(&self) -> &[Collaborator] {
        &self.collaborators
    }

    pub fn collaborator(&self, user_id: &str) -> Option<&Collaborator> {
        self.collaborators.iter().find(|c| c.id == user_id)
    }

    pub fn cursor(&self, user_id: &str) -> Option<&CursorState> {
        self.cursors.get(user_id)
    }

    /// Cursors with display name and color resolved, ordered by user id.
    pub fn cursors(&self) -> Vec<CursorView> {
        let mut views: Vec<CursorView> = self
            .cursors
            .values()
            .map(|cursor| {
                let (name, color) = match self.collaborator(&cursor.user_id) {
                    Some(c) => (c.name.clone(), c.color.clone()),
                    None => (
                        "Unknown".to_string(),
                        CursorColor::from_user_id(&cursor.user_id).to_hex(),
                    ),
                };
                CursorView {
                    user_id: cursor.user_id.clone(),
                    name,
                    color,
                    x: cursor.x,
                    y: cursor.y,
                    component: cursor.component.clone(),
                }
            })
            .collect();
        views.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        views
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn clear(&mut self) {
        self.collaborators.clear();
        self.cursors.clear();
    }
}

/// Rate limiter for outbound cursor updates. Excess updates are dropped.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Whether an update may go out at `now`; records it if so.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_sent {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_sent = Some(now);
        true
    }
}
