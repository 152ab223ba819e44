//! Canonical playback state and its per-field version counters.

use serde::{Deserialize, Serialize};

/// Shared transport state for one editing session.
///
/// Exactly one mutable instance exists per session and it lives inside the
/// [`TimeSyncCoordinator`](crate::coordinator::TimeSyncCoordinator). Every
/// other component works with copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Playhead position in seconds.
    pub current_time: f64,
    /// Media duration in seconds (0 until the video surface reports it).
    pub duration: f64,
    pub is_playing: bool,
    /// Speed multiplier, always > 0.
    pub playback_rate: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: 0.0,
            is_playing: false,
            playback_rate: 1.0,
        }
    }
}

impl PlaybackState {
    /// Clamp a candidate playhead position into the valid range.
    ///
    /// With a known duration the range is `[0, duration]`; before the duration
    /// is known only the lower bound applies.
    pub fn clamp_time(&self, seconds: f64) -> f64 {
        let lower = seconds.max(0.0);
        if self.duration > 0.0 {
            lower.min(self.duration)
        } else {
            lower
        }
    }

    /// Playhead position as a fraction of the duration, `0.0` when unknown.
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Whether the position invariant holds.
    pub fn is_consistent(&self) -> bool {
        self.current_time >= 0.0
            && (self.duration <= 0.0 || self.current_time <= self.duration)
            && self.playback_rate > 0.0
    }
}

/// Monotonic per-field change counters.
///
/// Bumped every time the coordinator accepts a change to the matching field.
/// Proposals may quote the version they were derived from so that a value
/// computed from an outdated snapshot can be recognised and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackVersions {
    pub time: u64,
    pub play_state: u64,
    pub rate: u64,
}

/// Immutable copy of the coordinator's state handed to other components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub versions: PlaybackVersions,
}
