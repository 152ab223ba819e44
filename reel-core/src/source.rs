//! Proposal types: where a change came from and what it wants to change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Origin of a proposed playback change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    Video,
    Timeline,
    Transcript,
    Keyboard,
    /// A collaborator's action relayed through the session bus.
    Remote,
}

impl SyncSource {
    pub const ALL: [SyncSource; 5] = [
        SyncSource::Video,
        SyncSource::Timeline,
        SyncSource::Transcript,
        SyncSource::Keyboard,
        SyncSource::Remote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSource::Video => "video",
            SyncSource::Timeline => "timeline",
            SyncSource::Transcript => "transcript",
            SyncSource::Keyboard => "keyboard",
            SyncSource::Remote => "remote",
        }
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field of [`PlaybackState`](crate::PlaybackState) a proposal targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncField {
    Time,
    PlayState,
    Rate,
}

/// Field together with its proposed value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum SyncChange {
    Time(f64),
    PlayState(bool),
    Rate(f64),
}

impl SyncChange {
    pub fn field(&self) -> SyncField {
        match self {
            SyncChange::Time(_) => SyncField::Time,
            SyncChange::PlayState(_) => SyncField::PlayState,
            SyncChange::Rate(_) => SyncField::Rate,
        }
    }
}

/// An ephemeral request to change the playback state.
///
/// Produced by a source adapter and consumed immediately by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncProposal {
    pub change: SyncChange,
    pub source: SyncSource,
    /// When the source observed the change.
    pub timestamp: Instant,
    /// Field version the value was derived from, if the source tracks it.
    pub based_on: Option<u64>,
}

impl SyncProposal {
    pub fn new(change: SyncChange, source: SyncSource) -> Self {
        Self::at(change, source, Instant::now())
    }

    /// Create a proposal with an explicit observation time.
    pub fn at(change: SyncChange, source: SyncSource, timestamp: Instant) -> Self {
        Self {
            change,
            source,
            timestamp,
            based_on: None,
        }
    }

    pub fn time(seconds: f64, source: SyncSource) -> Self {
        Self::new(SyncChange::Time(seconds), source)
    }

    pub fn play_state(playing: bool, source: SyncSource) -> Self {
        Self::new(SyncChange::PlayState(playing), source)
    }

    pub fn rate(rate: f64, source: SyncSource) -> Self {
        Self::new(SyncChange::Rate(rate), source)
    }

    /// Tag the proposal with the field version it was computed from.
    pub fn based_on(mut self, version: u64) -> Self {
        self.based_on = Some(version);
        self
    }

    pub fn field(&self) -> SyncField {
        self.change.field()
    }
}
