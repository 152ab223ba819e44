//! Time synchronization coordinator.
//!
//! Reconciles one [`PlaybackState`] across surfaces that each run on their
//! own clock and each report changes back, without letting a propagated
//! value bounce between them.
//!
//! ```text
//!  video ──────┐                            ┌─► video adapter
//!  timeline ───┤               ┌─────────┐  ├─► timeline adapter
//!  transcript ─┼── propose() ─►│  state  │──┼─► transcript adapter
//!  keyboard ───┤               └─────────┘  └─► remote adapter (bus)
//!  remote ─────┘                  every adapter except the origin
//! ```
//!
//! Two mechanisms stop feedback:
//!
//! 1. **Debounce + tolerance.** A proposal from a different source than the
//!    last accepted one, arriving inside the debounce window with a value
//!    within tolerance of the current state, is dropped.
//! 2. **Echo guard.** Writing to an adapter arms a short window for that
//!    adapter's source; while it is open, within-tolerance proposals from that
//!    source are treated as the adapter reporting our own write back.
//!
//! The coordinator is driven through `&mut self` from a single event loop,
//! so no proposal can interleave with a propagation in progress.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::playback::{PlaybackSnapshot, PlaybackState, PlaybackVersions};
use crate::source::{SyncChange, SyncField, SyncProposal, SyncSource};

/// Coordinator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum interval between accepted changes from differing sources.
    pub debounce_ms: u64,
    /// How long an adapter's reports are treated as echoes after a write.
    pub echo_suppression_ms: u64,
    /// Time proposals closer than this (seconds) count as "the same value".
    pub time_tolerance: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            echo_suppression_ms: 100,
            time_tolerance: 0.5,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn echo_suppression(&self) -> Duration {
        Duration::from_millis(self.echo_suppression_ms)
    }

    pub fn validate(&self) -> Result<(), SyncConfigError> {
        if !self.time_tolerance.is_finite() || self.time_tolerance < 0.0 {
            return Err(SyncConfigError::InvalidTolerance(self.time_tolerance));
        }
        if self.echo_suppression_ms == 0 {
            return Err(SyncConfigError::ZeroEchoWindow);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncConfigError {
    #[error("time tolerance must be a finite, non-negative number of seconds (got {0})")]
    InvalidTolerance(f64),
    #[error("echo suppression window must be non-zero")]
    ZeroEchoWindow,
}

/// A surface the coordinator pushes corrected state into.
pub trait SourceAdapter: Send {
    /// The source tag this surface uses when it proposes changes.
    fn source(&self) -> SyncSource;

    /// Pull the corrected value of `field` from `state`.
    fn apply(&mut self, field: SyncField, state: &PlaybackState);
}

/// Why a proposal was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Inside the debounce window of another source and within tolerance.
    Debounced,
    /// The source's echo guard is open and the value is within tolerance.
    EchoSuppressed,
    /// Derived from an older field version than the current one.
    StaleVersion,
    /// Non-finite time, or a rate that is not strictly positive.
    InvalidValue,
    /// Identical to the current value.
    Unchanged,
}

/// Result of [`TimeSyncCoordinator::propose`]. Informational only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProposalOutcome {
    Applied {
        /// The change as stored, after clamping.
        change: SyncChange,
        /// Number of adapters that were pushed the new value.
        notified: usize,
    },
    Rejected(RejectReason),
}

impl ProposalOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ProposalOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Accepted {
    source: SyncSource,
    at: Instant,
}

/// Owner of the canonical playback state.
pub struct TimeSyncCoordinator {
    state: PlaybackState,
    versions: PlaybackVersions,
    config: SyncConfig,
    last_accepted: Option<Accepted>,
    /// Echo guard deadline per source.
    guards: HashMap<SyncSource, Instant>,
    adapters: Vec<Box<dyn SourceAdapter>>,
}

impl Default for TimeSyncCoordinator {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl TimeSyncCoordinator {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            state: PlaybackState::default(),
            versions: PlaybackVersions::default(),
            config,
            last_accepted: None,
            guards: HashMap::new(),
            adapters: Vec::new(),
        }
    }

    /// Register a surface. A second adapter for the same source replaces the first.
    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        let source = adapter.source();
        self.adapters.retain(|a| a.source() != source);
        log::debug!("Registered {source} adapter");
        self.adapters.push(adapter);
    }

    /// Remove the adapter for `source`, if any.
    pub fn unregister(&mut self, source: SyncSource) -> bool {
        let before = self.adapters.len();
        self.adapters.retain(|a| a.source() != source);
        self.guards.remove(&source);
        before != self.adapters.len()
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn versions(&self) -> PlaybackVersions {
        self.versions
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state,
            versions: self.versions,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether the echo guard for `source` is open at `now`.
    pub fn is_guarded(&self, source: SyncSource, now: Instant) -> bool {
        self.guards.get(&source).is_some_and(|deadline| now < *deadline)
    }

    /// Offer a change. Accepted changes are stored and pushed to every adapter
    /// except the proposal's origin.
    pub fn propose(&mut self, proposal: SyncProposal) -> ProposalOutcome {
        let now = proposal.timestamp;

        let change = match self.normalize(proposal.change) {
            Some(change) => change,
            None => {
                log::debug!("Rejected invalid {:?} from {}", proposal.change, proposal.source);
                return ProposalOutcome::Rejected(RejectReason::InvalidValue);
            }
        };

        if let Some(base) = proposal.based_on {
            if base < self.version_of(change.field()) {
                log::debug!("Rejected stale {:?} from {} (v{base})", change, proposal.source);
                return ProposalOutcome::Rejected(RejectReason::StaleVersion);
            }
        }

        if self.is_current(change) {
            return ProposalOutcome::Rejected(RejectReason::Unchanged);
        }

        let within_tolerance = self.within_tolerance(change);
        // Remote frames never echo: the relay does not return a sender's own frames.
        let remote = proposal.source == SyncSource::Remote;

        if within_tolerance && !remote && self.is_guarded(proposal.source, now) {
            log::trace!("Suppressed echo {:?} from {}", change, proposal.source);
            return ProposalOutcome::Rejected(RejectReason::EchoSuppressed);
        }

        if !remote && within_tolerance {
            if let Some(last) = self.last_accepted {
                let elapsed = now.saturating_duration_since(last.at);
                if last.source != proposal.source && elapsed < self.config.debounce() {
                    log::trace!(
                        "Debounced {:?} from {} ({}ms after {})",
                        change,
                        proposal.source,
                        elapsed.as_millis(),
                        last.source
                    );
                    return ProposalOutcome::Rejected(RejectReason::Debounced);
                }
            }
        }

        self.store(change);
        self.last_accepted = Some(Accepted {
            source: proposal.source,
            at: now,
        });

        let notified = self.propagate(change.field(), proposal.source, now);
        log::debug!("Applied {:?} from {} → {notified} adapters", change, proposal.source);

        ProposalOutcome::Applied { change, notified }
    }

    /// Update the media duration and re-clamp the playhead.
    ///
    /// Returns `false` for negative or non-finite durations and for no-op updates.
    pub fn set_duration(&mut self, seconds: f64, source: SyncSource, now: Instant) -> bool {
        if !seconds.is_finite() || seconds < 0.0 || seconds == self.state.duration {
            return false;
        }

        self.state.duration = seconds;
        let clamped = self.state.clamp_time(self.state.current_time);
        if clamped != self.state.current_time {
            self.state.current_time = clamped;
        }
        // Fraction-based surfaces need the new duration even when time is unchanged.
        self.versions.time += 1;
        self.propagate(SyncField::Time, source, now);
        true
    }

    /// Push the full current state to every adapter, e.g. after a reconnect.
    pub fn resync_all(&mut self, now: Instant) {
        for field in [SyncField::Time, SyncField::PlayState, SyncField::Rate] {
            for adapter in self.adapters.iter_mut() {
                self.guards.insert(adapter.source(), now + self.config.echo_suppression());
                adapter.apply(field, &self.state);
            }
        }
    }

    fn normalize(&self, change: SyncChange) -> Option<SyncChange> {
        match change {
            SyncChange::Time(t) if t.is_finite() => Some(SyncChange::Time(self.state.clamp_time(t))),
            SyncChange::Time(_) => None,
            SyncChange::Rate(r) if r.is_finite() && r > 0.0 => Some(SyncChange::Rate(r)),
            SyncChange::Rate(_) => None,
            SyncChange::PlayState(p) => Some(SyncChange::PlayState(p)),
        }
    }

    fn is_current(&self, change: SyncChange) -> bool {
        match change {
            SyncChange::Time(t) => t == self.state.current_time,
            SyncChange::PlayState(p) => p == self.state.is_playing,
            SyncChange::Rate(r) => r == self.state.playback_rate,
        }
    }

    fn within_tolerance(&self, change: SyncChange) -> bool {
        match change {
            SyncChange::Time(t) => (t - self.state.current_time).abs() <= self.config.time_tolerance,
            // Exact match only; `is_current` has already filtered equal values.
            SyncChange::PlayState(p) => p == self.state.is_playing,
            SyncChange::Rate(r) => r == self.state.playback_rate,
        }
    }

    fn version_of(&self, field: SyncField) -> u64 {
        match field {
            SyncField::Time => self.versions.time,
            SyncField::PlayState => self.versions.play_state,
            SyncField::Rate => self.versions.rate,
        }
    }

    fn store(&mut self, change: SyncChange) {
        match change {
            SyncChange::Time(t) => {
                self.state.current_time = t;
                self.versions.time += 1;
            }
            SyncChange::PlayState(p) => {
                self.state.is_playing = p;
                self.versions.play_state += 1;
            }
            SyncChange::Rate(r) => {
                self.state.playback_rate = r;
                self.versions.rate += 1;
            }
        }
    }

    fn propagate(&mut self, field: SyncField, origin: SyncSource, now: Instant) -> usize {
        let deadline = now + self.config.echo_suppression();
        let mut notified = 0;
        for adapter in self.adapters.iter_mut() {
            let source = adapter.source();
            if source == origin {
                continue;
            }
            // Guard first so the adapter's change detection sees it as ours.
            self.guards.insert(source, deadline);
            adapter.apply(field, &self.state);
            notified += 1;
        }
        notified
    }
}
