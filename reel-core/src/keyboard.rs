//! Keyboard transport shortcuts.

use crate::playback::PlaybackState;
use crate::source::{SyncChange, SyncProposal, SyncSource};

/// Seconds skipped by the seek shortcuts.
pub const SEEK_STEP: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyCommand {
    TogglePlay,
    /// Relative seek in seconds.
    SeekBy(f64),
    SeekToStart,
    SeekToEnd,
}

impl KeyCommand {
    /// Map a DOM-style key code. Shifted arrows belong to selection handling
    /// and are left alone.
    pub fn from_key(code: &str, shift: bool) -> Option<Self> {
        match code {
            "Space" | "KeyK" => Some(KeyCommand::TogglePlay),
            "ArrowLeft" if shift => None,
            "ArrowRight" if shift => None,
            "ArrowLeft" | "KeyJ" => Some(KeyCommand::SeekBy(-SEEK_STEP)),
            "ArrowRight" | "KeyL" => Some(KeyCommand::SeekBy(SEEK_STEP)),
            "Home" => Some(KeyCommand::SeekToStart),
            "End" => Some(KeyCommand::SeekToEnd),
            _ => None,
        }
    }

    /// Keyboard-sourced proposal for this command given the current state.
    ///
    /// Seeks are not clamped here; the coordinator does that on acceptance.
    pub fn proposal(&self, state: &PlaybackState) -> SyncProposal {
        let change = match *self {
            KeyCommand::TogglePlay => SyncChange::PlayState(!state.is_playing),
            KeyCommand::SeekBy(delta) => SyncChange::Time(state.current_time + delta),
            KeyCommand::SeekToStart => SyncChange::Time(0.0),
            KeyCommand::SeekToEnd => SyncChange::Time(state.duration),
        };
        SyncProposal::new(change, SyncSource::Keyboard)
    }
}
