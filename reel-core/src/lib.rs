//! Playback synchronization primitives for the reel editor.
//!
//! Everything here is synchronous and free of I/O. The async session wiring
//! lives in `reel-collab`.

pub mod adapter;
pub mod coordinator;
pub mod keyboard;
pub mod playback;
pub mod source;

pub use adapter::{PositionAdapter, PositionSource, SeekMode, SeekTarget};
pub use coordinator::{
    ProposalOutcome, RejectReason, SourceAdapter, SyncConfig, SyncConfigError, TimeSyncCoordinator,
};
pub use keyboard::KeyCommand;
pub use playback::{PlaybackSnapshot, PlaybackState, PlaybackVersions};
pub use source::{SyncChange, SyncField, SyncProposal, SyncSource};
