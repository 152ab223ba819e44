//! Adapters between the coordinator and position-bearing surfaces.
//!
//! The video player and the waveform timeline both expose the same narrow
//! interface ([`PositionSource`]). They differ only in how they prefer to be
//! sought: the player by seconds, the waveform by fraction of the duration.

use crate::coordinator::SourceAdapter;
use crate::playback::PlaybackState;
use crate::source::{SyncField, SyncSource};

/// Where to move a surface's playhead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    Seconds(f64),
    /// Position in `[0, 1]` relative to the duration.
    Fraction(f64),
}

/// External playback-position surface.
///
/// The surface reports its own changes by proposing them to the coordinator;
/// this trait covers the other direction.
pub trait PositionSource: Send {
    fn current_time(&self) -> f64;

    fn duration(&self) -> f64;

    fn seek_to(&mut self, target: SeekTarget);

    /// Surfaces without transport controls (the waveform) ignore this.
    fn set_playing(&mut self, _playing: bool) {}

    fn set_rate(&mut self, _rate: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Seconds,
    Fraction,
}

/// Drift (seconds) below which a surface is left alone.
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 0.1;

/// [`SourceAdapter`] over any [`PositionSource`].
pub struct PositionAdapter<P> {
    source: SyncSource,
    surface: P,
    mode: SeekMode,
    drift_threshold: f64,
}

impl<P: PositionSource> PositionAdapter<P> {
    pub fn new(source: SyncSource, surface: P, mode: SeekMode) -> Self {
        Self {
            source,
            surface,
            mode,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
        }
    }

    /// Video surface: seeks by seconds.
    pub fn video(surface: P) -> Self {
        Self::new(SyncSource::Video, surface, SeekMode::Seconds)
    }

    /// Waveform/timeline surface: seeks by fraction.
    pub fn timeline(surface: P) -> Self {
        Self::new(SyncSource::Timeline, surface, SeekMode::Fraction)
    }

    pub fn with_drift_threshold(mut self, seconds: f64) -> Self {
        self.drift_threshold = seconds.max(0.0);
        self
    }

    pub fn surface(&self) -> &P {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut P {
        &mut self.surface
    }

    fn sync_time(&mut self, state: &PlaybackState) {
        let drift = (self.surface.current_time() - state.current_time).abs();
        if drift <= self.drift_threshold {
            return;
        }
        match self.mode {
            SeekMode::Seconds => self.surface.seek_to(SeekTarget::Seconds(state.current_time)),
            SeekMode::Fraction => {
                // Without a duration there is no meaningful fraction yet.
                if state.duration > 0.0 {
                    self.surface.seek_to(SeekTarget::Fraction(state.progress()));
                }
            }
        }
    }
}

impl<P: PositionSource> SourceAdapter for PositionAdapter<P> {
    fn source(&self) -> SyncSource {
        self.source
    }

    fn apply(&mut self, field: SyncField, state: &PlaybackState) {
        match field {
            SyncField::Time => self.sync_time(state),
            SyncField::PlayState => self.surface.set_playing(state.is_playing),
            SyncField::Rate => self.surface.set_rate(state.playback_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSurface {
        time: f64,
        duration: f64,
        playing: bool,
        rate: f64,
        seeks: Vec<SeekTarget>,
    }

    impl PositionSource for FakeSurface {
        fn current_time(&self) -> f64 {
            self.time
        }

        fn duration(&self) -> f64 {
            self.duration
        }

        fn seek_to(&mut self, target: SeekTarget) {
            self.time = match target {
                SeekTarget::Seconds(s) => s,
                SeekTarget::Fraction(f) => f * self.duration,
            };
            self.seeks.push(target);
        }

        fn set_playing(&mut self, playing: bool) {
            self.playing = playing;
        }

        fn set_rate(&mut self, rate: f64) {
            self.rate = rate;
        }
    }

    fn state(time: f64, duration: f64) -> PlaybackState {
        PlaybackState {
            current_time: time,
            duration,
            ..PlaybackState::default()
        }
    }

    #[test]
    fn test_video_seeks_by_seconds() {
        let mut adapter = PositionAdapter::video(FakeSurface { duration: 100.0, ..Default::default() });
        adapter.apply(SyncField::Time, &state(42.0, 100.0));
        assert_eq!(adapter.surface().seeks, vec![SeekTarget::Seconds(42.0)]);
        assert_eq!(adapter.source(), SyncSource::Video);
    }

    #[test]
    fn test_timeline_seeks_by_fraction() {
        let mut adapter = PositionAdapter::timeline(FakeSurface { duration: 200.0, ..Default::default() });
        adapter.apply(SyncField::Time, &state(50.0, 200.0));
        assert_eq!(adapter.surface().seeks, vec![SeekTarget::Fraction(0.25)]);
        assert!((adapter.surface().current_time() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_drift_left_alone() {
        let mut adapter = PositionAdapter::video(FakeSurface { time: 10.05, ..Default::default() });
        adapter.apply(SyncField::Time, &state(10.0, 60.0));
        assert!(adapter.surface().seeks.is_empty());
    }

    #[test]
    fn test_fraction_needs_duration() {
        let mut adapter = PositionAdapter::timeline(FakeSurface::default());
        adapter.apply(SyncField::Time, &state(5.0, 0.0));
        assert!(adapter.surface().seeks.is_empty());
    }

    #[test]
    fn test_transport_fields_forwarded() {
        let mut adapter = PositionAdapter::video(FakeSurface::default());
        let mut st = state(0.0, 10.0);
        st.is_playing = true;
        st.playback_rate = 2.0;
        adapter.apply(SyncField::PlayState, &st);
        adapter.apply(SyncField::Rate, &st);
        assert!(adapter.surface().playing);
        assert_eq!(adapter.surface().rate, 2.0);
    }
}
