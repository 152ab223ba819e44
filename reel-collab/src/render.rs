//! Render-status tracking.
//!
//! A render job is resolved by whichever path reports a terminal status
//! first: push events from the bus or the polling fallback. After that the
//! job is frozen and later reports for its id are ignored.
//!
//! ```text
//!   queued ──► processing ──► completed
//!      │            │
//!      └────────────┴───────► failed
//! ```

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::protocol::{RenderSettings, SessionEvent};
use crate::services::{RenderStatusReport, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RenderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderStatus::Completed | RenderStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            RenderStatus::Queued => 0,
            RenderStatus::Processing => 1,
            RenderStatus::Completed | RenderStatus::Failed => 2,
        }
    }
}

/// Which path delivered the terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Push,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub project_id: String,
    #[serde(default)]
    pub settings: RenderSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderJob {
    pub id: String,
    pub status: RenderStatus,
    /// Percent, 0..=100.
    pub progress: f64,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub resolved_by: Option<ResolvedBy>,
    #[serde(skip)]
    pub request: RenderRequest,
}

impl RenderJob {
    fn new(id: String, request: RenderRequest) -> Self {
        Self {
            id,
            status: RenderStatus::Queued,
            progress: 0.0,
            output_url: None,
            error: None,
            resolved_by: None,
            request,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What an accepted report did to the job.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderTransition {
    Progressed { progress: f64 },
    Completed { output_url: Option<String> },
    Failed { error: String },
}

impl RenderTransition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RenderTransition::Progressed { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Render {0} is still in progress")]
    Busy(String),
    #[error("No render to retry")]
    NothingToRetry,
    #[error("Render backend error: {0}")]
    Backend(#[from] ServiceError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub poll_interval_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 2_000 }
    }
}

impl RenderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Tracks at most one render job for the current view.
pub struct RenderTracker {
    current: Option<RenderJob>,
    poll_interval: Duration,
    last_push: Option<Instant>,
}

impl RenderTracker {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            current: None,
            poll_interval: config.poll_interval(),
            last_push: None,
        }
    }

    pub fn current(&self) -> Option<&RenderJob> {
        self.current.as_ref()
    }

    /// Id of the job still awaiting a terminal status.
    pub fn active_id(&self) -> Option<&str> {
        self.current.as_ref().filter(|job| !job.is_terminal()).map(|job| job.id.as_str())
    }

    /// Fails with `Busy` while a job is still running.
    pub fn ensure_idle(&self) -> Result<(), RenderError> {
        match self.active_id() {
            Some(id) => Err(RenderError::Busy(id.to_string())),
            None => Ok(()),
        }
    }

    /// Start tracking a job the backend has accepted.
    pub fn begin(&mut self, render_id: String, request: RenderRequest) -> Result<&RenderJob, RenderError> {
        self.ensure_idle()?;
        log::info!("Tracking render {render_id} for project {}", request.project_id);
        self.last_push = None;
        Ok(&*self.current.insert(RenderJob::new(render_id, request)))
    }

    /// Apply a pushed lifecycle event.
    pub fn apply_push(&mut self, event: &SessionEvent, now: Instant) -> Option<RenderTransition> {
        let (render_id, report) = match event {
            SessionEvent::RenderProgress { render_id, progress } => (
                render_id,
                RenderStatusReport {
                    status: RenderStatus::Processing,
                    progress: *progress,
                    output_url: None,
                    error: None,
                },
            ),
            SessionEvent::RenderCompleted { render_id, output_url } => (
                render_id,
                RenderStatusReport {
                    status: RenderStatus::Completed,
                    progress: 100.0,
                    output_url: output_url.clone(),
                    error: None,
                },
            ),
            SessionEvent::RenderFailed { render_id, error } => (
                render_id,
                RenderStatusReport {
                    status: RenderStatus::Failed,
                    progress: 0.0,
                    output_url: None,
                    error: Some(error.clone()),
                },
            ),
            _ => return None,
        };
        if self.active_id() != Some(render_id.as_str()) {
            return None;
        }
        self.last_push = Some(now);
        self.apply(&report, ResolvedBy::Push)
    }

    /// Apply a polled status report.
    pub fn apply_poll(&mut self, render_id: &str, report: &RenderStatusReport) -> Option<RenderTransition> {
        if self.active_id() != Some(render_id) {
            return None;
        }
        self.apply(report, ResolvedBy::Poll)
    }

    fn apply(&mut self, report: &RenderStatusReport, path: ResolvedBy) -> Option<RenderTransition> {
        let job = self.current.as_mut()?;
        if report.status.rank() < job.status.rank() {
            return None;
        }

        let progress = report.progress.clamp(0.0, 100.0);
        match report.status {
            RenderStatus::Queued | RenderStatus::Processing => {
                // Progress only moves forward.
                if report.status == job.status && progress <= job.progress {
                    return None;
                }
                job.status = report.status;
                job.progress = job.progress.max(progress);
                Some(RenderTransition::Progressed { progress: job.progress })
            }
            RenderStatus::Completed => {
                job.status = RenderStatus::Completed;
                job.progress = 100.0;
                job.output_url = report.output_url.clone();
                job.resolved_by = Some(path);
                log::info!("Render {} completed ({path:?})", job.id);
                Some(RenderTransition::Completed {
                    output_url: job.output_url.clone(),
                })
            }
            RenderStatus::Failed => {
                let error = report.error.clone().unwrap_or_else(|| "render failed".to_string());
                job.status = RenderStatus::Failed;
                job.error = Some(error.clone());
                job.resolved_by = Some(path);
                log::warn!("Render {} failed ({path:?}): {error}", job.id);
                Some(RenderTransition::Failed { error })
            }
        }
    }

    /// Whether the polling fallback should query now.
    ///
    /// Polling is skipped while push updates keep arriving.
    pub fn should_poll(&self, now: Instant) -> bool {
        if self.active_id().is_none() {
            return false;
        }
        match self.last_push {
            Some(at) => now.saturating_duration_since(at) >= self.poll_interval,
            None => true,
        }
    }

    /// Forget the current job locally. The backend is not told.
    pub fn cancel(&mut self) -> Option<RenderJob> {
        self.last_push = None;
        self.current.take()
    }

    /// Request to resubmit after a failure.
    pub fn retry_request(&self) -> Result<RenderRequest, RenderError> {
        match &self.current {
            Some(job) if job.status == RenderStatus::Failed => Ok(job.request.clone()),
            Some(job) if !job.is_terminal() => Err(RenderError::Busy(job.id.clone())),
            _ => Err(RenderError::NothingToRetry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RenderRequest {
        RenderRequest {
            project_id: "p1".into(),
            settings: RenderSettings::default(),
        }
    }

    fn tracker_with_job(id: &str) -> RenderTracker {
        let mut tracker = RenderTracker::new(&RenderConfig::default());
        tracker.begin(id.to_string(), request()).unwrap();
        tracker
    }

    fn poll(status: RenderStatus, progress: f64) -> RenderStatusReport {
        RenderStatusReport {
            status,
            progress,
            output_url: None,
            error: None,
        }
    }

    #[test]
    fn test_second_start_is_busy() {
        let mut tracker = tracker_with_job("r1");
        assert!(matches!(tracker.begin("r2".into(), request()), Err(RenderError::Busy(id)) if id == "r1"));
        assert_eq!(tracker.current().map(|j| j.id.as_str()), Some("r1"));
    }

    #[test]
    fn test_push_completion_wins() {
        let mut tracker = tracker_with_job("r1");
        let now = Instant::now();
        let done = SessionEvent::RenderCompleted {
            render_id: "r1".into(),
            output_url: Some("/out.mp4".into()),
        };
        assert!(matches!(tracker.apply_push(&done, now), Some(RenderTransition::Completed { .. })));

        // Late poll for the same id is ignored.
        assert!(tracker.apply_poll("r1", &poll(RenderStatus::Failed, 0.0)).is_none());
        let job = tracker.current().unwrap();
        assert_eq!(job.status, RenderStatus::Completed);
        assert_eq!(job.resolved_by, Some(ResolvedBy::Push));
        assert!(!tracker.should_poll(now + Duration::from_secs(10)));
        assert!(tracker.begin("r2".into(), request()).is_ok());
    }

    #[test]
    fn test_poll_resolves_when_push_silent() {
        let mut tracker = tracker_with_job("r1");
        assert!(tracker.should_poll(Instant::now()));
        assert_eq!(
            tracker.apply_poll("r1", &poll(RenderStatus::Processing, 40.0)),
            Some(RenderTransition::Progressed { progress: 40.0 })
        );
        let mut failed = poll(RenderStatus::Failed, 40.0);
        failed.error = Some("codec".into());
        assert_eq!(
            tracker.apply_poll("r1", &failed),
            Some(RenderTransition::Failed { error: "codec".into() })
        );
        assert_eq!(tracker.current().unwrap().resolved_by, Some(ResolvedBy::Poll));
    }

    #[test]
    fn test_status_never_regresses() {
        let mut tracker = tracker_with_job("r1");
        tracker.apply_poll("r1", &poll(RenderStatus::Processing, 50.0));
        assert!(tracker.apply_poll("r1", &poll(RenderStatus::Queued, 0.0)).is_none());
        assert!(tracker.apply_poll("r1", &poll(RenderStatus::Processing, 30.0)).is_none());
        assert_eq!(tracker.current().unwrap().progress, 50.0);
    }

    #[test]
    fn test_foreign_ids_ignored() {
        let mut tracker = tracker_with_job("r1");
        let other = SessionEvent::RenderProgress { render_id: "zz".into(), progress: 90.0 };
        assert!(tracker.apply_push(&other, Instant::now()).is_none());
        assert_eq!(tracker.current().unwrap().progress, 0.0);
    }

    #[test]
    fn test_recent_push_defers_polling() {
        let mut tracker = tracker_with_job("r1");
        let t0 = Instant::now();
        tracker.apply_push(&SessionEvent::RenderProgress { render_id: "r1".into(), progress: 10.0 }, t0);
        assert!(!tracker.should_poll(t0 + Duration::from_millis(1_999)));
        assert!(tracker.should_poll(t0 + Duration::from_millis(2_000)));
    }

    #[test]
    fn test_retry_and_cancel() {
        let mut tracker = tracker_with_job("r1");
        assert!(matches!(tracker.retry_request(), Err(RenderError::Busy(_))));
        tracker.apply_push(
            &SessionEvent::RenderFailed { render_id: "r1".into(), error: "oom".into() },
            Instant::now(),
        );
        assert_eq!(tracker.retry_request().unwrap(), request());

        assert_eq!(tracker.cancel().map(|j| j.id), Some("r1".to_string()));
        assert!(tracker.current().is_none());
        assert!(matches!(tracker.retry_request(), Err(RenderError::NothingToRetry)));
    }
}
