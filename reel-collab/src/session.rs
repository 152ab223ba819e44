//! The editor session event loop.
//!
//! One [`EditorSession`] runs per editing view. It owns the playback
//! coordinator, presence, notifications, the render tracker and a scheduler,
//! and processes one input at a time:
//!
//! ```text
//!   SessionHandle ──commands──┐
//!   SessionBus ─────events────┤
//!   Scheduler ──────due tasks─┼──► EditorSession::run ──► bus / adapters
//!   JoinSet ───poll results───┘
//! ```
//!
//! Nothing in the session is shared; the UI talks to it through a cloneable
//! [`SessionHandle`] and reads state back with [`SessionHandle::snapshot`].

use reel_core::{
    KeyCommand, PlaybackSnapshot, PlaybackState, ProposalOutcome, SourceAdapter, SyncChange, SyncField,
    SyncProposal, SyncSource, TimeSyncCoordinator,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Duration, Instant};

use crate::bus::{BusHandle, ConnectionState, SessionBus};
use crate::config::{AutosaveConfig, CollabConfig};
use crate::notify::{Notification, NotificationAction, NotificationDispatcher, NotificationDraft, NotificationKind};
use crate::presence::{Collaborator, CursorThrottle, CursorView, PresenceRegistry};
use crate::protocol::{CursorPosition, RenderSettings, SessionEvent, UserInfo};
use crate::render::{RenderError, RenderJob, RenderRequest, RenderTracker, RenderTransition};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::services::{ProjectDocument, ProjectStore, RenderBackend, RenderStatusReport, ServiceError};

const COMMAND_CAPACITY: usize = 64;

/// Who is editing what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: String,
    pub project_id: String,
    pub user: UserInfo,
}

/// Backend services the session calls out to.
#[derive(Clone)]
pub struct SessionServices {
    pub render: Arc<dyn RenderBackend>,
    pub projects: Arc<dyn ProjectStore>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session has shut down")]
    Closed,
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Point-in-time view of the session for rendering the UI.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub playback: PlaybackSnapshot,
    pub connection: ConnectionState,
    pub collaborators: Vec<Collaborator>,
    pub cursors: Vec<CursorView>,
    pub notifications: Vec<Notification>,
    pub render: Option<RenderJob>,
    /// Working copy of the loaded project, including unsaved edits.
    pub project: Option<ProjectDocument>,
    /// An autosave is scheduled and has not run yet.
    pub save_pending: bool,
}

enum Command {
    Propose {
        proposal: SyncProposal,
        reply: oneshot::Sender<ProposalOutcome>,
    },
    Key {
        code: String,
        shift: bool,
        reply: oneshot::Sender<Option<ProposalOutcome>>,
    },
    SetDuration {
        seconds: f64,
        reply: oneshot::Sender<bool>,
    },
    CursorMoved(CursorPosition),
    LoadProject {
        reply: oneshot::Sender<Result<ProjectDocument, ServiceError>>,
    },
    TranscriptEdited(serde_json::Value),
    StylesEdited(serde_json::Value),
    StartRender {
        settings: RenderSettings,
        reply: oneshot::Sender<Result<RenderJob, RenderError>>,
    },
    CancelRender {
        reply: oneshot::Sender<Option<RenderJob>>,
    },
    RetryRender {
        reply: oneshot::Sender<Result<RenderJob, RenderError>>,
    },
    SaveProject {
        document: ProjectDocument,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
    DismissNotification {
        id: u64,
        reply: oneshot::Sender<bool>,
    },
    SetNotificationsEnabled(bool),
    RegisterAdapter(Box<dyn SourceAdapter>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Cloneable front door to a running [`EditorSession`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Offer a playback change from a local surface.
    pub async fn propose(&self, proposal: SyncProposal) -> Result<ProposalOutcome, SessionError> {
        self.request(|reply| Command::Propose { proposal, reply }).await
    }

    /// Handle a transport shortcut. `None` when the key is not bound.
    pub async fn key(&self, code: impl Into<String>, shift: bool) -> Result<Option<ProposalOutcome>, SessionError> {
        let code = code.into();
        self.request(|reply| Command::Key { code, shift, reply }).await
    }

    pub async fn set_duration(&self, seconds: f64) -> Result<bool, SessionError> {
        self.request(|reply| Command::SetDuration { seconds, reply }).await
    }

    pub async fn move_cursor(&self, x: f64, y: f64, component: Option<String>) -> Result<(), SessionError> {
        self.send(Command::CursorMoved(CursorPosition {
            x,
            y,
            component,
            timestamp: None,
        }))
        .await
    }

    /// Fetch the session's project and keep it as the working copy that
    /// edits apply to and autosave persists.
    pub async fn load_project(&self) -> Result<ProjectDocument, SessionError> {
        Ok(self.request(|reply| Command::LoadProject { reply }).await??)
    }

    pub async fn transcript_edited(&self, transcript: serde_json::Value) -> Result<(), SessionError> {
        self.send(Command::TranscriptEdited(transcript)).await
    }

    pub async fn styles_edited(&self, styles: serde_json::Value) -> Result<(), SessionError> {
        self.send(Command::StylesEdited(styles)).await
    }

    pub async fn start_render(&self, settings: RenderSettings) -> Result<RenderJob, SessionError> {
        Ok(self.request(|reply| Command::StartRender { settings, reply }).await??)
    }

    /// Stop tracking the current render. Returns the dropped job.
    pub async fn cancel_render(&self) -> Result<Option<RenderJob>, SessionError> {
        self.request(|reply| Command::CancelRender { reply }).await
    }

    pub async fn retry_render(&self) -> Result<RenderJob, SessionError> {
        Ok(self.request(|reply| Command::RetryRender { reply }).await??)
    }

    pub async fn save_project(&self, document: ProjectDocument) -> Result<(), SessionError> {
        Ok(self.request(|reply| Command::SaveProject { document, reply }).await??)
    }

    pub async fn dismiss_notification(&self, id: u64) -> Result<bool, SessionError> {
        self.request(|reply| Command::DismissNotification { id, reply }).await
    }

    pub async fn set_notifications_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.send(Command::SetNotificationsEnabled(enabled)).await
    }

    /// Attach a playback surface to the coordinator.
    pub async fn register_adapter(&self, adapter: Box<dyn SourceAdapter>) -> Result<(), SessionError> {
        self.send(Command::RegisterAdapter(adapter)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    /// Ask the session to tear down. Returns once the request is queued.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Publishes accepted playback changes to collaborators.
///
/// Registered with the coordinator under [`SyncSource::Remote`], so changes
/// that came from the bus are never sent back out.
pub struct RemotePublisher {
    bus: BusHandle,
    user: UserInfo,
    last_sent: Option<(f64, bool)>,
}

impl RemotePublisher {
    pub fn new(bus: BusHandle, user: UserInfo) -> Self {
        Self {
            bus,
            user,
            last_sent: None,
        }
    }

    fn publish(&mut self, state: &PlaybackState) {
        let current = (state.current_time, state.is_playing);
        if self.last_sent == Some(current) {
            return;
        }
        let event = playback_sync(&self.user, state);
        match self.bus.send(event) {
            Ok(()) => self.last_sent = Some(current),
            Err(e) => log::debug!("playback_sync not sent: {e}"),
        }
    }
}

impl SourceAdapter for RemotePublisher {
    fn source(&self) -> SyncSource {
        SyncSource::Remote
    }

    fn apply(&mut self, field: SyncField, state: &PlaybackState) {
        // Rate is local to each viewer.
        if matches!(field, SyncField::Time | SyncField::PlayState) {
            self.publish(state);
        }
    }
}

fn playback_sync(user: &UserInfo, state: &PlaybackState) -> SessionEvent {
    SessionEvent::PlaybackSync {
        current_time: state.current_time,
        is_playing: state.is_playing,
        user_id: user.id.clone(),
        user_name: user.name.clone(),
        timestamp: Some(wall_clock_ms()),
    }
}

fn wall_clock_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionTask {
    CursorSweep,
    ExpireNotification(u64),
    RenderPoll,
    AutoSave,
}

type PollResult = (String, Result<RenderStatusReport, ServiceError>);

pub struct EditorSession {
    identity: SessionIdentity,
    bus: SessionBus,
    services: SessionServices,
    coordinator: TimeSyncCoordinator,
    presence: PresenceRegistry,
    throttle: CursorThrottle,
    notifications: NotificationDispatcher,
    render: RenderTracker,
    scheduler: Scheduler<SessionTask>,
    sweep_interval: Duration,
    poll_interval: Duration,
    poll_task: Option<TaskHandle>,
    polls: JoinSet<PollResult>,
    project: Option<ProjectDocument>,
    autosave: AutosaveConfig,
    autosave_task: Option<TaskHandle>,
    /// Join already sent on the current connection.
    announced: bool,
    /// Collaborators known before a reconnect; their replayed joins are quiet.
    rejoining: Vec<String>,
    commands: mpsc::Receiver<Command>,
}

impl EditorSession {
    /// Build a session over an existing bus.
    pub fn new(
        identity: SessionIdentity,
        config: &CollabConfig,
        bus: SessionBus,
        services: SessionServices,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);

        let mut coordinator = TimeSyncCoordinator::new(config.sync);
        coordinator.register(Box::new(RemotePublisher::new(bus.handle(), identity.user.clone())));

        let local_id = identity.user.id.clone();
        let session = Self {
            presence: PresenceRegistry::new(local_id.clone(), &config.presence),
            throttle: CursorThrottle::new(config.presence.cursor_throttle()),
            notifications: NotificationDispatcher::new(local_id, &config.notify),
            render: RenderTracker::new(&config.render),
            scheduler: Scheduler::new(),
            sweep_interval: config.presence.sweep_interval(),
            poll_interval: config.render.poll_interval(),
            poll_task: None,
            polls: JoinSet::new(),
            project: None,
            autosave: config.autosave.clone(),
            autosave_task: None,
            announced: false,
            rejoining: Vec::new(),
            commands: rx,
            identity,
            bus,
            services,
            coordinator,
        };
        (session, SessionHandle { commands: tx })
    }

    /// Open the bus for `identity.session_id` and build a session over it.
    pub fn connect(
        identity: SessionIdentity,
        config: &CollabConfig,
        services: SessionServices,
    ) -> (Self, SessionHandle) {
        let bus = SessionBus::connect(config.bus.clone(), identity.session_id.clone());
        Self::new(identity, config, bus, services)
    }

    /// Spawn [`run`](Self::run) onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Attach a playback surface before the loop starts.
    pub fn register_adapter(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.coordinator.register(adapter);
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Process inputs until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        let (_subscription, mut events) = self.bus.subscribe_channel();
        self.scheduler.schedule_repeating(self.sweep_interval, SessionTask::CursorSweep);
        // Already connected means the restore event went out before we
        // subscribed. A connect racing this check is deduplicated by `announce`.
        if self.bus.state() == ConnectionState::Connected {
            self.announce();
        }

        log::info!(
            "Session {} started for {} ({})",
            self.identity.session_id,
            self.identity.user.name,
            self.identity.user.id
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = events.recv() => self.handle_event(event),
                (_, task) = self.scheduler.next_due() => self.run_task(task).await,
                Some(joined) = self.polls.join_next(), if !self.polls.is_empty() => self.handle_poll(joined),
            }
        }

        if self.autosave_task.take().is_some() {
            self.flush_autosave().await;
        }
        self.scheduler.cancel_all();
        self.polls.abort_all();
        self.presence.clear();
        self.notifications.clear();
        log::info!("Session {} shut down", self.identity.session_id);
        self.bus.close().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Propose { proposal, reply } => {
                let outcome = self.coordinator.propose(proposal);
                let _ = reply.send(outcome);
            }
            Command::Key { code, shift, reply } => {
                let outcome = KeyCommand::from_key(&code, shift)
                    .map(|key| key.proposal(self.coordinator.state()))
                    .map(|proposal| self.coordinator.propose(proposal));
                let _ = reply.send(outcome);
            }
            Command::SetDuration { seconds, reply } => {
                let changed = self
                    .coordinator
                    .set_duration(seconds, SyncSource::Video, std::time::Instant::now());
                let _ = reply.send(changed);
            }
            Command::CursorMoved(mut cursor) => {
                if self.throttle.try_acquire(Instant::now()) {
                    cursor.timestamp = Some(wall_clock_ms());
                    self.publish(SessionEvent::CursorUpdate {
                        user_id: self.identity.user.id.clone(),
                        cursor,
                    });
                }
            }
            Command::LoadProject { reply } => {
                let result = self.load_project().await;
                let _ = reply.send(result);
            }
            Command::TranscriptEdited(transcript) => {
                if let Some(project) = self.project.as_mut() {
                    project.transcript = transcript;
                }
                self.publish(SessionEvent::TranscriptUpdate {
                    project_id: self.identity.project_id.clone(),
                    user_id: self.identity.user.id.clone(),
                    user_name: self.identity.user.name.clone(),
                    timestamp: wall_clock_ms(),
                });
                self.arm_autosave();
            }
            Command::StylesEdited(styles) => {
                if let Some(project) = self.project.as_mut() {
                    project.subtitle_styles = styles;
                }
                self.publish(SessionEvent::StyleUpdate {
                    project_id: self.identity.project_id.clone(),
                    user_id: self.identity.user.id.clone(),
                    user_name: self.identity.user.name.clone(),
                    timestamp: wall_clock_ms(),
                });
                self.arm_autosave();
            }
            Command::StartRender { settings, reply } => {
                let request = RenderRequest {
                    project_id: self.identity.project_id.clone(),
                    settings,
                };
                let result = self.submit_render(request).await;
                let _ = reply.send(result);
            }
            Command::CancelRender { reply } => {
                self.stop_polling();
                let job = self.render.cancel();
                if let Some(job) = &job {
                    log::info!("Stopped tracking render {}", job.id);
                }
                let _ = reply.send(job);
            }
            Command::RetryRender { reply } => {
                let result = match self.render.retry_request() {
                    Ok(request) => self.submit_render(request).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::SaveProject { document, reply } => {
                if let Some(handle) = self.autosave_task.take() {
                    self.scheduler.cancel(handle);
                }
                let result = self.save_project(&document).await;
                if result.is_ok() && document.id == self.identity.project_id {
                    self.project = Some(document);
                }
                let _ = reply.send(result);
            }
            Command::DismissNotification { id, reply } => {
                let _ = reply.send(self.notifications.dismiss(id));
            }
            Command::SetNotificationsEnabled(enabled) => self.notifications.set_enabled(enabled),
            Command::RegisterAdapter(adapter) => {
                let source = adapter.source();
                self.coordinator.register(adapter);
                log::debug!("Registered {source} adapter");
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        let now = Instant::now();
        if matches!(event, SessionEvent::ConnectionRestored) {
            self.rejoining = self.presence.collaborators().iter().map(|c| c.id.clone()).collect();
        }
        self.presence.apply(&event, now);

        let mut notify = true;
        match &event {
            SessionEvent::PlaybackSync {
                current_time,
                is_playing,
                user_id,
                ..
            } if *user_id != self.identity.user.id => {
                let at = std::time::Instant::now();
                self.coordinator
                    .propose(SyncProposal::at(SyncChange::Time(*current_time), SyncSource::Remote, at));
                self.coordinator
                    .propose(SyncProposal::at(SyncChange::PlayState(*is_playing), SyncSource::Remote, at));
            }
            SessionEvent::ConnectionRestored => {
                self.announce();
            }
            SessionEvent::ConnectionLost => self.announced = false,
            SessionEvent::UserJoined { user } => {
                if let Some(pos) = self.rejoining.iter().position(|id| *id == user.id) {
                    self.rejoining.swap_remove(pos);
                    notify = false;
                }
            }
            SessionEvent::RenderProgress { render_id, .. }
            | SessionEvent::RenderCompleted { render_id, .. }
            | SessionEvent::RenderFailed { render_id, .. } => {
                let tracked = self.render.current().is_some_and(|job| job.id == *render_id);
                match self.render.apply_push(&event, now) {
                    Some(transition) if transition.is_terminal() => self.stop_polling(),
                    Some(_) => {}
                    // Already resolved by the other path.
                    None if tracked => notify = false,
                    None => {}
                }
            }
            _ => {}
        }

        if notify {
            self.raise(&event, now);
        }
    }

    async fn run_task(&mut self, task: SessionTask) {
        let now = Instant::now();
        match task {
            SessionTask::CursorSweep => {
                self.presence.sweep(now);
            }
            SessionTask::ExpireNotification(id) => {
                self.notifications.dismiss(id);
            }
            SessionTask::RenderPoll => self.poll_render(now),
            SessionTask::AutoSave => {
                self.autosave_task = None;
                self.flush_autosave().await;
            }
        }
    }

    fn poll_render(&mut self, now: Instant) {
        if !self.polls.is_empty() || !self.render.should_poll(now) {
            return;
        }
        let Some(render_id) = self.render.active_id().map(str::to_string) else {
            self.stop_polling();
            return;
        };
        let backend = self.services.render.clone();
        self.polls.spawn(async move {
            let report = backend.status(&render_id).await;
            (render_id, report)
        });
    }

    fn handle_poll(&mut self, joined: Result<PollResult, JoinError>) {
        let (render_id, report) = match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                log::error!("Render poll task failed: {e}");
                return;
            }
        };
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                log::warn!("Render status query for {render_id} failed: {e}");
                return;
            }
        };

        let event = match self.render.apply_poll(&render_id, &report) {
            Some(RenderTransition::Completed { output_url }) => SessionEvent::RenderCompleted { render_id, output_url },
            Some(RenderTransition::Failed { error }) => SessionEvent::RenderFailed { render_id, error },
            Some(RenderTransition::Progressed { .. }) | None => return,
        };
        self.stop_polling();
        self.raise(&event, Instant::now());
    }

    async fn submit_render(&mut self, request: RenderRequest) -> Result<RenderJob, RenderError> {
        self.render.ensure_idle()?;

        let render_id = match self.services.render.start_render(&request).await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Render request for {} failed: {e}", request.project_id);
                let draft = NotificationDraft::new(
                    NotificationKind::Error,
                    "Render Failed",
                    format!("Failed to start render: {e}"),
                )
                .with_action(NotificationAction::Retry);
                self.raise_draft(draft, Instant::now());
                return Err(e.into());
            }
        };

        let settings = request.settings.clone();
        let job = self.render.begin(render_id.clone(), request)?.clone();

        let started = SessionEvent::RenderStarted {
            render_id,
            settings: Some(settings),
            user_name: Some(self.identity.user.name.clone()),
        };
        self.publish(started.clone());
        self.raise(&started, Instant::now());

        self.stop_polling();
        self.poll_task = Some(
            self.scheduler
                .schedule_repeating(self.poll_interval, SessionTask::RenderPoll),
        );
        Ok(job)
    }

    async fn load_project(&mut self) -> Result<ProjectDocument, ServiceError> {
        match self.services.projects.get(&self.identity.project_id).await {
            Ok(document) => {
                log::info!("Loaded project {} ({})", document.id, document.name);
                self.project = Some(document.clone());
                Ok(document)
            }
            Err(e) => {
                log::warn!("Loading project {} failed: {e}", self.identity.project_id);
                let event = SessionEvent::ProjectError {
                    operation: "load".into(),
                    error: e.to_string(),
                };
                self.raise(&event, Instant::now());
                Err(e)
            }
        }
    }

    /// Restart the quiet period before the working copy is saved.
    fn arm_autosave(&mut self) {
        if !self.autosave.enabled || self.project.is_none() {
            return;
        }
        if let Some(handle) = self.autosave_task.take() {
            self.scheduler.cancel(handle);
        }
        self.autosave_task = Some(self.scheduler.schedule_once(self.autosave.delay(), SessionTask::AutoSave));
    }

    async fn flush_autosave(&mut self) {
        if let Some(document) = self.project.clone() {
            // Failures are reported as a project_error notice.
            let _ = self.save_project(&document).await;
        }
    }

    async fn save_project(&mut self, document: &ProjectDocument) -> Result<(), ServiceError> {
        let result = self.services.projects.update(document).await;
        let event = match &result {
            Ok(()) => SessionEvent::AutoSave {
                project_id: document.id.clone(),
            },
            Err(e) => {
                log::warn!("Saving project {} failed: {e}", document.id);
                SessionEvent::ProjectError {
                    operation: "save".into(),
                    error: e.to_string(),
                }
            }
        };
        self.raise(&event, Instant::now());
        result
    }

    fn stop_polling(&mut self) {
        if let Some(handle) = self.poll_task.take() {
            self.scheduler.cancel(handle);
        }
        self.polls.abort_all();
    }

    /// Tell the room who we are and where the playhead is, once per connection.
    fn announce(&mut self) -> bool {
        if self.announced {
            return false;
        }
        self.announced = true;
        self.publish(SessionEvent::JoinSession {
            user: self.identity.user.clone(),
        });
        let state = *self.coordinator.state();
        self.publish(playback_sync(&self.identity.user, &state));
        true
    }

    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.bus.send(event) {
            log::warn!("Dropped outbound event: {e}");
        }
    }

    fn raise(&mut self, event: &SessionEvent, now: Instant) {
        let expiry = self.notifications.notify(event, now).map(|n| (n.id, n.expires_at()));
        if let Some((id, at)) = expiry {
            self.scheduler.schedule_at(at, SessionTask::ExpireNotification(id));
        }
    }

    fn raise_draft(&mut self, draft: NotificationDraft, now: Instant) {
        let expiry = self.notifications.push(draft, now).map(|n| (n.id, n.expires_at()));
        if let Some((id, at)) = expiry {
            self.scheduler.schedule_at(at, SessionTask::ExpireNotification(id));
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            playback: self.coordinator.snapshot(),
            connection: self.bus.state(),
            collaborators: self.presence.collaborators().to_vec(),
            cursors: self.presence.cursors(),
            notifications: self.notifications.active().cloned().collect(),
            render: self.render.current().cloned(),
            project: self.project.clone(),
            save_pending: self.autosave_task.is_some(),
        }
    }
}
