//! Synchronization core: dual-channel monitoring of one job.
//!
//! [`JobMonitor::begin_monitoring`] starts a session for a job id. A
//! session runs two tasks under one [`CancellationToken`]:
//!
//! - the **polling loop**, which fetches the job snapshot on a fixed
//!   interval and is the durable source of truth;
//! - the **push task**, which waits for the job to accept a push channel
//!   (readiness check with backoff), keeps the channel open, reconnects
//!   after abnormal closes, and falls back to polling only once its
//!   reconnect budget is spent.
//!
//! Both channels feed the same merge path ([`SessionCtx::apply`]). Every
//! store and log mutation made by a session is gated on its token inside
//! the atomic step, so once a session is cancelled (terminal status,
//! explicit stop, or superseded by a new job) nothing it still has in
//! flight can touch shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use engage_core::job::{Job, JobStatus, JobUpdate, MergeOutcome};
use engage_core::log::{LogEntry, LogLevel};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ApiError, JobApi};
use crate::client::{PushClient, PushError};
use crate::config::MonitorConfig;
use crate::events::MonitorEvent;
use crate::processor::{run_session, SessionEnd};
use crate::retry::{retry_with_backoff, RetryOutcome};
use crate::store::{JobStore, LogStream};

/// How long a torn-down session's tasks get to exit before being aborted.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Error recorded for a job the service no longer knows about.
const JOB_NOT_FOUND_MESSAGE: &str = "Job not found on the service";

/// State of the push channel of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    /// No session.
    Idle,
    AwaitingReadiness,
    Connected,
    Reconnecting,
    /// The push channel was abandoned; only polling remains.
    PollingOnly,
    /// The session ended.
    Closed,
}

/// Which channel delivered an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateSource {
    Poll,
    Push,
}

impl UpdateSource {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Push => "push",
        }
    }
}

/// Owns the channel resources of the currently monitored job.
pub struct JobMonitor {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

struct Shared {
    api: JobApi,
    push: PushClient,
    store: JobStore,
    log: LogStream,
    config: MonitorConfig,
    event_tx: broadcast::Sender<MonitorEvent>,
    /// Connectivity probe verdict, used to annotate poll failures.
    connectivity: Option<watch::Receiver<bool>>,
}

struct Session {
    ctx: SessionCtx,
    tasks: Vec<JoinHandle<()>>,
}

impl JobMonitor {
    pub fn new(
        api: JobApi,
        push: PushClient,
        config: MonitorConfig,
        event_tx: broadcast::Sender<MonitorEvent>,
        connectivity: Option<watch::Receiver<bool>>,
    ) -> Self {
        let log = LogStream::new(event_tx.clone());
        Self {
            shared: Arc::new(Shared {
                api,
                push,
                store: JobStore::new(),
                log,
                config,
                event_tx,
                connectivity,
            }),
            session: Mutex::new(None),
        }
    }

    /// The job store every view observes.
    pub fn store(&self) -> &JobStore {
        &self.shared.store
    }

    pub fn log(&self) -> &LogStream {
        &self.shared.log
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Id of the job with a live (or just finished) session.
    pub fn monitored_job_id(&self) -> Option<String> {
        self.lock_session()
            .as_ref()
            .map(|session| session.ctx.job_id.clone())
    }

    pub fn push_state(&self) -> PushState {
        self.lock_session()
            .as_ref()
            .map_or(PushState::Idle, |session| *session.ctx.push_state.borrow())
    }

    /// Start monitoring `job_id`, tearing down any previous session first.
    ///
    /// If the store tracks another job (or none), it is replaced with a
    /// fresh pending job and the log is cleared. A job that is already
    /// terminal is not monitored. Must be called within a Tokio runtime.
    pub fn begin_monitoring(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        let mut slot = self.lock_session();
        if let Some(previous) = slot.take() {
            previous.teardown();
        }

        let store = &self.shared.store;
        if store.current_id().as_deref() != Some(job_id.as_str()) {
            self.shared.log.clear();
            store.replace(Some(Job::new(job_id.clone())));
        }

        let ctx = SessionCtx::new(Arc::clone(&self.shared), job_id.clone());

        if let Some(job) = store.current().filter(Job::is_terminal) {
            ctx.log(LogLevel::Info, format!("Job {job_id} already {}", job.status));
            ctx.finish();
            *slot = Some(Session {
                ctx,
                tasks: Vec::new(),
            });
            return;
        }

        tracing::info!(job_id = %job_id, session_id = %ctx.session_id, "Monitoring started");
        ctx.log(LogLevel::Info, format!("Monitoring job {job_id}"));

        let poll_task = tokio::spawn(run_polling(ctx.clone()));
        let push_task = tokio::spawn(run_push(ctx.clone()));

        *slot = Some(Session {
            ctx,
            tasks: vec![poll_task, push_task],
        });
    }

    /// Close the push channel and stop polling. Safe to call when nothing
    /// is being monitored.
    ///
    /// The session token is cancelled before this returns, so no further
    /// store or log mutation from the session is possible; the tasks
    /// themselves finish in the background.
    pub fn stop_monitoring(&self) {
        let session = self.lock_session().take();
        if let Some(session) = session {
            session.teardown();
        }
    }

    /// Stop monitoring and wait for the session's tasks to exit.
    pub async fn shutdown(&self) {
        let session = self.lock_session().take();
        let Some(session) = session else {
            return;
        };

        session.ctx.finish();
        for task in session.tasks {
            let _ = tokio::time::timeout(REAP_TIMEOUT, task).await;
        }
    }

    /// Resolve once the current session has stopped (terminal status or
    /// teardown). Resolves immediately when nothing is monitored.
    pub async fn wait_until_stopped(&self) {
        let cancel = self
            .lock_session()
            .as_ref()
            .map(|session| session.ctx.cancel.clone());
        if let Some(cancel) = cancel {
            cancel.cancelled().await;
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JobMonitor {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.teardown();
        }
    }
}

impl Session {
    fn teardown(self) {
        self.ctx.finish();
        reap(self.tasks);
    }
}

/// Let cancelled tasks exit on their own (sending close frames), aborting
/// any that overrun [`REAP_TIMEOUT`].
fn reap(tasks: Vec<JoinHandle<()>>) {
    if tasks.is_empty() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                for task in tasks {
                    let abort = task.abort_handle();
                    if tokio::time::timeout(REAP_TIMEOUT, task).await.is_err() {
                        tracing::warn!("Monitoring task did not stop in time, aborting");
                        abort.abort();
                    }
                }
            });
        }
        Err(_) => tasks.iter().for_each(JoinHandle::abort),
    }
}

// ---------------------------------------------------------------------------
// Session context
// ---------------------------------------------------------------------------

/// Everything a session's tasks share. Cheap to clone.
#[derive(Clone)]
pub(crate) struct SessionCtx {
    shared: Arc<Shared>,
    job_id: String,
    session_id: Uuid,
    cancel: CancellationToken,
    stopped: Arc<AtomicBool>,
    push_state: Arc<watch::Sender<PushState>>,
}

impl SessionCtx {
    fn new(shared: Arc<Shared>, job_id: String) -> Self {
        let (push_state, _) = watch::channel(PushState::AwaitingReadiness);
        Self {
            shared,
            job_id,
            session_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            push_state: Arc::new(push_state),
        }
    }

    pub(crate) fn job_id(&self) -> &str {
        &self.job_id
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Merge an update from either channel into the store.
    pub(crate) fn apply(&self, update: &JobUpdate, source: UpdateSource) {
        let Some(merged) = self
            .shared
            .store
            .merge_gated(&self.job_id, &self.cancel, update)
        else {
            tracing::debug!(
                job_id = %self.job_id,
                source = source.as_str(),
                "Discarded update for a superseded session",
            );
            return;
        };

        match merged.outcome {
            MergeOutcome::Applied { became_terminal } => {
                let job = merged.job;
                tracing::debug!(
                    job_id = %self.job_id,
                    source = source.as_str(),
                    status = %job.status,
                    progress = job.progress,
                    "Job updated",
                );
                self.emit(MonitorEvent::JobUpdated(job.clone()));
                self.log_status(LogLevel::Info, job.status_line());

                if became_terminal {
                    tracing::info!(
                        job_id = %self.job_id,
                        source = source.as_str(),
                        status = %job.status,
                        "Job reached terminal state",
                    );
                    if let Some(line) = job.terminal_line() {
                        self.log(terminal_level(job.status), line);
                    }
                    self.finish();
                }
            }
            MergeOutcome::Unchanged => {
                self.log_status(LogLevel::Info, merged.job.status_line());
            }
            MergeOutcome::IgnoredTerminal => self.finish(),
            MergeOutcome::IgnoredStale => {
                tracing::debug!(
                    job_id = %self.job_id,
                    source = source.as_str(),
                    update_seq = ?update.update_seq,
                    "Discarded stale update",
                );
            }
        }
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.shared
            .log
            .append(&self.cancel, LogEntry::now(level, message));
    }

    pub(crate) fn log_entry(&self, entry: LogEntry) {
        self.shared.log.append(&self.cancel, entry);
    }

    fn log_status(&self, level: LogLevel, line: String) {
        self.shared.log.append_status(&self.cancel, level, line);
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.shared.event_tx.send(event);
    }

    fn set_push_state(&self, state: PushState) {
        self.push_state.send_if_modified(|current| {
            if self.cancel.is_cancelled() || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Stop all channel activity for this session. Idempotent.
    fn finish(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.push_state.send_replace(PushState::Closed);
        tracing::info!(job_id = %self.job_id, session_id = %self.session_id, "Monitoring stopped");
        self.emit(MonitorEvent::MonitoringStopped {
            job_id: self.job_id.clone(),
        });
    }

    fn fall_back(&self) {
        tracing::warn!(job_id = %self.job_id, "Push channel abandoned, polling only");
        self.set_push_state(PushState::PollingOnly);
        if !self.is_finished() {
            self.emit(MonitorEvent::FallbackToPolling {
                job_id: self.job_id.clone(),
            });
        }
    }

    fn service_reachable(&self) -> bool {
        self.shared
            .connectivity
            .as_ref()
            .map_or(true, |connected| *connected.borrow())
    }
}

fn terminal_level(status: JobStatus) -> LogLevel {
    match status {
        JobStatus::Completed => LogLevel::Success,
        JobStatus::Failed => LogLevel::Error,
        JobStatus::Cancelled | JobStatus::Pending | JobStatus::Running => LogLevel::Warning,
    }
}

// ---------------------------------------------------------------------------
// Polling loop
// ---------------------------------------------------------------------------

/// Fetch the job snapshot every `poll_interval` until the session ends.
/// The first request is issued immediately.
async fn run_polling(ctx: SessionCtx) {
    let mut ticker = tokio::time::interval(ctx.shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            result = ctx.shared.api.get_job(&ctx.job_id) => result,
        };

        match result {
            Ok(update) => ctx.apply(&update, UpdateSource::Poll),
            Err(e) if e.is_not_found() => {
                tracing::warn!(job_id = %ctx.job_id, "Job no longer exists on the service");
                let update = JobUpdate {
                    status: Some(JobStatus::Failed),
                    error_message: Some(JOB_NOT_FOUND_MESSAGE.to_string()),
                    ..Default::default()
                };
                ctx.apply(&update, UpdateSource::Poll);
            }
            Err(e) => {
                tracing::warn!(job_id = %ctx.job_id, error = %e, "Status poll failed");
                let line = if ctx.service_reachable() {
                    format!("Status check failed: {e}")
                } else {
                    format!("Status check failed: {e} (service unreachable)")
                };
                ctx.log_status(LogLevel::Warning, line);
            }
        }
    }

    tracing::debug!(job_id = %ctx.job_id, "Polling loop exited");
}

// ---------------------------------------------------------------------------
// Push channel
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum ReadinessError {
    #[error("job not ready (status: {0})")]
    NotReady(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("cancelled")]
    Cancelled,
}

/// Readiness check, then connect and run the push channel. The first
/// abnormal close or failed open starts the reconnect budget; once it is
/// spent the session falls back to polling for good.
async fn run_push(ctx: SessionCtx) {
    if !await_readiness(&ctx).await {
        return;
    }

    let reason = match open_and_run(&ctx).await {
        Ok(end) => return channel_ended(&ctx, end),
        Err(e) => e.to_string(),
    };

    if ctx.is_finished() {
        return;
    }

    tracing::warn!(job_id = %ctx.job_id, reason = %reason, "Push channel lost");
    ctx.log(
        LogLevel::Warning,
        format!("Live updates interrupted ({reason}), reconnecting"),
    );
    ctx.set_push_state(PushState::Reconnecting);

    let policy = &ctx.shared.config.reconnect;
    let ctx_ref = &ctx;
    let outcome = retry_with_backoff(policy, &ctx.cancel, "push-reconnect", move |attempt| {
        reconnect_attempt(ctx_ref, attempt)
    })
    .await;

    match outcome {
        RetryOutcome::Succeeded(end) => channel_ended(&ctx, end),
        RetryOutcome::Exhausted { attempts } => {
            ctx.log(
                LogLevel::Error,
                format!(
                    "Could not restore live updates after {attempts} attempts; \
                     continuing with status polling"
                ),
            );
            ctx.fall_back();
        }
        RetryOutcome::Cancelled => {}
    }
}

fn channel_ended(ctx: &SessionCtx, end: SessionEnd) {
    if end == SessionEnd::Normal {
        ctx.log(LogLevel::Info, "Live updates closed by the service");
        ctx.set_push_state(PushState::Closed);
    }
}

/// Wait until the service accepts a push channel for the job. Returns
/// `false` when the push channel should not be opened.
async fn await_readiness(ctx: &SessionCtx) -> bool {
    let policy = &ctx.shared.config.readiness;
    let outcome = retry_with_backoff(policy, &ctx.cancel, "readiness", move |_| {
        check_ready(ctx)
    })
    .await;

    match outcome {
        RetryOutcome::Succeeded(()) => true,
        RetryOutcome::Exhausted { attempts } => {
            ctx.log(
                LogLevel::Error,
                format!(
                    "Job not ready for live updates after {attempts} attempts; \
                     continuing with status polling"
                ),
            );
            ctx.fall_back();
            false
        }
        RetryOutcome::Cancelled => false,
    }
}

async fn check_ready(ctx: &SessionCtx) -> Result<(), ReadinessError> {
    let readiness = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(ReadinessError::Cancelled),
        result = ctx.shared.api.check_ready(&ctx.job_id) => result?,
    };

    if readiness.ready {
        tracing::debug!(job_id = %ctx.job_id, "Job ready for push channel");
        Ok(())
    } else {
        Err(ReadinessError::NotReady(readiness.status))
    }
}

async fn reconnect_attempt(ctx: &SessionCtx, attempt: u32) -> Result<SessionEnd, PushError> {
    let max_attempts = ctx.shared.config.reconnect.max_attempts;
    ctx.log(
        LogLevel::Info,
        format!("Reconnect attempt {attempt}/{max_attempts}"),
    );
    open_and_run(ctx).await
}

/// Open the push channel and run it until it ends. Every abnormal end is
/// an error, so each one counts against the reconnect budget.
async fn open_and_run(ctx: &SessionCtx) -> Result<SessionEnd, PushError> {
    let connection = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Ok(SessionEnd::Cancelled),
        result = ctx.shared.push.connect(&ctx.job_id) => result?,
    };

    ctx.set_push_state(PushState::Connected);
    ctx.emit(MonitorEvent::PushConnected {
        job_id: ctx.job_id.clone(),
    });
    ctx.log(LogLevel::Info, "Live updates connected");

    let end = run_session(ctx, connection.ws_stream).await;
    if end != SessionEnd::Cancelled {
        ctx.emit(MonitorEvent::PushDisconnected {
            job_id: ctx.job_id.clone(),
            normal: end == SessionEnd::Normal,
        });
    }

    match end {
        SessionEnd::Dropped { reason } => {
            ctx.set_push_state(PushState::Reconnecting);
            Err(PushError::Dropped(reason))
        }
        end => Ok(end),
    }
}
