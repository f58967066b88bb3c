//! Application-root facade.
//!
//! [`Dashboard`] wires the connectivity probe, the job monitor, the job
//! store and the log stream together and exposes the user-level actions:
//! submitting a job, terminating it, leaving while it runs, and saving its
//! result file. Presentation layers hold one `Dashboard` and observe its
//! [`JobStore`] and [`LogStream`].

use std::future::Future;
use std::path::{Path, PathBuf};

use engage_core::error::CoreError;
use engage_core::job::Job;
use engage_core::log::{LogEntry, LogLevel};
use engage_core::request::{JobRequest, DEFAULT_OUTPUT_FILENAME};
use tokio::sync::broadcast;

use crate::api::{ApiError, JobApi};
use crate::client::PushClient;
use crate::config::ClientConfig;
use crate::events::{MonitorEvent, EVENT_CHANNEL_CAPACITY};
use crate::monitor::{JobMonitor, PushState};
use crate::probe::ConnectivityProbe;
use crate::store::{JobStore, LogStream};

/// Answer of the leave guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveDecision {
    /// The user declined; the job keeps running untouched.
    Stay,
    /// Nothing was running, or the job was terminated.
    Leave,
}

pub struct Dashboard {
    api: JobApi,
    probe: ConnectivityProbe,
    monitor: JobMonitor,
}

impl Dashboard {
    /// Build the facade and start the connectivity probe. Must be called
    /// within a Tokio runtime.
    pub fn new(config: &ClientConfig) -> Result<Self, DashboardError> {
        let api = JobApi::new(config.api_url.clone(), config.request_timeout())?;
        let push = PushClient::new(config.ws_url.clone());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let probe = ConnectivityProbe::start(api.clone(), config.health_interval(), event_tx.clone());
        let monitor = JobMonitor::new(
            api.clone(),
            push,
            config.monitor.clone(),
            event_tx,
            Some(probe.subscribe()),
        );

        Ok(Self {
            api,
            probe,
            monitor,
        })
    }

    pub fn api(&self) -> &JobApi {
        &self.api
    }

    pub fn store(&self) -> &JobStore {
        self.monitor.store()
    }

    pub fn log(&self) -> &LogStream {
        self.monitor.log()
    }

    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.monitor.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.probe.is_connected()
    }

    pub fn push_state(&self) -> PushState {
        self.monitor.push_state()
    }

    /// Validate and submit a job, then start monitoring it.
    ///
    /// Submission is refused while the service is unreachable. A stale
    /// "disconnected" verdict is re-checked once before refusing.
    pub async fn submit_job(&self, request: &JobRequest) -> Result<Job, DashboardError> {
        if !self.probe.is_connected() && !self.probe.check_now().await {
            return Err(DashboardError::ServiceUnavailable);
        }

        request.validate()?;

        let created = self.api.create_job(request).await?;
        tracing::info!(job_id = %created.job_id, "Job created");

        let job = created.into_job();
        self.monitor.stop_monitoring();
        self.log().clear();
        self.store().replace(Some(job.clone()));
        self.log().push(LogEntry::now(
            LogLevel::Success,
            format!("Job {} submitted", job.id),
        ));
        self.monitor.begin_monitoring(job.id.clone());

        Ok(job)
    }

    /// Attach to an existing job by id.
    pub fn watch_job(&self, job_id: impl Into<String>) {
        self.monitor.begin_monitoring(job_id);
    }

    /// Best-effort termination of the tracked job. Local state is reset
    /// regardless of what the service answers.
    pub async fn terminate_job(&self) -> Result<(), DashboardError> {
        let job_id = self
            .store()
            .current_id()
            .ok_or(DashboardError::NoActiveJob)?;

        self.monitor.stop_monitoring();

        match self.api.delete_job(&job_id).await {
            Ok(termination) => tracing::info!(
                job_id = %job_id,
                terminated = termination.terminated,
                message = termination.message.as_deref().unwrap_or(""),
                "Job termination requested",
            ),
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Job termination failed"),
        }

        self.reset();
        Ok(())
    }

    /// Leave guard. While a job is active, `confirm` is asked first;
    /// declining has no side effects at all.
    pub async fn request_leave<F, Fut>(&self, confirm: F) -> LeaveDecision
    where
        F: FnOnce(Job) -> Fut,
        Fut: Future<Output = bool>,
    {
        let Some(job) = self.store().current().filter(Job::is_active) else {
            return LeaveDecision::Leave;
        };

        if !confirm(job).await {
            return LeaveDecision::Stay;
        }

        // The job was active a moment ago, so there is always one to end.
        if let Err(e) = self.terminate_job().await {
            tracing::debug!(error = %e, "Nothing to terminate on leave");
        }
        LeaveDecision::Leave
    }

    /// Download the tracked job's result file into `dir`.
    pub async fn download_result(&self, dir: &Path) -> Result<PathBuf, DashboardError> {
        let job = self.store().current().ok_or(DashboardError::NoActiveJob)?;

        let download = self.api.download_result(&job.id).await?;
        let filename = download
            .filename
            .or(job.result_file)
            .and_then(|name| {
                Path::new(&name)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_OUTPUT_FILENAME.to_string());

        let path = dir.join(filename);
        tokio::fs::write(&path, &download.bytes).await?;
        tracing::info!(job_id = %job.id, path = %path.display(), bytes = download.bytes.len(), "Result saved");

        Ok(path)
    }

    /// Stop monitoring and clear the store and the log.
    pub fn reset(&self) {
        self.monitor.stop_monitoring();
        self.store().replace(None);
        self.log().clear();
    }

    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
        self.probe.stop();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("Service is unreachable")]
    ServiceUnavailable,

    #[error("No job is being tracked")]
    NoActiveJob,

    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Failed to save result: {0}")]
    Io(#[from] std::io::Error),
}
