//! Shared job state and log stream.
//!
//! [`JobStore`] is the single-job context object every view observes. It
//! is cheap to clone; all clones see the same job. Every mutation runs as
//! one atomic step on a [`tokio::sync::watch`] cell, and every mutation
//! that originates from a channel names its target job id so that late
//! messages for a replaced or cleared job are discarded.
//!
//! [`LogStream`] wraps the [`LogSink`] the same way and republishes each
//! appended line as a [`MonitorEvent::LogAppended`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use engage_core::job::{Job, JobUpdate, MergeOutcome};
use engage_core::log::{LogEntry, LogLevel, LogSink};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::events::MonitorEvent;

// ---------------------------------------------------------------------------
// JobStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JobStore {
    cell: Arc<watch::Sender<Option<Job>>>,
}

/// Result of a merge that passed the identity check.
#[derive(Debug, Clone)]
pub struct Merged {
    pub outcome: MergeOutcome,
    /// The job after the merge.
    pub job: Job,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { cell: Arc::new(tx) }
    }

    /// Snapshot of the tracked job.
    pub fn current(&self) -> Option<Job> {
        self.cell.borrow().clone()
    }

    pub fn current_id(&self) -> Option<String> {
        self.cell.borrow().as_ref().map(|job| job.id.clone())
    }

    /// True iff a job is tracked and it is pending or running.
    pub fn is_active(&self) -> bool {
        self.cell.borrow().as_ref().is_some_and(Job::is_active)
    }

    /// Replace the tracked job (or clear it with `None`).
    pub fn replace(&self, job: Option<Job>) {
        self.cell.send_replace(job);
    }

    /// Apply `f` to the tracked job if its id is `job_id`.
    ///
    /// Returns `false` when the update was discarded because another job
    /// (or none) is tracked. Observers are only woken when `f` actually
    /// changed the job.
    pub fn update<F>(&self, job_id: &str, f: F) -> bool
    where
        F: FnOnce(&Job) -> Job,
    {
        let mut matched = false;
        self.cell.send_if_modified(|slot| match slot {
            Some(job) if job.id == job_id => {
                matched = true;
                let next = f(job);
                if next == *job {
                    false
                } else {
                    *job = next;
                    true
                }
            }
            _ => false,
        });
        matched
    }

    /// Merge a channel update into the tracked job if its id is `job_id`.
    ///
    /// Returns `None` when the identity check discarded the update.
    pub fn merge(&self, job_id: &str, update: &JobUpdate) -> Option<Merged> {
        self.merge_inner(job_id, None, update)
    }

    /// Like [`merge`](Self::merge), but also discards the update once
    /// `gate` is cancelled. The check happens inside the atomic step, so a
    /// session torn down with `gate.cancel()` can never mutate the store
    /// afterwards.
    pub(crate) fn merge_gated(
        &self,
        job_id: &str,
        gate: &CancellationToken,
        update: &JobUpdate,
    ) -> Option<Merged> {
        self.merge_inner(job_id, Some(gate), update)
    }

    fn merge_inner(
        &self,
        job_id: &str,
        gate: Option<&CancellationToken>,
        update: &JobUpdate,
    ) -> Option<Merged> {
        let mut merged = None;
        self.cell.send_if_modified(|slot| {
            if gate.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }
            match slot {
                Some(job) if job.id == job_id => {
                    let outcome = job.merge(update);
                    merged = Some(Merged {
                        outcome,
                        job: job.clone(),
                    });
                    matches!(outcome, MergeOutcome::Applied { .. })
                }
                _ => false,
            }
        });
        merged
    }

    /// Observe every change of the tracked job.
    pub fn subscribe(&self) -> watch::Receiver<Option<Job>> {
        self.cell.subscribe()
    }
}

// ---------------------------------------------------------------------------
// LogStream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LogStream {
    sink: Arc<Mutex<LogSink>>,
    event_tx: broadcast::Sender<MonitorEvent>,
}

impl LogStream {
    pub fn new(event_tx: broadcast::Sender<MonitorEvent>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(LogSink::new())),
            event_tx,
        }
    }

    /// Append unconditionally.
    pub fn push(&self, entry: LogEntry) {
        self.lock().push(entry.clone());
        self.publish(entry);
    }

    /// Append a deduplicated status line.
    pub fn push_status(&self, level: LogLevel, line: impl Into<String>) -> bool {
        let appended = self.lock().push_status(level, line);
        self.publish_appended(appended)
    }

    /// Append unless `gate` is cancelled. The check is made under the
    /// sink lock, so nothing lands after the owning session was torn down.
    pub(crate) fn append(&self, gate: &CancellationToken, entry: LogEntry) -> bool {
        {
            let mut sink = self.lock();
            if gate.is_cancelled() {
                return false;
            }
            sink.push(entry.clone());
        }
        self.publish(entry);
        true
    }

    /// Gated variant of [`push_status`](Self::push_status).
    pub(crate) fn append_status(
        &self,
        gate: &CancellationToken,
        level: LogLevel,
        line: impl Into<String>,
    ) -> bool {
        let appended = {
            let mut sink = self.lock();
            if gate.is_cancelled() {
                return false;
            }
            sink.push_status(level, line)
        };
        self.publish_appended(appended)
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries().to_vec()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock()
            .entries()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, LogSink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, entry: LogEntry) {
        // Ignore the SendError: it only means nobody is listening.
        let _ = self.event_tx.send(MonitorEvent::LogAppended(entry));
    }

    fn publish_appended(&self, appended: Option<LogEntry>) -> bool {
        match appended {
            Some(entry) => {
                self.publish(entry);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use engage_core::job::JobStatus;

    use super::*;

    fn running(progress: f64) -> JobUpdate {
        JobUpdate {
            status: Some(JobStatus::Running),
            progress: Some(progress),
            ..Default::default()
        }
    }

    #[test]
    fn empty_store_is_inactive() {
        let store = JobStore::new();
        assert!(store.current().is_none());
        assert!(!store.is_active());
    }

    #[test]
    fn active_iff_pending_or_running() {
        let store = JobStore::new();
        store.replace(Some(Job::new("j1")));
        assert!(store.is_active());

        store.merge("j1", &running(10.0));
        assert!(store.is_active());

        store.merge(
            "j1",
            &JobUpdate {
                status: Some(JobStatus::Failed),
                ..Default::default()
            },
        );
        assert!(!store.is_active());
    }

    #[test]
    fn updates_for_another_job_are_discarded() {
        let store = JobStore::new();
        store.replace(Some(Job::new("b")));

        assert!(store.merge("a", &running(90.0)).is_none());
        assert!(!store.update("a", |job| job.clone().with_status(JobStatus::Completed)));

        let job = store.current().unwrap();
        assert_eq!(job.id, "b");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn updates_after_clear_are_discarded() {
        let store = JobStore::new();
        store.replace(Some(Job::new("a")));
        store.replace(None);
        assert!(store.merge("a", &running(10.0)).is_none());
        assert!(store.current().is_none());
    }

    #[test]
    fn update_applies_function_to_matching_job() {
        let store = JobStore::new();
        store.replace(Some(Job::new("a")));
        assert!(store.update("a", |job| job.clone().with_message("queued")));
        assert_eq!(store.current().unwrap().message.as_deref(), Some("queued"));
    }

    #[test]
    fn cancelled_gate_blocks_merges() {
        let store = JobStore::new();
        store.replace(Some(Job::new("a")));
        let gate = CancellationToken::new();
        gate.cancel();

        assert!(store.merge_gated("a", &gate, &running(50.0)).is_none());
        assert_eq!(store.current().unwrap().progress, 0.0);
    }

    #[tokio::test]
    async fn subscribers_observe_applied_merges() {
        let store = JobStore::new();
        store.replace(Some(Job::new("a")));
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.merge("a", &running(25.0));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().progress, 25.0);
    }

    #[test]
    fn clones_share_the_same_job() {
        let store = JobStore::new();
        let view = store.clone();
        store.replace(Some(Job::new("a")));
        assert_eq!(view.current_id().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn log_stream_publishes_appended_lines() {
        let (tx, mut rx) = broadcast::channel(16);
        let log = LogStream::new(tx);

        assert!(log.push_status(LogLevel::Info, "Status: running (10%)"));
        assert!(!log.push_status(LogLevel::Info, "Status: running (10%)"));

        match rx.recv().await.unwrap() {
            MonitorEvent::LogAppended(entry) => assert_eq!(entry.message, "Status: running (10%)"),
            other => panic!("Expected LogAppended, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn cancelled_gate_blocks_log_appends() {
        let (tx, _rx) = broadcast::channel(16);
        let log = LogStream::new(tx);
        let gate = CancellationToken::new();

        assert!(log.append(&gate, LogEntry::now(LogLevel::Info, "live")));
        gate.cancel();
        assert!(!log.append(&gate, LogEntry::now(LogLevel::Info, "late")));
        assert!(!log.append_status(&gate, LogLevel::Info, "late status"));
        assert_eq!(log.messages(), ["live"]);
    }
}
