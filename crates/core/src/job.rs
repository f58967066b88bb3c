//! The tracked job and its merge policy.
//!
//! A [`Job`] is fed by two independent channels (status polling and the
//! push channel). Both deliver partial [`JobUpdate`]s which are folded
//! into the job with [`Job::merge`]: a field present in the update
//! replaces the stored value, an absent field leaves it untouched, and a
//! job in a terminal state never changes again.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

/// All status strings the service may report.
pub const VALID_STATUSES: &[&str] = &[
    STATUS_PENDING,
    STATUS_RUNNING,
    STATUS_COMPLETED,
    STATUS_FAILED,
    STATUS_CANCELLED,
];

/// Lower and upper bound of [`Job::progress`].
pub const PROGRESS_MIN: f64 = 0.0;
pub const PROGRESS_MAX: f64 = 100.0;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job as reported by the processing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Reported after a `DELETE` terminated the job.
    Cancelled,
}

impl JobStatus {
    /// Convert from the wire string value.
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            STATUS_PENDING => Ok(Self::Pending),
            STATUS_RUNNING => Ok(Self::Running),
            STATUS_COMPLETED => Ok(Self::Completed),
            STATUS_FAILED => Ok(Self::Failed),
            STATUS_CANCELLED => Ok(Self::Cancelled),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }

    /// Convert to the wire string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => STATUS_PENDING,
            Self::Running => STATUS_RUNNING,
            Self::Completed => STATUS_COMPLETED,
            Self::Failed => STATUS_FAILED,
            Self::Cancelled => STATUS_CANCELLED,
        }
    }

    /// No transition out of a terminal state is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// A job in this state is still being worked on by the service.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobUpdate
// ---------------------------------------------------------------------------

/// A partial job update delivered by either channel.
///
/// The polled snapshot (`GET /api/jobs/{id}`) and the push-channel
/// `status` payload both deserialize into this type. Unknown fields such
/// as `logs` or `started_at` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result_file: Option<String>,
    #[serde(default, alias = "error")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub current_items: Option<u64>,
    #[serde(default)]
    pub total_items: Option<u64>,
    #[serde(default)]
    pub processing_speed: Option<f64>,
    #[serde(default)]
    pub elapsed_time: Option<String>,
    #[serde(default)]
    pub estimated_time_remaining: Option<String>,
    /// Per-job monotonically increasing sequence number. Only present when
    /// the service supports versioned updates.
    #[serde(default)]
    pub update_seq: Option<u64>,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Result of folding a [`JobUpdate`] into a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// At least one field changed.
    Applied {
        /// The update moved the job into a terminal state.
        became_terminal: bool,
    },
    /// Every present field already matched the stored value.
    Unchanged,
    /// The job had already reached a terminal state.
    IgnoredTerminal,
    /// The update carried a sequence number not newer than the stored one.
    IgnoredStale,
}

impl MergeOutcome {
    pub fn became_terminal(&self) -> bool {
        matches!(
            self,
            Self::Applied {
                became_terminal: true
            }
        )
    }
}

/// The single tracked unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned by the service at creation; never changes afterwards.
    pub id: String,
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub current_step: Option<String>,
    pub message: Option<String>,
    pub result_file: Option<String>,
    pub error_message: Option<String>,
    pub current_items: Option<u64>,
    pub total_items: Option<u64>,
    pub processing_speed: Option<f64>,
    pub elapsed_time: Option<String>,
    pub estimated_time_remaining: Option<String>,
    pub update_seq: Option<u64>,
}

impl Job {
    /// A freshly created job: pending, no progress.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            progress: PROGRESS_MIN,
            current_step: None,
            message: None,
            result_file: None,
            error_message: None,
            current_items: None,
            total_items: None,
            processing_speed: None,
            elapsed_time: None,
            estimated_time_remaining: None,
            update_seq: None,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold a partial update into this job (last-write-wins-if-present).
    ///
    /// Strings are present iff non-empty, item counts and speed iff
    /// non-zero, `status` and `progress` iff `Some`. Progress is clamped to
    /// `[0, 100]`; a regression is accepted and only traced.
    pub fn merge(&mut self, update: &JobUpdate) -> MergeOutcome {
        if self.status.is_terminal() {
            return MergeOutcome::IgnoredTerminal;
        }

        if let (Some(stored), Some(incoming)) = (self.update_seq, update.update_seq) {
            if incoming <= stored {
                return MergeOutcome::IgnoredStale;
            }
        }

        let before = self.clone();

        if let Some(status) = update.status {
            self.status = status;
        }

        if let Some(progress) = update.progress.filter(|p| p.is_finite()) {
            let clamped = progress.clamp(PROGRESS_MIN, PROGRESS_MAX);
            if clamped < self.progress {
                tracing::debug!(
                    job_id = %self.id,
                    from = self.progress,
                    to = clamped,
                    "Job progress regressed",
                );
            }
            self.progress = clamped;
        }

        merge_text(&mut self.current_step, &update.current_step);
        merge_text(&mut self.message, &update.message);
        merge_text(&mut self.result_file, &update.result_file);
        merge_text(&mut self.error_message, &update.error_message);
        merge_count(&mut self.current_items, update.current_items);
        merge_count(&mut self.total_items, update.total_items);
        if let Some(speed) = update
            .processing_speed
            .filter(|s| s.is_finite() && *s > 0.0)
        {
            self.processing_speed = Some(speed);
        }
        merge_text(&mut self.elapsed_time, &update.elapsed_time);
        merge_text(
            &mut self.estimated_time_remaining,
            &update.estimated_time_remaining,
        );
        if update.update_seq.is_some() {
            self.update_seq = update.update_seq;
        }

        if *self == before {
            MergeOutcome::Unchanged
        } else {
            MergeOutcome::Applied {
                became_terminal: self.status.is_terminal(),
            }
        }
    }

    /// One-line human-readable status, used for the deduplicated status
    /// lines in the log sink.
    pub fn status_line(&self) -> String {
        let mut line = format!("Status: {} ({:.0}%)", self.status, self.progress);
        if let Some(step) = &self.current_step {
            line.push_str(" - ");
            line.push_str(step);
        }
        line
    }

    /// Final line appended when the job reaches a terminal state.
    pub fn terminal_line(&self) -> Option<String> {
        match self.status {
            JobStatus::Completed => Some(match &self.result_file {
                Some(file) => format!("Job completed successfully. Results: {file}"),
                None => "Job completed successfully".to_string(),
            }),
            JobStatus::Failed => Some(format!(
                "Job failed: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            )),
            JobStatus::Cancelled => Some("Job was cancelled".to_string()),
            JobStatus::Pending | JobStatus::Running => None,
        }
    }
}

fn merge_text(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming.as_deref().filter(|v| !v.is_empty()) {
        if slot.as_deref() != Some(value) {
            *slot = Some(value.to_string());
        }
    }
}

fn merge_count(slot: &mut Option<u64>, incoming: Option<u64>) {
    if let Some(value) = incoming.filter(|v| *v > 0) {
        *slot = Some(value);
    }
}
