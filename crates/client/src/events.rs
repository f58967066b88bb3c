//! Events emitted by the monitor for presentation surfaces.
//!
//! Views that need more than the current [`Job`] snapshot (log tails,
//! connection badges) subscribe to the broadcast channel via
//! [`JobMonitor::subscribe`](crate::monitor::JobMonitor::subscribe).

use engage_core::job::Job;
use engage_core::log::LogEntry;
use serde::Serialize;

/// Broadcast channel capacity for monitor events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub enum MonitorEvent {
    /// A merge changed the tracked job.
    JobUpdated(Job),

    /// A line was appended to the log sink.
    LogAppended(LogEntry),

    /// The push channel for a job was opened.
    PushConnected { job_id: String },

    /// The push channel for a job closed. `normal` is true for a
    /// normal-closure close frame.
    PushDisconnected { job_id: String, normal: bool },

    /// The push channel was abandoned; only polling remains for this job.
    FallbackToPolling { job_id: String },

    /// All channel activity for a job has stopped.
    MonitoringStopped { job_id: String },

    /// The connectivity probe changed its verdict.
    ConnectivityChanged { connected: bool },
}
