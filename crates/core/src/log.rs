//! Append-only, order-preserving sequence of user-visible log lines.
//!
//! Both channels write into the same [`LogSink`]. Status-shaped lines go
//! through [`LogSink::push_status`], which drops a line identical to the
//! one immediately before it so overlapping channels do not spam repeated
//! status reports.

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Display format for [`LogEntry::timestamp`].
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Guess the level of a free-text server log line from its markers.
    pub fn classify(message: &str) -> Self {
        if message.contains("ERROR") || message.contains("Error:") || message.contains('❌') {
            Self::Error
        } else if message.contains("WARNING") || message.contains('⚠') {
            Self::Warning
        } else if message.contains('✅') {
            Self::Success
        } else {
            Self::Info
        }
    }
}

/// One line in the log sink. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Display string, either taken from the server or stamped locally.
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current local time.
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            level,
            message: message.into(),
        }
    }

    /// Create an entry with a timestamp supplied by the caller. An empty
    /// timestamp falls back to the current local time.
    pub fn with_timestamp(
        timestamp: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        let timestamp = timestamp.into();
        if timestamp.trim().is_empty() {
            return Self::now(level, message);
        }
        Self {
            timestamp,
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogSink {
    entries: Vec<LogEntry>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unconditionally.
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Append a status line unless it is textually identical to the last
    /// appended line. Returns the entry when it was appended.
    pub fn push_status(&mut self, level: LogLevel, message: impl Into<String>) -> Option<LogEntry> {
        let message = message.into();
        if self.last_message() == Some(message.as_str()) {
            return None;
        }
        let entry = LogEntry::now(level, message);
        self.entries.push(entry.clone());
        Some(entry)
    }

    pub fn last_message(&self) -> Option<&str> {
        self.entries.last().map(|e| e.message.as_str())
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Only used when a job is reset or replaced.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
