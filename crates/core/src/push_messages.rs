//! Message type constants for the job push channel.
//!
//! Frames on `/api/jobs/{id}/logs` are JSON objects shaped as
//! `{"type": "<kind>", "data": {...}}`.

/// A single server-side log line (`timestamp` + `message`).
pub const MSG_TYPE_LOG: &str = "log";

/// A partial job update, merged exactly like a polled snapshot.
pub const MSG_TYPE_STATUS: &str = "status";

/// A server-reported problem. Non-fatal to the session.
pub const MSG_TYPE_ERROR: &str = "error";

/// Informational notice (connection confirmation, job finished).
pub const MSG_TYPE_INFO: &str = "info";

/// Liveness probe. Must be answered with [`MSG_TYPE_PONG`].
pub const MSG_TYPE_PING: &str = "ping";

/// Liveness reply.
pub const MSG_TYPE_PONG: &str = "pong";

/// Substrings of server log lines that are dropped before they reach the
/// log sink. The service already rate-limits cache-hit notices; these would
/// only duplicate that noise.
pub const FILTERED_LOG_SUBSTRINGS: &[&str] = &["Cache hit", "from cache", "Cache efficiency"];

/// Whether a server log line should be kept.
pub fn is_loggable(message: &str) -> bool {
    let trimmed = message.trim();
    !trimmed.is_empty()
        && !FILTERED_LOG_SUBSTRINGS
            .iter()
            .any(|needle| trimmed.contains(needle))
}
