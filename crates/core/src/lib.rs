//! Domain types for the engagement-analysis job dashboard.
//!
//! Holds the job model and its merge policy, the user-visible log sink,
//! retry policies, and job submission payloads. This crate performs no
//! I/O; the `engage-client` crate drives it from the network channels.

pub mod error;
pub mod job;
pub mod log;
pub mod push_messages;
pub mod request;
pub mod retry;
