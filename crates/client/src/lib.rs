//! Network side of the engagement-analysis job dashboard.
//!
//! Provides the REST API wrapper, the push-channel client and message
//! parser, the generic retry driver, the shared job store and log stream,
//! the dual-channel job monitor, the connectivity probe, and the
//! [`Dashboard`](dashboard::Dashboard) facade that ties them together.

pub mod api;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod events;
pub mod messages;
pub mod monitor;
pub mod probe;
mod processor;
pub mod retry;
pub mod store;
