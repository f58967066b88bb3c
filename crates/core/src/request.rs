//! Job submission payloads.
//!
//! [`JobRequest`] is the body of `POST /api/jobs`; [`JobCreated`] is the
//! service's reply. Defaults mirror the ones the service applies when a
//! field is omitted.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::{Job, JobStatus};

pub const DEFAULT_CONTENT_WEIGHT: f64 = 0.7;
pub const DEFAULT_POSTS_FILE: &str = "dataset/post_34000_sampled_clean_info.txt";
pub const DEFAULT_OUTPUT_FILENAME: &str = "brand_match_results.csv";

/// Configuration of a single content-analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Free-text description of the brand values to match against.
    pub brand_values: String,
    /// Weight of content similarity versus engagement, in `[0, 1]`.
    pub content_weight: f64,
    pub posts_file: String,
    pub output_filename: String,
    pub use_cache: bool,
    pub use_checkpoint: bool,
}

impl JobRequest {
    /// A request with service defaults for everything but the brand values.
    pub fn new(brand_values: impl Into<String>) -> Self {
        Self {
            brand_values: brand_values.into(),
            content_weight: DEFAULT_CONTENT_WEIGHT,
            posts_file: DEFAULT_POSTS_FILE.to_string(),
            output_filename: DEFAULT_OUTPUT_FILENAME.to_string(),
            use_cache: true,
            use_checkpoint: true,
        }
    }

    /// Reject requests the service would refuse with a 400.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.brand_values.trim().is_empty() {
            return Err(CoreError::Validation(
                "Brand values cannot be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.content_weight) {
            return Err(CoreError::Validation(format!(
                "Content weight must be between 0 and 1, got {}",
                self.content_weight
            )));
        }
        if self.posts_file.trim().is_empty() {
            return Err(CoreError::Validation(
                "Posts file must not be empty".to_string(),
            ));
        }
        if self.output_filename.trim().is_empty() {
            return Err(CoreError::Validation(
                "Output filename must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reply to `POST /api/jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCreated {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobCreated {
    /// The job record to start tracking.
    pub fn into_job(self) -> Job {
        let job = Job::new(self.job_id).with_status(self.status);
        match self.message {
            Some(message) if !message.is_empty() => job.with_message(message),
            _ => job,
        }
    }
}
