//! REST API client for the processing service.
//!
//! Wraps the job endpoints the synchronization core depends on
//! (creation, status snapshot, readiness, termination, download, health)
//! plus the collaborator endpoints used for file selection and result
//! browsing, using [`reqwest`].

use std::path::Path;
use std::time::Duration;

use engage_core::job::JobUpdate;
use engage_core::request::{JobCreated, JobRequest};
use serde::Deserialize;

/// HTTP client for the processing service.
#[derive(Debug, Clone)]
pub struct JobApi {
    client: reqwest::Client,
    api_url: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Response of `GET /api/jobs/{id}/ready`.
#[derive(Debug, Clone, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(default)]
    pub status: String,
}

/// Response of `DELETE /api/jobs/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Termination {
    #[serde(default)]
    pub terminated: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// A downloaded result file.
#[derive(Debug, Clone)]
pub struct Download {
    /// File name announced by the service, if any.
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// An input posts file available on the service.
#[derive(Debug, Clone, Deserialize)]
pub struct PostsFile {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub modified: Option<String>,
}

/// Response of `POST /api/upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub path: String,
    pub size: u64,
}

/// A CSV result file produced by an earlier job.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultFile {
    pub filename: String,
    #[serde(default)]
    pub file_path: Option<String>,
    pub size: u64,
    #[serde(default)]
    pub modified_time: Option<f64>,
}

/// One page of parsed CSV rows.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultPage {
    pub results: Vec<serde_json::Map<String, serde_json::Value>>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub items_per_page: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

#[derive(Deserialize)]
struct FilesEnvelope<T> {
    files: Vec<T>,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Service error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The request was rejected before it was sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// The service answered `404 Not Found`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl JobApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- job endpoints ----

    /// `GET /api/health`. Any 2xx means the service is reachable.
    pub async fn health(&self) -> Result<(), ApiError> {
        let response = self.client.get(self.url("/api/health")).send().await?;
        Self::check_status(response).await
    }

    /// `POST /api/jobs`. Returns the created job's id and initial status.
    pub async fn create_job(&self, request: &JobRequest) -> Result<JobCreated, ApiError> {
        let response = self
            .client
            .post(self.url("/api/jobs"))
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /api/jobs/{id}`. Full snapshot, used by the polling loop.
    pub async fn get_job(&self, job_id: &str) -> Result<JobUpdate, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/jobs/{job_id}")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /api/jobs/{id}/ready`. Whether the job accepts a push channel.
    pub async fn check_ready(&self, job_id: &str) -> Result<Readiness, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/jobs/{job_id}/ready")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `DELETE /api/jobs/{id}`. Best-effort termination.
    pub async fn delete_job(&self, job_id: &str) -> Result<Termination, ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/api/jobs/{job_id}")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /api/jobs/{id}/download`. The result file as raw bytes.
    pub async fn download_result(&self, job_id: &str) -> Result<Download, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/jobs/{job_id}/download")))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);
        let bytes = response.bytes().await?.to_vec();

        Ok(Download { filename, bytes })
    }

    // ---- collaborator endpoints ----

    /// `GET /api/files`. Posts files selectable as job input.
    pub async fn list_files(&self) -> Result<Vec<PostsFile>, ApiError> {
        let response = self.client.get(self.url("/api/files")).send().await?;
        let envelope: FilesEnvelope<PostsFile> = Self::parse_response(response).await?;
        Ok(envelope.files)
    }

    /// `POST /api/upload`. Uploads a local `.txt` posts file.
    pub async fn upload_file(&self, path: &Path) -> Result<UploadedFile, ApiError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ApiError::InvalidInput(format!("Not a file: {}", path.display())))?
            .to_string();
        if !filename.ends_with(".txt") {
            return Err(ApiError::InvalidInput(
                "Only .txt files are allowed".to_string(),
            ));
        }

        let content = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(content).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /api/result-files`. Most recent first.
    pub async fn list_result_files(&self) -> Result<Vec<ResultFile>, ApiError> {
        let response = self.client.get(self.url("/api/result-files")).send().await?;
        let envelope: FilesEnvelope<ResultFile> = Self::parse_response(response).await?;
        Ok(envelope.files)
    }

    /// `GET /api/result-files/{name}/results?page&limit`.
    pub async fn result_page(
        &self,
        filename: &str,
        page: u32,
        limit: u32,
    ) -> Result<ResultPage, ApiError> {
        if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
            return Err(ApiError::InvalidInput("Invalid filename".to_string()));
        }

        let response = self
            .client
            .get(self.url(&format!("/api/result-files/{filename}/results")))
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Extract `filename` from a `Content-Disposition` header value.
fn filename_from_disposition(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}
