//! WebSocket client for a job's push channel.
//!
//! [`PushClient`] holds the WebSocket base URL of the service. Call
//! [`PushClient::connect`] to open a live [`PushConnection`] for one job
//! at `/api/jobs/{id}/logs`.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type of a push connection.
pub type PushStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the service's push endpoint.
#[derive(Debug, Clone)]
pub struct PushClient {
    ws_url: String,
}

/// A live push connection for one job.
pub struct PushConnection {
    pub job_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: PushStream,
}

impl PushClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8000`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8000`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full push-channel URL for a job.
    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/api/jobs/{}/logs", self.ws_url, job_id)
    }

    /// Open the push channel for `job_id`.
    pub async fn connect(&self, job_id: &str) -> Result<PushConnection, PushError> {
        let url = self.job_url(job_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            PushError::Connection(format!("Failed to open push channel at {url}: {e}"))
        })?;

        tracing::info!(job_id, url = %url, "Push channel connected");

        Ok(PushConnection {
            job_id: job_id.to_string(),
            ws_stream,
        })
    }
}

/// Errors that can occur on the push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection was opened but closed abnormally before delivering
    /// anything.
    #[error("Push channel dropped: {0}")]
    Dropped(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_url_appends_logs_path() {
        let client = PushClient::new("ws://localhost:8000/");
        assert_eq!(client.job_url("j1"), "ws://localhost:8000/api/jobs/j1/logs");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let client = PushClient::new("ws://127.0.0.1:9");
        let result = client.connect("j1").await;
        assert!(matches!(result, Err(PushError::Connection(_))));
    }
}
