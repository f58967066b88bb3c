use std::time::Duration;

use engage_core::retry::RetryPolicy;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a service running locally.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base URL of the processing service (default: `http://127.0.0.1:8000`).
    pub api_url: String,
    /// WebSocket base URL; derived from `api_url` when not set.
    pub ws_url: String,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    pub monitor: MonitorConfig,
    /// Seconds between connectivity probes (default: `10`).
    pub health_interval_secs: u64,
}

/// Timing of the synchronization core.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval of the status-polling loop.
    pub poll_interval: Duration,
    /// Backoff for the readiness check before the push channel opens.
    pub readiness: RetryPolicy,
    /// Backoff for reopening the push channel after an abnormal close.
    pub reconnect: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            readiness: RetryPolicy::readiness(),
            reconnect: RetryPolicy::reconnect(),
        }
    }
}

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

impl ClientConfig {
    /// Build a configuration for the given API base URL with default timing.
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = trim_base(api_url.into());
        Self {
            ws_url: derive_ws_url(&api_url),
            api_url,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            monitor: MonitorConfig::default(),
            health_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `ENGAGE_API_URL`       | `http://127.0.0.1:8000`    |
    /// | `ENGAGE_WS_URL`        | derived from the API URL   |
    /// | `POLL_INTERVAL_SECS`   | `10`                       |
    /// | `HEALTH_INTERVAL_SECS` | `10`                       |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("ENGAGE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "ENGAGE_API_URL",
                value: api_url,
            });
        }

        let mut config = Self::new(api_url);

        if let Ok(ws_url) = std::env::var("ENGAGE_WS_URL") {
            config.ws_url = trim_base(ws_url);
        }

        config.request_timeout_secs =
            parse_secs("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        config.health_interval_secs =
            parse_secs("HEALTH_INTERVAL_SECS", DEFAULT_HEALTH_INTERVAL_SECS)?;
        config.monitor.poll_interval = Duration::from_secs(parse_secs(
            "POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?);

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

fn parse_secs(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::Invalid { var, value }),
        },
        Err(_) => Ok(default),
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// `http://host:port` -> `ws://host:port`, `https://...` -> `wss://...`.
fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}
