//! HTTP client for delivering event batches to the remote collector.
//!
//! The collector contract is small: `POST /v1/events` with a flush payload,
//! any 2xx response counts as a confirmed delivery, anything else (including
//! transport errors and timeouts) is a delivery failure and takes the retry
//! path. `GET /health` backs the connectivity watcher.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::QueueEntry;

/// Collector endpoint configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Base URL of the collector, e.g. `http://127.0.0.1:8787`
    pub base_url: String,
    /// Optional bearer authentication token
    pub token: Option<String>,
    /// Request timeout for delivery attempts
    pub timeout: Duration,
}

impl CollectorConfig {
    /// Create a new collector configuration with the default 10s timeout.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            token,
            timeout: Duration::from_secs(10),
        }
    }

    /// Get the event ingest endpoint URL.
    pub fn ingest_url(&self) -> String {
        format!("{}/v1/events", self.base_url)
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Collector client error types.
#[derive(Debug)]
pub enum CollectorError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error (includes timeouts)
    Network(String),
    /// Collector returned a non-2xx response
    Server { status: u16, message: String },
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::Config(msg) => write!(f, "Collector config error: {msg}"),
            CollectorError::Network(msg) => write!(f, "Collector network error: {msg}"),
            CollectorError::Server { status, message } => {
                write!(f, "Collector server error ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for CollectorError {}

/// Flush payload sent to the collector ingest endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushPayload {
    /// Session of the flushing agent
    pub session_id: String,
    /// Flush timestamp (epoch milliseconds)
    pub ts: i64,
    /// All entries being delivered
    pub events: Vec<QueueEntry>,
}

/// Acknowledgment body from the collector, parsed best-effort.
///
/// Delivery confirmation is the 2xx status alone; the body is informational.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorAck {
    pub accepted: Option<u64>,
}

/// Async collector client.
pub struct CollectorClient {
    config: CollectorConfig,
    client: reqwest::Client,
    device_id: String,
}

impl CollectorClient {
    /// Create a new collector client.
    pub fn new(config: CollectorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        // Generate device ID from hostname + instance
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let device_id = format!(
            "sensor-{}-{}",
            hostname,
            &uuid::Uuid::new_v4().to_string()[..8]
        );

        Self {
            config,
            client,
            device_id,
        }
    }

    /// Test connection to the collector.
    pub async fn test_connection(&self) -> Result<bool, CollectorError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| CollectorError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Deliver a flush payload. Returns the parsed acknowledgment on any
    /// 2xx response; everything else is an error.
    pub async fn post_events(&self, payload: &FlushPayload) -> Result<CollectorAck, CollectorError> {
        let mut request = self
            .client
            .post(self.config.ingest_url())
            .header("Content-Type", "application/json")
            .header("X-Device-Id", &self.device_id);

        if let Some(ref token) = self.config.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .json(payload)
            .send()
            .await
            .map_err(|e| CollectorError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CollectorError::Server {
                status: status.as_u16(),
                message,
            });
        }

        // The ack body is optional; an empty or unparseable body is still
        // a confirmed delivery.
        Ok(response.json().await.unwrap_or_default())
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Blocking health-probe client for synchronous contexts (the connectivity
/// watcher thread and the startup reachability check). Deliveries always go
/// through the async [`CollectorClient`] owned by the agent.
pub struct BlockingCollectorClient {
    inner: CollectorClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingCollectorClient {
    /// Create a new blocking collector client.
    pub fn new(config: CollectorConfig) -> Result<Self, CollectorError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CollectorError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: CollectorClient::new(config),
            runtime,
        })
    }

    /// Test connection to the collector.
    pub fn test_connection(&self) -> Result<bool, CollectorError> {
        self.runtime.block_on(self.inner.test_connection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_config_urls() {
        let config = CollectorConfig::new("http://127.0.0.1:8787", None);
        assert_eq!(config.ingest_url(), "http://127.0.0.1:8787/v1/events");
        assert_eq!(config.health_url(), "http://127.0.0.1:8787/health");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = CollectorConfig::new("http://collector.example/", None);
        assert_eq!(config.ingest_url(), "http://collector.example/v1/events");
    }

    #[test]
    fn test_error_display() {
        let err = CollectorError::Server {
            status: 503,
            message: "overloaded".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("503"));
        assert!(display.contains("overloaded"));

        let err = CollectorError::Network("connection refused".to_string());
        assert!(format!("{err}").contains("connection refused"));

        let err = CollectorError::Config("bad runtime".to_string());
        assert!(format!("{err}").contains("bad runtime"));
    }
}
