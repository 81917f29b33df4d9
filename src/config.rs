//! Configuration for the telemetry sensor agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::agent::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL};

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interval between timer-triggered flushes
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,

    /// In-memory batch size before entries spill to the durable spool
    pub batch_size: usize,

    /// Collector base URL
    pub collector_url: String,

    /// Optional bearer token for the collector
    pub collector_token: Option<String>,

    /// Which interaction sources to capture
    pub sources: SourceConfig,

    /// Path for the spool, stats, and other pipeline state
    pub data_path: PathBuf,

    /// Whether capture is currently paused
    pub paused: bool,

    /// Interval between collector health probes (seconds)
    pub connectivity_poll_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("telemetry-sensor-agent");

        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            collector_url: "http://127.0.0.1:8787".to_string(),
            collector_token: None,
            sources: SourceConfig::default(),
            data_path: data_dir,
            paused: false,
            connectivity_poll_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("telemetry-sensor-agent")
            .join("config.json")
    }

    /// Path of the durable event spool.
    pub fn spool_path(&self) -> PathBuf {
        self.data_path.join("events.jsonl")
    }

    /// Path of the persisted pipeline stats.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Configuration for which interaction sources to capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Pointer movement and clicks
    pub pointer: bool,
    /// Key-down events
    pub keyboard: bool,
    /// Scroll depth events
    pub scroll: bool,
    /// Focus, blur, visibility, and resize events
    pub window: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            pointer: true,
            keyboard: true,
            scroll: true,
            window: true,
        }
    }
}

impl SourceConfig {
    /// Parse source configuration from a comma-separated string.
    pub fn from_csv(s: &str) -> Self {
        let sources: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let has = |name: &str| sources.iter().any(|s| s == name || s == "all");

        Self {
            pointer: has("pointer"),
            keyboard: has("keyboard"),
            scroll: has("scroll"),
            window: has("window"),
        }
    }

    /// Check if at least one source is enabled.
    pub fn any_enabled(&self) -> bool {
        self.pointer || self.keyboard || self.scroll || self.window
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
