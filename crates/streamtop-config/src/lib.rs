// streamtop-config - Runtime configuration
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from STREAMTOP_CONFIG env var
// 3. Config file contents from STREAMTOP_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.streamtop.toml)
// 5. Built-in defaults (lowest priority)
//
// CLI flags are applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};

/// Main runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub window: WindowSettings,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Window length (W) and slide interval (S)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub length_secs: u64,
    pub slide_secs: u64,
}

impl WindowSettings {
    pub fn length(&self) -> Duration {
        Duration::from_secs(self.length_secs)
    }

    pub fn slide(&self) -> Duration {
        Duration::from_secs(self.slide_secs)
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            length_secs: 30,
            slide_secs: 10,
        }
    }
}

/// Top-K output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub top_k: usize,
    pub format: ReportFormat,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            format: ReportFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "table" => Ok(ReportFormat::Text),
            "json" | "jsonl" => Ok(ReportFormat::Json),
            _ => anyhow::bail!("Unsupported report format: {}. Supported: text, json", s),
        }
    }
}

/// Ingestion socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub mode: IngestMode,
    pub address: String,
    /// Consecutive failed connection attempts tolerated before giving up.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Drop the connection when no bytes arrive for this long. 0 disables.
    pub stall_timeout_secs: u64,
    /// Cap on tokens buffered per slide interval. 0 disables.
    pub max_pending_tokens: usize,
    /// Longest accepted line, newline included. Longer lines are skipped.
    pub max_line_bytes: usize,
}

impl IngestConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_secs > 0).then(|| Duration::from_secs(self.stall_timeout_secs))
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::Connect,
            address: "localhost:8008".to_string(),
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            stall_timeout_secs: 60,
            max_pending_tokens: 0,
            max_line_bytes: 1024 * 1024,
        }
    }
}

/// Whether streamtop dials the producer or waits for it to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    Connect,
    Listen,
}

impl std::fmt::Display for IngestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestMode::Connect => write!(f, "connect"),
            IngestMode::Listen => write!(f, "listen"),
        }
    }
}

impl std::str::FromStr for IngestMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "connect" | "client" => Ok(IngestMode::Connect),
            "listen" | "server" => Ok(IngestMode::Listen),
            _ => anyhow::bail!("Unsupported ingest mode: {}. Supported: connect, listen", s),
        }
    }
}

/// Queue between batch sealing and aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_capacity: 16 }
    }
}

/// Checkpoint storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub backend: CheckpointBackend,
    pub path: String,
    pub interval_secs: u64,
}

impl CheckpointConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Fs,
            path: "./checkpoint_streamtop".to_string(),
            interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Fs,
    Memory,
}

impl std::fmt::Display for CheckpointBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointBackend::Fs => write!(f, "fs"),
            CheckpointBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for CheckpointBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(CheckpointBackend::Fs),
            "memory" | "mem" => Ok(CheckpointBackend::Memory),
            _ => anyhow::bail!("Unsupported checkpoint backend: {}. Supported: fs, memory", s),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from a specific file path (for CLI usage).
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Parse a TOML document on top of the defaults, without env overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config = RuntimeConfig::default();
        let file_config: RuntimeConfig =
            toml::from_str(content).context("Failed to parse config content")?;
        config.merge(file_config);
        Ok(config)
    }

    /// Merge another config into this one (used for TOML layering).
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.window = other.window;
        self.report = other.report;
        self.ingest = other.ingest;
        self.pipeline = other.pipeline;
        self.checkpoint = other.checkpoint;
        self.log = other.log;
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_from_str() {
        assert_eq!("connect".parse::<IngestMode>().unwrap(), IngestMode::Connect);
        assert_eq!("LISTEN".parse::<IngestMode>().unwrap(), IngestMode::Listen);
        assert!("udp".parse::<IngestMode>().is_err());

        assert_eq!(
            "filesystem".parse::<CheckpointBackend>().unwrap(),
            CheckpointBackend::Fs
        );
        assert_eq!(
            "memory".parse::<CheckpointBackend>().unwrap(),
            CheckpointBackend::Memory
        );
        assert!("s3".parse::<CheckpointBackend>().is_err());

        assert_eq!("jsonl".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
    }

    #[test]
    fn test_default_configs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.window.length(), Duration::from_secs(30));
        assert_eq!(config.window.slide(), Duration::from_secs(10));
        assert_eq!(config.report.top_k, 10);
        assert_eq!(config.ingest.address, "localhost:8008");
        assert_eq!(config.ingest.mode, IngestMode::Connect);
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Fs);
        assert_eq!(config.log.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_field_defaults() {
        let config = RuntimeConfig::from_toml(
            r#"
            [window]
            length_secs = 60

            [ingest]
            mode = "listen"
            address = "0.0.0.0:9009"

            [checkpoint]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.length_secs, 60);
        assert_eq!(config.window.slide_secs, 10);
        assert_eq!(config.ingest.mode, IngestMode::Listen);
        assert_eq!(config.ingest.max_retries, 5);
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Memory);
        assert_eq!(config.report, ReportConfig::default());
    }

    #[test]
    fn test_stall_timeout_zero_disables() {
        let ingest = IngestConfig {
            stall_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(ingest.stall_timeout(), None);
        assert_eq!(
            IngestConfig::default().stall_timeout(),
            Some(Duration::from_secs(60))
        );
    }
}
