use super::{CheckpointBackend, IngestMode, LogFormat, ReportFormat, RuntimeConfig};
use anyhow::{anyhow, Context, Result};
use std::str::FromStr;

pub const ENV_PREFIX: &str = "STREAMTOP_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    /// Get a variable by its name without the `STREAMTOP_` prefix.
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Window
    if let Some(val) = get_env_parsed::<_, u64>(env, "WINDOW_SECS")? {
        config.window.length_secs = val;
    }
    if let Some(val) = get_env_parsed::<_, u64>(env, "SLIDE_SECS")? {
        config.window.slide_secs = val;
    }

    // Report
    if let Some(val) = get_env_parsed::<_, usize>(env, "TOP_K")? {
        config.report.top_k = val;
    }
    if let Some(format) = env.get("REPORT_FORMAT") {
        config.report.format = format
            .parse::<ReportFormat>()
            .context("Invalid STREAMTOP_REPORT_FORMAT value")?;
    }

    // Ingest
    if let Some(address) = env.get("INGEST_ADDRESS") {
        config.ingest.address = address;
    }
    if let Some(mode) = env.get("INGEST_MODE") {
        config.ingest.mode = mode
            .parse::<IngestMode>()
            .context("Invalid STREAMTOP_INGEST_MODE value")?;
    }
    if let Some(val) = get_env_parsed::<_, u32>(env, "INGEST_MAX_RETRIES")? {
        config.ingest.max_retries = val;
    }
    if let Some(val) = get_env_parsed::<_, u64>(env, "INGEST_STALL_TIMEOUT_SECS")? {
        config.ingest.stall_timeout_secs = val;
    }
    if let Some(val) = get_env_parsed::<_, usize>(env, "MAX_PENDING_TOKENS")? {
        config.ingest.max_pending_tokens = val;
    }
    if let Some(val) = get_env_parsed::<_, usize>(env, "MAX_LINE_BYTES")? {
        config.ingest.max_line_bytes = val;
    }

    // Pipeline
    if let Some(val) = get_env_parsed::<_, usize>(env, "QUEUE_CAPACITY")? {
        config.pipeline.queue_capacity = val;
    }

    // Checkpoint
    if let Some(backend) = env.get("CHECKPOINT_BACKEND") {
        config.checkpoint.backend = backend
            .parse::<CheckpointBackend>()
            .context("Invalid STREAMTOP_CHECKPOINT_BACKEND value")?;
    }
    if let Some(path) = env.get("CHECKPOINT_PATH") {
        config.checkpoint.path = path;
    }
    if let Some(val) = get_env_parsed::<_, u64>(env, "CHECKPOINT_INTERVAL_SECS")? {
        config.checkpoint.interval_secs = val;
    }

    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.log.format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    Ok(())
}

fn get_env_parsed<E, T>(env: &E, key: &str) -> Result<Option<T>>
where
    E: EnvSource,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
