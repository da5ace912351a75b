// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_window_config(&config.window)?;
    validate_report_config(&config.report)?;
    validate_ingest_config(&config.ingest)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_checkpoint_config(&config.checkpoint, &config.window)?;
    Ok(())
}

fn validate_window_config(config: &WindowSettings) -> Result<()> {
    if config.slide_secs == 0 {
        bail!("window.slide_secs must be greater than 0");
    }

    if config.length_secs == 0 {
        bail!("window.length_secs must be greater than 0");
    }

    if config.length_secs % config.slide_secs != 0 {
        bail!(
            "window.length_secs ({}) must be a whole multiple of window.slide_secs ({})",
            config.length_secs,
            config.slide_secs
        );
    }

    let batches = config.length_secs / config.slide_secs;
    if batches > 10_000 {
        warn!(
            batches_per_window = batches,
            "window retains a very large number of batches; checkpoints will be large"
        );
    }

    Ok(())
}

fn validate_report_config(config: &ReportConfig) -> Result<()> {
    if config.top_k == 0 {
        bail!("report.top_k must be greater than 0");
    }

    if config.top_k > 10_000 {
        warn!(top_k = config.top_k, "report.top_k is very large");
    }

    Ok(())
}

fn validate_ingest_config(config: &IngestConfig) -> Result<()> {
    if config.address.trim().is_empty() {
        bail!("ingest.address must not be empty");
    }

    if !config.address.contains(':') {
        bail!(
            "ingest.address must be host:port, got '{}'",
            config.address
        );
    }

    if config.initial_backoff_ms == 0 {
        bail!("ingest.initial_backoff_ms must be greater than 0");
    }

    if config.max_backoff_ms < config.initial_backoff_ms {
        bail!("ingest.max_backoff_ms must be at least ingest.initial_backoff_ms");
    }

    if config.max_line_bytes == 0 {
        bail!("ingest.max_line_bytes must be greater than 0");
    }

    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<()> {
    if config.queue_capacity == 0 {
        bail!("pipeline.queue_capacity must be greater than 0");
    }

    Ok(())
}

fn validate_checkpoint_config(config: &CheckpointConfig, window: &WindowSettings) -> Result<()> {
    if config.interval_secs < window.slide_secs {
        bail!(
            "checkpoint.interval_secs ({}) must be at least window.slide_secs ({})",
            config.interval_secs,
            window.slide_secs
        );
    }

    if config.backend == CheckpointBackend::Fs && config.path.trim().is_empty() {
        bail!("checkpoint.path must not be empty for the fs backend");
    }

    Ok(())
}
