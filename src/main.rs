use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use streamtop_config::RuntimeConfig;

/// Sliding-window top-K token counts over a TCP text stream
#[derive(Parser)]
#[command(name = "streamtop")]
#[command(version)]
#[command(about = "Sliding-window top-K token counts over a TCP text stream", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Producer address, host:port (overrides config file)
    #[arg(short, long, value_name = "ADDR")]
    address: Option<String>,

    /// Listen for the producer instead of dialing it
    #[arg(long)]
    listen: bool,

    /// Number of tokens per report (overrides config file)
    #[arg(short = 'k', long, value_name = "K")]
    top_k: Option<usize>,

    /// Checkpoint directory (filesystem backend only)
    #[arg(long, value_name = "DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build tokio runtime and run the pipeline
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Step 1: Load base configuration
    let mut config = if let Some(config_path) = &cli.config {
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    // Step 2: Apply CLI overrides (highest priority)
    apply_cli_overrides(&mut config, &cli)?;

    // Step 3: Re-validate with overrides in place
    config.validate().context("Invalid configuration")?;

    // Step 4: Run with resolved config
    streamtop_server::run_with_config(config).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) -> Result<()> {
    use streamtop_config::{CheckpointBackend, IngestMode};

    if let Some(address) = &cli.address {
        config.ingest.address = address.clone();
    }

    if cli.listen {
        config.ingest.mode = IngestMode::Listen;
    }

    if let Some(k) = cli.top_k {
        config.report.top_k = k;
    }

    // Override checkpoint directory (only valid for fs backend)
    if let Some(dir) = &cli.checkpoint_dir {
        if config.checkpoint.backend != CheckpointBackend::Fs {
            anyhow::bail!(
                "--checkpoint-dir only works with the filesystem backend, but backend is '{}'.\n\
                Either remove --checkpoint-dir or set checkpoint.backend to 'fs'.",
                config.checkpoint.backend
            );
        }
        config.checkpoint.path = dir.to_string_lossy().to_string();
    }

    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamtop_config::IngestMode;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "streamtop",
            "--address",
            "0.0.0.0:9999",
            "--listen",
            "-k",
            "3",
            "--checkpoint-dir",
            "/tmp/streamtop",
            "-v",
            "debug",
        ]);

        let mut config = RuntimeConfig::default();
        apply_cli_overrides(&mut config, &cli).unwrap();
        assert_eq!(config.ingest.address, "0.0.0.0:9999");
        assert_eq!(config.ingest.mode, IngestMode::Listen);
        assert_eq!(config.report.top_k, 3);
        assert_eq!(config.checkpoint.path, "/tmp/streamtop");
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_checkpoint_dir_requires_fs_backend() {
        let cli = Cli::parse_from(["streamtop", "--checkpoint-dir", "/tmp/x"]);
        let mut config = RuntimeConfig::default();
        config.checkpoint.backend = streamtop_config::CheckpointBackend::Memory;
        assert!(apply_cli_overrides(&mut config, &cli).is_err());
    }

    #[test]
    fn test_zero_top_k_rejected_after_overrides() {
        let cli = Cli::parse_from(["streamtop", "-k", "0"]);
        let mut config = RuntimeConfig::default();
        apply_cli_overrides(&mut config, &cli).unwrap();
        assert!(config.validate().is_err());
    }
}
