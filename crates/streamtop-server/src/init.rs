// Initialization utilities for server mode
//
// Checkpoint backend and logging/tracing setup

use anyhow::{Context, Result};
use streamtop_checkpoint::CheckpointStore;
use streamtop_config::{CheckpointBackend, LogFormat, RuntimeConfig};
use tracing::info;

/// Initialize the checkpoint store from RuntimeConfig
pub(crate) fn init_checkpoint_store(config: &RuntimeConfig) -> Result<CheckpointStore> {
    info!(
        "Initializing checkpoint store with backend: {}",
        config.checkpoint.backend
    );

    match config.checkpoint.backend {
        CheckpointBackend::Fs => {
            info!("Using filesystem checkpoints at: {}", config.checkpoint.path);
            CheckpointStore::fs(&config.checkpoint.path).with_context(|| {
                format!(
                    "Failed to open checkpoint directory {}",
                    config.checkpoint.path
                )
            })
        }
        CheckpointBackend::Memory => {
            info!("Using in-memory checkpoints; state will not survive a restart");
            CheckpointStore::memory().context("Failed to create in-memory checkpoint store")
        }
    }
}

/// Initialize tracing/logging from RuntimeConfig
pub fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Parse log level from config
    let env_filter =
        EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match config.log.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
        }
        LogFormat::Text => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = RuntimeConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }

    #[tokio::test]
    async fn test_fs_store_created_under_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.checkpoint.path = dir.path().join("ckpt").display().to_string();

        let store = init_checkpoint_store(&config).unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(dir.path().join("ckpt").is_dir());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let mut config = RuntimeConfig::default();
        config.checkpoint.backend = CheckpointBackend::Memory;
        let store = init_checkpoint_store(&config).unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
