// OpenDAL-backed checkpoint store
//
// Backends:
// - Filesystem: durable, writes staged in an atomic write directory
// - Memory: tests and ephemeral runs

use std::path::Path;

use opendal::{services, ErrorKind, Operator};
use streamtop_core::WindowState;
use tracing::{debug, info, warn};

use crate::{Checkpoint, CheckpointError};

/// Canonical key holding the latest checkpoint.
pub const CHECKPOINT_KEY: &str = "window.checkpoint.json";

const ATOMIC_WRITE_DIR: &str = ".staging";

#[derive(Clone)]
pub struct CheckpointStore {
    operator: Operator,
}

impl CheckpointStore {
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }

    /// Filesystem store rooted at `root`. New checkpoints are written under
    /// `root/.staging` and renamed over the canonical file.
    pub fn fs(root: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let root = root.as_ref();
        let staging = root.join(ATOMIC_WRITE_DIR);
        std::fs::create_dir_all(&staging).map_err(|source| CheckpointError::CreateDir {
            path: staging.display().to_string(),
            source,
        })?;

        let builder = services::Fs::default()
            .root(&root.to_string_lossy())
            .atomic_write_dir(&staging.to_string_lossy());
        let operator = Operator::new(builder)
            .map_err(CheckpointError::Backend)?
            .finish();
        Ok(Self { operator })
    }

    /// In-memory store. Contents are lost with the process.
    pub fn memory() -> Result<Self, CheckpointError> {
        let operator = Operator::new(services::Memory::default())
            .map_err(CheckpointError::Backend)?
            .finish();
        Ok(Self { operator })
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Persist `state` as the latest checkpoint.
    pub async fn save(&self, state: &WindowState, saved_at_ms: i64) -> Result<(), CheckpointError> {
        let checkpoint = Checkpoint::new(state.clone(), saved_at_ms);
        let bytes = checkpoint.encode()?;
        let size = bytes.len();

        self.operator
            .write(CHECKPOINT_KEY, bytes)
            .await
            .map_err(|source| CheckpointError::Write {
                key: CHECKPOINT_KEY.to_string(),
                source,
            })?;

        debug!(
            last_sequence = state.last_sequence(),
            retained_batches = state.retained_batches().len(),
            size_bytes = size,
            "Checkpoint written"
        );
        Ok(())
    }

    /// Latest complete checkpoint, or `None` on a fresh start.
    pub async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let buffer = match self.operator.read(CHECKPOINT_KEY).await {
            Ok(buffer) => buffer,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Read {
                    key: CHECKPOINT_KEY.to_string(),
                    source,
                })
            }
        };

        Checkpoint::decode(&buffer.to_vec()).map(Some)
    }

    /// Startup policy: resume from the stored checkpoint when it is usable,
    /// otherwise start from an empty window.
    pub async fn load_or_empty(&self) -> WindowState {
        match self.load().await {
            Ok(Some(checkpoint)) => {
                info!(
                    last_sequence = checkpoint.last_sequence(),
                    retained_batches = checkpoint.state.retained_batches().len(),
                    distinct_tokens = checkpoint.state.distinct_tokens(),
                    saved_at = ?checkpoint.saved_at(),
                    "Resuming from checkpoint"
                );
                checkpoint.state
            }
            Ok(None) => {
                info!("No checkpoint found; starting with an empty window");
                WindowState::new()
            }
            Err(e) if e.is_unusable_checkpoint() => {
                warn!(error = %e, "Checkpoint unusable; starting with an empty window");
                WindowState::new()
            }
            Err(e) => {
                warn!(error = %e, "Checkpoint storage unavailable; starting with an empty window");
                WindowState::new()
            }
        }
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("scheme", &self.operator.info().scheme())
            .field("root", &self.operator.info().root())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use streamtop_core::{Batch, WindowConfig, WindowedAggregator};

    fn state_with(batches: &[Batch]) -> WindowState {
        let mut agg = WindowedAggregator::new(WindowConfig::new(
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        for batch in batches {
            agg.add_batch(batch.clone()).unwrap();
        }
        agg.into_state()
    }

    #[tokio::test]
    async fn test_memory_missing_checkpoint_is_none() {
        let store = CheckpointStore::memory().unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.load_or_empty().await, WindowState::new());
    }

    #[tokio::test]
    async fn test_memory_save_then_load() {
        let store = CheckpointStore::memory().unwrap();
        let state = state_with(&[
            Batch::from_counts(1, 0, [("a", 2)]),
            Batch::from_counts(2, 10_000, [("b", 1)]),
        ]);

        store.save(&state, 10_500).await.unwrap();
        let checkpoint = store.load().await.unwrap().unwrap();
        assert_eq!(checkpoint.state, state);
        assert_eq!(checkpoint.saved_at_ms, 10_500);
    }

    #[tokio::test]
    async fn test_later_save_replaces_earlier() {
        let store = CheckpointStore::memory().unwrap();
        let first = state_with(&[Batch::from_counts(1, 0, [("a", 1)])]);
        let second = state_with(&[
            Batch::from_counts(1, 0, [("a", 1)]),
            Batch::from_counts(2, 0, [("a", 1)]),
        ]);

        store.save(&first, 1).await.unwrap();
        store.save(&second, 2).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().last_sequence(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_falls_back_to_empty() {
        let store = CheckpointStore::memory().unwrap();
        store
            .operator()
            .write(CHECKPOINT_KEY, b"{ half a checkpoint".to_vec())
            .await
            .unwrap();

        let err = store.load().await.unwrap_err();
        assert!(err.is_unusable_checkpoint());
        assert_eq!(store.load_or_empty().await, WindowState::new());
    }

    #[tokio::test]
    async fn test_fs_round_trip_leaves_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::fs(dir.path()).unwrap();
        let state = state_with(&[Batch::from_counts(1, 0, [("hola", 3)])]);

        store.save(&state, 0).await.unwrap();
        assert!(dir.path().join(CHECKPOINT_KEY).exists());

        let staged: Vec<_> = std::fs::read_dir(dir.path().join(ATOMIC_WRITE_DIR))
            .unwrap()
            .collect();
        assert!(staged.is_empty());

        // A fresh store over the same directory sees the checkpoint
        let reopened = CheckpointStore::fs(dir.path()).unwrap();
        assert_eq!(reopened.load_or_empty().await, state);
    }

    #[tokio::test]
    async fn test_unreadable_storage_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("checkpoints");
        let store = CheckpointStore::fs(&root).unwrap();
        store
            .save(&state_with(&[Batch::from_counts(1, 0, [("a", 1)])]), 0)
            .await
            .unwrap();

        // Root swapped for a plain file: reads fail below the checkpoint format
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, b"not a directory").unwrap();

        if let Err(e) = store.load().await {
            assert!(!e.is_unusable_checkpoint());
        }
        assert_eq!(store.load_or_empty().await, WindowState::new());
    }
}
