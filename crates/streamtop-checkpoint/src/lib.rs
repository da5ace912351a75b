//! Checkpoint persistence for window state.
//!
//! A checkpoint is the full [`WindowState`] (retained batches, totals and the
//! last committed sequence) serialized as versioned JSON under a single key.
//! Readers either see the previous checkpoint or the new one, never a partial
//! write: the filesystem backend stages writes in an atomic write directory
//! and renames them into place.

mod error;
mod store;

pub use error::CheckpointError;
pub use store::{CheckpointStore, CHECKPOINT_KEY};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamtop_core::WindowState;

/// Current on-disk format version. Bump when `Checkpoint` changes shape.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub saved_at_ms: i64,
    pub state: WindowState,
}

impl Checkpoint {
    pub fn new(state: WindowState, saved_at_ms: i64) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            saved_at_ms,
            state,
        }
    }

    pub fn last_sequence(&self) -> u64 {
        self.state.last_sequence()
    }

    /// Wall-clock time the checkpoint was taken, if representable.
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.saved_at_ms)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CheckpointError> {
        serde_json::to_vec(self).map_err(CheckpointError::Encode)
    }

    /// Decode and verify a checkpoint blob.
    ///
    /// The version is checked before the body so that a future format is
    /// reported as such rather than as a decode failure.
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        #[derive(Deserialize)]
        struct VersionHeader {
            version: u32,
        }

        let header: VersionHeader = serde_json::from_slice(bytes).map_err(CheckpointError::Decode)?;
        if header.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: header.version,
                supported: CHECKPOINT_VERSION,
            });
        }

        let checkpoint: Checkpoint =
            serde_json::from_slice(bytes).map_err(CheckpointError::Decode)?;
        if !checkpoint.state.is_consistent() {
            return Err(CheckpointError::Inconsistent {
                last_sequence: checkpoint.last_sequence(),
            });
        }

        Ok(checkpoint)
    }
}
