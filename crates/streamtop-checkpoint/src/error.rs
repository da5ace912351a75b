use thiserror::Error;

/// Errors raised while saving or loading checkpoints.
///
/// Write failures are best-effort and retried on the next cadence tick; load
/// failures make startup fall back to an empty window.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to open checkpoint storage: {0}")]
    Backend(#[source] opendal::Error),

    #[error("failed to create checkpoint directory '{path}': {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write checkpoint '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: opendal::Error,
    },

    #[error("failed to read checkpoint '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: opendal::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("checkpoint is not valid JSON for this format: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unsupported checkpoint version {found} (this build reads version {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("checkpoint at sequence {last_sequence} is inconsistent: totals do not match retained batches")]
    Inconsistent { last_sequence: u64 },
}

impl CheckpointError {
    /// The checkpoint was read but its contents cannot be trusted, as opposed
    /// to the storage itself failing.
    pub fn is_unusable_checkpoint(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::UnsupportedVersion { .. } | Self::Inconsistent { .. }
        )
    }
}
