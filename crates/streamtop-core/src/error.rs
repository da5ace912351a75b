//! Error types for window aggregation

use thiserror::Error;

/// Errors raised by [`crate::WindowedAggregator`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// A batch arrived out of order, twice, or after a lost batch.
    ///
    /// Incremental totals can no longer be trusted once this happens, so
    /// callers must treat it as fatal to the aggregation session.
    #[error("batch sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },
}

impl WindowError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::SequenceGap { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_gap_message() {
        let err = WindowError::SequenceGap {
            expected: 4,
            received: 6,
        };
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "batch sequence gap: expected 4, received 6"
        );
    }
}
