use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque, case-sensitive token key shared between batches and window totals.
pub type Token = Arc<str>;

/// Token counts sealed for one sampling interval.
///
/// Batches are immutable once sealed; the window only ever reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    sequence: u64,
    timestamp_ms: i64,
    counts: HashMap<Token, u64>,
}

impl Batch {
    /// Build a batch from `(token, count)` pairs. Zero counts are dropped and
    /// repeated tokens are summed.
    pub fn from_counts<T, I>(sequence: u64, timestamp_ms: i64, counts: I) -> Self
    where
        T: Into<Token>,
        I: IntoIterator<Item = (T, u64)>,
    {
        let mut merged: HashMap<Token, u64> = HashMap::new();
        for (token, count) in counts {
            if count > 0 {
                *merged.entry(token.into()).or_insert(0) += count;
            }
        }

        Self {
            sequence,
            timestamp_ms,
            counts: merged,
        }
    }

    /// Build a batch by counting occurrences of each token.
    pub fn from_tokens<'a, I>(sequence: u64, timestamp_ms: i64, tokens: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::from_counts(sequence, timestamp_ms, tokens.into_iter().map(|t| (t, 1)))
    }

    /// An interval in which nothing arrived. Still sealed so ticks stay regular.
    pub fn empty(sequence: u64, timestamp_ms: i64) -> Self {
        Self {
            sequence,
            timestamp_ms,
            counts: HashMap::new(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Seal time in unix milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn counts(&self) -> &HashMap<Token, u64> {
        &self.counts
    }

    pub fn count(&self, token: &str) -> u64 {
        self.counts.get(token).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn distinct_tokens(&self) -> usize {
        self.counts.len()
    }

    /// Total token occurrences in the batch.
    pub fn total_tokens(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tokens_groups_occurrences() {
        let batch = Batch::from_tokens(3, 1_000, ["a", "b", "a", "a"]);
        assert_eq!(batch.sequence(), 3);
        assert_eq!(batch.timestamp_ms(), 1_000);
        assert_eq!(batch.count("a"), 3);
        assert_eq!(batch.count("b"), 1);
        assert_eq!(batch.count("c"), 0);
        assert_eq!(batch.distinct_tokens(), 2);
        assert_eq!(batch.total_tokens(), 4);
    }

    #[test]
    fn test_from_counts_drops_zeros_and_merges() {
        let batch = Batch::from_counts(1, 0, [("a", 2), ("b", 0), ("a", 1)]);
        assert_eq!(batch.count("a"), 3);
        assert!(!batch.counts().contains_key("b"));
    }

    #[test]
    fn test_empty_batch() {
        let batch = Batch::empty(7, 42);
        assert!(batch.is_empty());
        assert_eq!(batch.total_tokens(), 0);
    }
}
