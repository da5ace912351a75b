// Sliding-window aggregation
//
// Totals are maintained incrementally: each sealed batch is added once when it
// enters the window and subtracted once when it ages out. Per-tick cost is
// proportional to the tokens entering or leaving, never to the window size.
//
// Invariant: for every token t present in a retained batch,
//   current_totals[t] == sum of retained_batches[..].counts[t]
// and tokens whose total reaches zero are removed from current_totals.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::{Batch, Token};
use crate::error::WindowError;

/// Window length (W) and slide interval (S).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub length: Duration,
    pub slide: Duration,
}

impl WindowConfig {
    pub fn new(length: Duration, slide: Duration) -> Self {
        Self { length, slide }
    }

    pub fn length_ms(&self) -> i64 {
        i64::try_from(self.length.as_millis()).unwrap_or(i64::MAX)
    }

    /// Number of slide intervals resident in one window (W / S).
    pub fn batches_per_window(&self) -> u64 {
        let slide = self.slide.as_millis().max(1);
        (self.length.as_millis() / slide) as u64
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length: Duration::from_secs(30),
            slide: Duration::from_secs(10),
        }
    }
}

/// Aggregate state over the trailing window.
///
/// This is what gets checkpointed and restored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    last_sequence: u64,
    current_totals: HashMap<Token, u64>,
    retained_batches: VecDeque<Batch>,
}

impl WindowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble state from persisted parts. Consistency is not checked here;
    /// see [`WindowState::is_consistent`].
    pub fn from_parts(
        last_sequence: u64,
        current_totals: HashMap<Token, u64>,
        retained_batches: VecDeque<Batch>,
    ) -> Self {
        Self {
            last_sequence,
            current_totals,
            retained_batches,
        }
    }

    /// Sequence number of the most recently added batch (0 before any batch).
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn totals(&self) -> &HashMap<Token, u64> {
        &self.current_totals
    }

    pub fn retained_batches(&self) -> &VecDeque<Batch> {
        &self.retained_batches
    }

    pub fn distinct_tokens(&self) -> usize {
        self.current_totals.len()
    }

    /// Brute-force recomputation of totals from retained batches.
    ///
    /// Only used to verify restored checkpoints and in tests.
    pub fn recompute_totals(&self) -> HashMap<Token, u64> {
        let mut totals: HashMap<Token, u64> = HashMap::new();
        for batch in &self.retained_batches {
            for (token, count) in batch.counts() {
                *totals.entry(token.clone()).or_insert(0) += count;
            }
        }
        totals.retain(|_, count| *count > 0);
        totals
    }

    /// True when the incremental totals match the retained batches and the
    /// retained sequence numbers are contiguous and end at `last_sequence`.
    pub fn is_consistent(&self) -> bool {
        if self.current_totals != self.recompute_totals() {
            return false;
        }

        let contiguous = self
            .retained_batches
            .iter()
            .zip(self.retained_batches.iter().skip(1))
            .all(|(prev, next)| next.sequence() == prev.sequence() + 1);

        let tail_matches = self
            .retained_batches
            .back()
            .map_or(true, |batch| batch.sequence() == self.last_sequence);

        contiguous && tail_matches
    }
}

/// Batches and tokens evicted by one expiry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryStats {
    pub batches: usize,
    pub tokens_removed: usize,
}

/// Read-only copy of the window totals at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    taken_at_ms: i64,
    last_sequence: u64,
    totals: HashMap<Token, u64>,
}

impl Snapshot {
    pub fn new(taken_at_ms: i64, last_sequence: u64, totals: HashMap<Token, u64>) -> Self {
        Self {
            taken_at_ms,
            last_sequence,
            totals,
        }
    }

    pub fn taken_at_ms(&self) -> i64 {
        self.taken_at_ms
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn get(&self, token: &str) -> u64 {
        self.totals.get(token).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Token, u64)> {
        self.totals.iter().map(|(token, count)| (token, *count))
    }

    pub fn totals(&self) -> &HashMap<Token, u64> {
        &self.totals
    }
}

/// Incremental windowed counter. Owned by a single task; never shared mutably.
#[derive(Debug)]
pub struct WindowedAggregator {
    config: WindowConfig,
    state: WindowState,
}

impl WindowedAggregator {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            state: WindowState::new(),
        }
    }

    pub fn with_state(config: WindowConfig, state: WindowState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn into_state(self) -> WindowState {
        self.state
    }

    pub fn last_sequence(&self) -> u64 {
        self.state.last_sequence
    }

    /// Add a sealed batch to the window.
    ///
    /// The batch must carry exactly `last_sequence + 1`. Anything else means a
    /// batch was lost, duplicated, or reordered upstream.
    pub fn add_batch(&mut self, batch: Batch) -> Result<(), WindowError> {
        let expected = self.state.last_sequence + 1;
        if batch.sequence() != expected {
            return Err(WindowError::SequenceGap {
                expected,
                received: batch.sequence(),
            });
        }

        for (token, count) in batch.counts() {
            *self.state.current_totals.entry(token.clone()).or_insert(0) += count;
        }

        self.state.last_sequence = batch.sequence();
        self.state.retained_batches.push_back(batch);
        Ok(())
    }

    /// Evict every retained batch with `timestamp_ms < now_ms - W`.
    ///
    /// Batches are retained in sequence order, which is also seal order, so
    /// eviction stops at the first batch still inside the window.
    pub fn expire_old_batches(&mut self, now_ms: i64) -> ExpiryStats {
        let cutoff = now_ms.saturating_sub(self.config.length_ms());
        let mut stats = ExpiryStats::default();

        while self
            .state
            .retained_batches
            .front()
            .is_some_and(|batch| batch.timestamp_ms() < cutoff)
        {
            let Some(batch) = self.state.retained_batches.pop_front() else {
                break;
            };

            for (token, count) in batch.counts() {
                if let Some(total) = self.state.current_totals.get_mut(token) {
                    *total = total.saturating_sub(*count);
                    if *total == 0 {
                        self.state.current_totals.remove(token);
                        stats.tokens_removed += 1;
                    }
                }
            }
            stats.batches += 1;
        }

        stats
    }

    /// Copy the current totals out for read-only consumers.
    pub fn snapshot(&self, taken_at_ms: i64) -> Snapshot {
        Snapshot::new(
            taken_at_ms,
            self.state.last_sequence,
            self.state.current_totals.clone(),
        )
    }

    /// Replace the whole window state, e.g. from a checkpoint at startup.
    pub fn restore(&mut self, state: WindowState) {
        self.state = state;
    }
}
