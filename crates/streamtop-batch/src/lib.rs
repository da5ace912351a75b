// streamtop-batch - Micro-batch assembly
//
// Accumulates tokens in memory between seals and turns them into immutable,
// sequence-numbered batches. Ingestion writes into the assembler while a
// timer seals it once per slide interval, so both sides share it behind a lock.
//

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use streamtop_core::{tokenize, Batch, Token};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct AssemblerConfig {
    /// Upper bound on tokens buffered in one interval. 0 disables the cap.
    pub max_pending_tokens: usize,
}

#[derive(Debug)]
struct PendingBatch {
    counts: HashMap<Token, u64>,
    total_tokens: usize,
    dropped_tokens: usize,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            counts: HashMap::new(),
            total_tokens: 0,
            dropped_tokens: 0,
        }
    }

    fn add(&mut self, token: &str, cfg: &AssemblerConfig) -> bool {
        if cfg.max_pending_tokens > 0 && self.total_tokens >= cfg.max_pending_tokens {
            self.dropped_tokens += 1;
            return false;
        }

        // Avoid allocating a new key for tokens already seen this interval.
        if let Some(count) = self.counts.get_mut(token) {
            *count += 1;
        } else {
            self.counts.insert(Token::from(token), 1);
        }
        self.total_tokens += 1;
        true
    }
}

#[derive(Debug)]
struct AssemblerState {
    pending: PendingBatch,
    next_sequence: u64,
}

/// Thread-safe token accumulator shared by the ingestion and sealing tasks.
#[derive(Debug, Clone)]
pub struct MicroBatchAssembler {
    config: AssemblerConfig,
    inner: Arc<Mutex<AssemblerState>>,
}

impl MicroBatchAssembler {
    /// Start assigning sequence numbers at `next_sequence`.
    pub fn new(config: AssemblerConfig, next_sequence: u64) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(AssemblerState {
                pending: PendingBatch::new(),
                next_sequence,
            })),
        }
    }

    /// Continue numbering after the last batch a restored window has seen.
    pub fn resume_after(config: AssemblerConfig, last_sequence: u64) -> Self {
        Self::new(config, last_sequence + 1)
    }

    /// Tokenize a line into the pending interval. Returns tokens accepted.
    pub fn ingest_line(&self, line: &str) -> usize {
        self.ingest_tokens(tokenize(line))
    }

    pub fn ingest_tokens<'a, I>(&self, tokens: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut guard = self.inner.lock();
        let mut accepted = 0;
        for token in tokens {
            if guard.pending.add(token, &self.config) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Seal everything accumulated since the previous seal.
    ///
    /// Always produces a batch, empty when nothing arrived, so downstream
    /// ticks stay regular.
    pub fn seal(&self, timestamp_ms: i64) -> Batch {
        let mut guard = self.inner.lock();
        let pending = std::mem::replace(&mut guard.pending, PendingBatch::new());
        let sequence = guard.next_sequence;
        guard.next_sequence += 1;
        drop(guard);

        if pending.dropped_tokens > 0 {
            warn!(
                sequence,
                dropped = pending.dropped_tokens,
                kept = pending.total_tokens,
                max_pending_tokens = self.config.max_pending_tokens,
                "Interval exceeded pending token limit; extra tokens dropped"
            );
        }

        Batch::from_counts(sequence, timestamp_ms, pending.counts)
    }

    pub fn pending_tokens(&self) -> usize {
        self.inner.lock().pending.total_tokens
    }

    pub fn next_sequence(&self) -> u64 {
        self.inner.lock().next_sequence
    }
}
