// streamtop-core - Sliding-window token aggregation
//
// Pure data structures and algorithms, no async, no I/O:
// - Tokenizer: whitespace splitting of incoming lines
// - Batch: sealed, sequence-numbered token counts for one sampling interval
// - WindowedAggregator: incremental add/expire over a trailing time window
// - Top-K: bounded selection over a window snapshot
//
// Runtimes (ingestion, timers, checkpoint I/O) live in the other crates.

pub mod batch;
pub mod error;
pub mod tokenizer;
pub mod topk;
pub mod window;

pub use batch::{Batch, Token};
pub use error::WindowError;
pub use tokenizer::tokenize;
pub use topk::{report, Report};
pub use window::{ExpiryStats, Snapshot, WindowConfig, WindowState, WindowedAggregator};
