// Top-K selection over a window snapshot
//
// Bounded min-heap of size k: O(n log k) over the snapshot, no full sort.
// Ordering is count descending, then token ascending, so ties are stable
// across runs and across hash-map iteration orders.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::Serialize;

use crate::batch::Token;
use crate::window::Snapshot;

#[derive(Debug, PartialEq, Eq)]
struct Ranked<'a> {
    token: &'a Token,
    count: u64,
}

impl Ord for Ranked<'_> {
    // Greater means ranked higher: larger count, then lexicographically smaller token.
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| other.token.cmp(self.token))
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The `k` highest-count tokens in descending count order, ties broken by
/// ascending token order. Returns `min(k, snapshot.len())` entries.
pub fn report(snapshot: &Snapshot, k: usize) -> Vec<(Token, u64)> {
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Reverse<Ranked<'_>>> = BinaryHeap::with_capacity(k + 1);
    for (token, count) in snapshot.iter() {
        let candidate = Ranked { token, count };
        if heap.len() < k {
            heap.push(Reverse(candidate));
        } else if heap
            .peek()
            .is_some_and(|Reverse(lowest)| candidate > *lowest)
        {
            heap.pop();
            heap.push(Reverse(candidate));
        }
    }

    // Ascending order of Reverse<_> is descending rank.
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(ranked)| (ranked.token.clone(), ranked.count))
        .collect()
}

/// One slide tick's output, handed to report sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Window end (tick time) in unix milliseconds.
    pub window_end_ms: i64,
    pub last_sequence: u64,
    /// Distinct tokens in the window, not just the ones reported.
    pub distinct_tokens: usize,
    pub entries: Vec<(Token, u64)>,
}

impl Report {
    pub fn from_snapshot(snapshot: &Snapshot, k: usize) -> Self {
        Self {
            window_end_ms: snapshot.taken_at_ms(),
            last_sequence: snapshot.last_sequence(),
            distinct_tokens: snapshot.len(),
            entries: report(snapshot, k),
        }
    }
}
