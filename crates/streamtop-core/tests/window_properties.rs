// Window aggregation properties
//
// Incremental totals are checked against a brute-force recomputation from the
// raw batch history, plus the 30s/10s walkthrough scenario.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use proptest::prelude::*;
use streamtop_core::{report, Batch, Token, WindowConfig, WindowError, WindowedAggregator};

const SECOND: i64 = 1_000;

fn config(window_secs: u64, slide_secs: u64) -> WindowConfig {
    WindowConfig::new(
        Duration::from_secs(window_secs),
        Duration::from_secs(slide_secs),
    )
}

/// Sum of counts over batches with timestamp in [now - W, now].
fn brute_force(history: &[Batch], now_ms: i64, window_ms: i64) -> HashMap<Token, u64> {
    let mut totals: HashMap<Token, u64> = HashMap::new();
    for batch in history
        .iter()
        .filter(|b| b.timestamp_ms() >= now_ms - window_ms && b.timestamp_ms() <= now_ms)
    {
        for (token, count) in batch.counts() {
            *totals.entry(token.clone()).or_insert(0) += count;
        }
    }
    totals
}

const VOCABULARY: [&str; 10] = ["a", "b", "c", "d", "e", "f", "g", "h", "Madrid", "#madrid"];

/// Batch histories as (seconds since the previous seal, tokens) pairs.
fn arb_history(
    gap_secs: std::ops::RangeInclusive<i64>,
    max_batches: usize,
) -> impl Strategy<Value = Vec<(i64, Vec<&'static str>)>> {
    prop::collection::vec(
        (
            gap_secs,
            prop::collection::vec(prop::sample::select(VOCABULARY.to_vec()), 0..12),
        ),
        1..max_batches,
    )
}

proptest! {
    #[test]
    fn incremental_totals_match_brute_force(
        slides_per_window in 1u64..=4,
        steps in arb_history(1..=15, 60),
    ) {
        let cfg = config(10 * slides_per_window, 10);
        let window_ms = cfg.length_ms();
        let mut agg = WindowedAggregator::new(cfg);
        let mut history = Vec::new();
        let mut now_ms = 0_i64;

        for (sequence, (gap_secs, tokens)) in (1_u64..).zip(steps) {
            // Irregular seal times, never going backwards
            now_ms += gap_secs * SECOND;
            let batch = Batch::from_tokens(sequence, now_ms, tokens);
            history.push(batch.clone());

            agg.add_batch(batch).unwrap();
            agg.expire_old_batches(now_ms);

            let expected = brute_force(&history, now_ms, window_ms);
            prop_assert_eq!(agg.state().totals(), &expected, "sequence {}", sequence);
            prop_assert!(agg.state().is_consistent());
        }
    }

    #[test]
    fn distinct_keys_bounded_by_retained_tokens(steps in arb_history(10..=20, 100)) {
        let mut agg = WindowedAggregator::new(config(30, 10));
        let mut now_ms = 0;

        for (sequence, (gap_secs, tokens)) in (1_u64..).zip(steps) {
            now_ms += gap_secs * SECOND;
            agg.add_batch(Batch::from_tokens(sequence, now_ms, tokens))
                .unwrap();
            agg.expire_old_batches(now_ms);

            let retained: HashSet<&Token> = agg
                .state()
                .retained_batches()
                .iter()
                .flat_map(|b| b.counts().keys())
                .collect();
            prop_assert!(agg.state().distinct_tokens() <= retained.len());
            // Seals at least one slide apart: at most W/S + 1 batches resident
            prop_assert!(agg.state().retained_batches().len() <= 4);
        }
    }
}

#[test]
fn sequence_gap_iff_not_successor() {
    let mut agg = WindowedAggregator::new(config(30, 10));
    for candidate in [0_u64, 2, 5, u64::MAX] {
        assert!(matches!(
            agg.add_batch(Batch::empty(candidate, 0)),
            Err(WindowError::SequenceGap { expected: 1, .. })
        ));
    }

    for sequence in 1..=10 {
        assert!(agg.add_batch(Batch::empty(sequence, 0)).is_ok());
        assert!(agg.add_batch(Batch::empty(sequence, 0)).is_err());
        assert!(agg.add_batch(Batch::empty(sequence + 2, 0)).is_err());
    }
}

#[test]
fn thirty_second_window_ten_second_slide_walkthrough() {
    let mut agg = WindowedAggregator::new(config(30, 10));
    let history = vec![
        Batch::from_counts(1, 0, [("a", 3), ("b", 1)]),
        Batch::from_counts(2, 10 * SECOND, [("a", 1), ("c", 2)]),
        Batch::from_counts(3, 20 * SECOND, [("b", 2)]),
        Batch::from_counts(4, 30 * SECOND, [("a", 1)]),
    ];
    for batch in history.iter().cloned() {
        agg.add_batch(batch).unwrap();
    }

    // t=30: nothing is older than t=0 yet
    let stats = agg.expire_old_batches(30 * SECOND);
    assert_eq!(stats.batches, 0);
    let snap = agg.snapshot(30 * SECOND);
    assert_eq!(snap.get("a"), 5);
    assert_eq!(snap.get("b"), 3);
    assert_eq!(snap.get("c"), 2);

    let ranked = report(&snap, 2);
    let top2: Vec<(&str, u64)> = ranked
        .iter()
        .map(|(t, c)| (t.as_ref(), *c))
        .collect();
    assert_eq!(top2, vec![("a", 5), ("b", 3)]);

    // t=40: the t=0 batch ages out
    let stats = agg.expire_old_batches(40 * SECOND);
    assert_eq!(stats.batches, 1);
    let snap = agg.snapshot(40 * SECOND);
    assert_eq!(snap.totals(), &brute_force(&history, 40 * SECOND, 30 * SECOND));
    assert_eq!(snap.get("a"), 2);
    assert_eq!(snap.get("b"), 2);
    assert_eq!(snap.get("c"), 2);

    // Three-way tie resolves lexicographically
    let ranked = report(&snap, 3);
    let top: Vec<(&str, u64)> = ranked
        .iter()
        .map(|(t, c)| (t.as_ref(), *c))
        .collect();
    assert_eq!(top, vec![("a", 2), ("b", 2), ("c", 2)]);
}

#[test]
fn empty_batches_keep_window_advancing() {
    let mut agg = WindowedAggregator::new(config(20, 10));
    agg.add_batch(Batch::from_counts(1, 0, [("x", 1)])).unwrap();
    agg.add_batch(Batch::empty(2, 10 * SECOND)).unwrap();
    agg.add_batch(Batch::empty(3, 20 * SECOND)).unwrap();
    agg.expire_old_batches(20 * SECOND);
    assert_eq!(agg.snapshot(0).get("x"), 1);

    agg.add_batch(Batch::empty(4, 30 * SECOND)).unwrap();
    agg.expire_old_batches(30 * SECOND);
    assert!(agg.snapshot(0).is_empty());
    assert_eq!(agg.state().retained_batches().len(), 3);
}
