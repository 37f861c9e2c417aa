//! Sequence bookkeeping for gap detection.
//!
//! The tracker records every sequence number observed during a session and
//! the highest one seen. Gaps are the numbers in `1..=max` never observed.
//! Only ask for gaps once the stream phase has ended; `max` can still grow
//! while records are arriving.
//!
//! `max` is chosen by the server, so [`SequenceTracker::gaps`] can be as
//! long as `i32::MAX`. [`SequenceTracker::split_gaps`] bounds the listed part
//! and folds everything above a limit into one [`GapSpan`].
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Missing sequences above a limit, summarised rather than listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSpan {
    /// Lowest missing sequence in the span.
    pub first: i32,
    /// Highest missing sequence in the span.
    pub last: i32,
    /// Number of missing sequences in `first..=last`.
    pub count: u64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SequenceTracker {
    seen: BTreeSet<i32>,
    max_seen: i32,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sequence number. Observing the same number again is a no-op.
    pub fn observe(&mut self, sequence: i32) {
        self.seen.insert(sequence);
        if sequence > self.max_seen {
            self.max_seen = sequence;
        }
    }

    /// Highest sequence observed, or 0 if none.
    pub fn max_seen(&self) -> i32 {
        self.max_seen
    }

    /// Number of distinct sequences observed.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Ascending list of every sequence in `1..=max_seen` not yet observed.
    pub fn gaps(&self) -> Vec<i32> {
        (1..=self.max_seen).filter(|s| !self.seen.contains(s)).collect()
    }

    /// Gaps up to `limit` listed individually, plus the gaps above `limit`
    /// as a single span. Work and memory are bounded by `limit` and the
    /// number of observed sequences, not by `max_seen`.
    pub fn split_gaps(&self, limit: i32) -> (Vec<i32>, Option<GapSpan>) {
        let listed = (1..=self.max_seen.min(limit)).filter(|s| !self.seen.contains(s)).collect();
        if self.max_seen <= limit {
            return (listed, None);
        }

        let lo = limit.max(0) + 1;
        let hi = self.max_seen;
        let total = (hi as i64 - lo as i64 + 1) as u64;
        let present = self.seen.range(lo..=hi).count() as u64;
        let count = total - present;
        if count == 0 {
            return (listed, None);
        }
        // Both searches stop within `present + 1` steps.
        let first = (lo..=hi).find(|s| !self.seen.contains(s));
        let last = (lo..=hi).rev().find(|s| !self.seen.contains(s));
        let span = first.zip(last).map(|(first, last)| GapSpan { first, last, count });
        (listed, span)
    }

    /// Total number of gaps, without listing them.
    pub fn gap_count(&self) -> u64 {
        if self.max_seen <= 0 {
            return 0;
        }
        let present = self.seen.range(1..=self.max_seen).count() as u64;
        self.max_seen as u64 - present
    }

    /// Observed sequences in ascending order.
    pub fn sequences(&self) -> impl Iterator<Item = i32> + '_ {
        self.seen.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_gaps() {
        let t = SequenceTracker::new();
        assert!(t.is_empty());
        assert_eq!(t.max_seen(), 0);
        assert!(t.gaps().is_empty());
        assert_eq!(t.gap_count(), 0);
        assert_eq!(t.split_gaps(255), (Vec::new(), None));
    }

    #[test]
    fn gaps_below_max() {
        let mut t = SequenceTracker::new();
        for s in [5, 1, 2, 9] {
            t.observe(s);
        }
        assert_eq!(t.max_seen(), 9);
        assert_eq!(t.gaps(), vec![3, 4, 6, 7, 8]);
        assert_eq!(t.gap_count(), 5);
    }

    #[test]
    fn observe_is_idempotent() {
        let mut once = SequenceTracker::new();
        let mut twice = SequenceTracker::new();
        for s in [1, 4, 6] {
            once.observe(s);
            twice.observe(s);
            twice.observe(s);
        }
        assert_eq!(once, twice);
        assert_eq!(twice.gaps(), vec![2, 3, 5]);
        assert_eq!(twice.len(), 3);
    }

    #[test]
    fn contiguous_run_is_complete() {
        let mut t = SequenceTracker::new();
        for s in (1..=10).rev() {
            t.observe(s);
        }
        assert!(t.gaps().is_empty());
        assert_eq!(t.sequences().collect::<Vec<_>>(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn non_positive_sequences_do_not_move_max() {
        let mut t = SequenceTracker::new();
        t.observe(0);
        t.observe(-4);
        assert_eq!(t.max_seen(), 0);
        assert!(t.gaps().is_empty());
        t.observe(2);
        assert_eq!(t.gaps(), vec![1]);
        assert_eq!(t.gap_count(), 1);
    }

    #[test]
    fn split_matches_gaps_below_limit() {
        let mut t = SequenceTracker::new();
        for s in [2, 5, 9] {
            t.observe(s);
        }
        assert_eq!(t.split_gaps(255), (t.gaps(), None));
    }

    #[test]
    fn split_folds_tail_into_span() {
        let mut t = SequenceTracker::new();
        for s in [1, 3, 6, 7, 10] {
            t.observe(s);
        }
        let (listed, span) = t.split_gaps(5);
        assert_eq!(listed, vec![2, 4, 5]);
        assert_eq!(span, Some(GapSpan { first: 8, last: 9, count: 2 }));
    }

    #[test]
    fn split_with_full_tail_has_no_span() {
        let mut t = SequenceTracker::new();
        for s in 1..=8 {
            t.observe(s);
        }
        assert_eq!(t.split_gaps(5), (Vec::new(), None));
    }

    #[test]
    fn huge_max_is_summarised() {
        let mut t = SequenceTracker::new();
        t.observe(i32::MAX);
        let (listed, span) = t.split_gaps(255);
        assert_eq!(listed, (1..=255).collect::<Vec<_>>());
        assert_eq!(
            span,
            Some(GapSpan { first: 256, last: i32::MAX - 1, count: (i32::MAX - 256) as u64 })
        );
        assert_eq!(t.gap_count(), (i32::MAX - 1) as u64);
    }
}
