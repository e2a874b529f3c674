//! Bounded top-K collection under the result dominance predicate.
//!
//! A min-heap of size K keeps the K best results seen so far; `needs` is
//! the cheap admission test callers run before building a full result.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::GlobalSearchResult;

/// Score comparisons treat differences below this as ties.
pub const SCORE_EPSILON: f64 = 1e-9;

/// Total order over results; `Less` ranks first. Tiers: score, has-match,
/// span length, match count, word hits, normalized span position, path
/// shape, then input order for stability.
pub fn compare_results(a: &GlobalSearchResult, b: &GlobalSearchResult) -> Ordering {
    if a.score > b.score + SCORE_EPSILON {
        return Ordering::Less;
    }
    if b.score > a.score + SCORE_EPSILON {
        return Ordering::Greater;
    }

    if a.has_match != b.has_match {
        return if a.has_match {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }

    let a_span = a.match_end - a.match_start;
    let b_span = b.match_end - b.match_start;
    if a_span != b_span {
        return a_span.cmp(&b_span);
    }

    if a.match_count != b.match_count {
        return b.match_count.cmp(&a.match_count);
    }
    if a.word_hits != b.word_hits {
        return b.word_hits.cmp(&a.word_hits);
    }

    // Earlier placement relative to the path length ranks first.
    let a_start = a.match_start as f64 / a.path_len.max(1) as f64;
    let b_start = b.match_start as f64 / b.path_len.max(1) as f64;
    if (a_start - b_start).abs() > SCORE_EPSILON {
        return a_start.partial_cmp(&b_start).unwrap_or(Ordering::Equal);
    }
    let a_end = a.match_end as f64 / a.path_len.max(1) as f64;
    let b_end = b.match_end as f64 / b.path_len.max(1) as f64;
    if (a_end - b_end).abs() > SCORE_EPSILON {
        return a_end.partial_cmp(&b_end).unwrap_or(Ordering::Equal);
    }

    if a.segments != b.segments {
        return a.segments.cmp(&b.segments);
    }
    if a.path_len != b.path_len {
        return a.path_len.cmp(&b.path_len);
    }

    a.order.cmp(&b.order)
}

struct HeapEntry(GlobalSearchResult);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        compare_results(&self.0, &other.0) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Better results compare Less, so the heap's max is the worst
        // retained result and eviction pops it.
        compare_results(&self.0, &other.0)
    }
}

/// Min-heap of size K under [`compare_results`].
pub struct TopKCollector {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
}

impl TopKCollector {
    pub fn new(k: usize) -> Self {
        TopKCollector {
            k: k.max(1),
            heap: BinaryHeap::with_capacity(k.max(1).min(4096) + 1),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Admission test: does this candidate deserve a slot right now?
    /// Callers run it before computing expensive result fields.
    pub fn needs(&self, candidate: &GlobalSearchResult) -> bool {
        if self.heap.len() < self.k {
            return true;
        }
        match self.heap.peek() {
            Some(worst) => compare_results(candidate, &worst.0) == Ordering::Less,
            None => true,
        }
    }

    /// Insert, evicting the worst retained result when at capacity.
    pub fn store(&mut self, result: GlobalSearchResult) {
        self.heap.push(HeapEntry(result));
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    /// Fold another collector in (used to reduce per-thread collectors).
    pub fn merge(&mut self, other: TopKCollector) {
        for entry in other.heap {
            self.store(entry.0);
        }
    }

    /// Drain into a slice sorted best-first under the dominance predicate.
    pub fn into_sorted_results(self) -> Vec<GlobalSearchResult> {
        let mut results: Vec<GlobalSearchResult> =
            self.heap.into_iter().map(|entry| entry.0).collect();
        results.sort_by(compare_results);
        results
    }
}
