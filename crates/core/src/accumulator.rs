//! Streaming delivery of partial search results with time/size batching.
//!
//! The walker produces matches one at a time; the accumulator batches them
//! into sorted snapshots so the UI repaints at a sane rate: immediately for
//! the first few hits, then on a size or interval trigger.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::collector::compare_results;
use crate::types::GlobalSearchResult;

/// `(results, is_done, in_progress)`. After a terminal
/// `(_, true, false)` call no further invocations happen for that search.
pub type AsyncCallback = Arc<dyn Fn(&[GlobalSearchResult], bool, bool) + Send + Sync>;

/// Snapshots never grow past this many results.
pub const MAX_DISPLAY_RESULTS: usize = 10_000;
/// The first few results flush immediately for perceived latency.
const INITIAL_BATCH: usize = 10;
/// Pending results that force a flush regardless of elapsed time.
const BATCH_FORCE_SIZE: usize = 400;
const BATCH_INTERVAL_FAST: Duration = Duration::from_millis(75);
const BATCH_INTERVAL_SLOW: Duration = Duration::from_millis(200);
/// Pending counts below this use the fast interval.
const SMALL_DELTA: usize = 50;
/// Completion emits an extra `(results, true, true)` status snapshot when
/// at least this many results accumulated.
pub const MERGE_STATUS_MINIMUM_RESULTS: usize = 200;

/// Accumulates results and emits merged, sorted, truncated snapshots.
pub struct AsyncAccumulator {
    pending: Vec<GlobalSearchResult>,
    snapshot: Vec<GlobalSearchResult>,
    total_added: usize,
    last_flush: Instant,
    callback: AsyncCallback,
}

impl AsyncAccumulator {
    pub fn new(callback: AsyncCallback) -> Self {
        AsyncAccumulator {
            pending: Vec::new(),
            snapshot: Vec::new(),
            total_added: 0,
            last_flush: Instant::now(),
            callback,
        }
    }

    /// Append one result and flush if a batching condition is met.
    pub fn add(&mut self, result: GlobalSearchResult) {
        self.pending.push(result);
        self.total_added += 1;
        self.flush(self.total_added <= INITIAL_BATCH);
    }

    /// Emit a snapshot now (`force`) or when batching conditions say so.
    pub fn flush(&mut self, force: bool) {
        if self.pending.is_empty() {
            return;
        }
        let interval = if self.pending.len() < SMALL_DELTA {
            BATCH_INTERVAL_FAST
        } else {
            BATCH_INTERVAL_SLOW
        };
        let due = force
            || self.pending.len() >= BATCH_FORCE_SIZE
            || self.last_flush.elapsed() >= interval;
        if !due {
            return;
        }

        self.pending.sort_by(compare_results);
        self.snapshot = merge_sorted(std::mem::take(&mut self.snapshot), &mut self.pending);
        self.snapshot.truncate(MAX_DISPLAY_RESULTS);
        (*self.callback)(&self.snapshot, false, true);
        self.last_flush = Instant::now();
    }

    /// Results accumulated into the running snapshot plus unsent ones.
    pub fn len(&self) -> usize {
        self.snapshot.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminal delivery: an optional `(_, true, true)` status snapshot for
    /// large result sets, then always the `(_, true, false)` final call.
    pub fn finish(self, results: &[GlobalSearchResult]) {
        if results.len() >= MERGE_STATUS_MINIMUM_RESULTS {
            (*self.callback)(results, true, true);
        }
        (*self.callback)(results, true, false);
    }
}

/// Merge two slices sorted under [`compare_results`] into one.
fn merge_sorted(
    mut left: Vec<GlobalSearchResult>,
    right: &mut Vec<GlobalSearchResult>,
) -> Vec<GlobalSearchResult> {
    if right.is_empty() {
        return left;
    }
    if left.is_empty() {
        return std::mem::take(right);
    }
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut l = left.drain(..).peekable();
    let mut r = right.drain(..).peekable();
    loop {
        match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => {
                if compare_results(a, b) != std::cmp::Ordering::Greater {
                    merged.push(l.next().unwrap());
                } else {
                    merged.push(r.next().unwrap());
                }
            }
            (Some(_), None) => merged.push(l.next().unwrap()),
            (None, Some(_)) => merged.push(r.next().unwrap()),
            (None, None) => break,
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Entry;
    use std::path::PathBuf;
    use std::sync::Mutex;

    type Emission = (Vec<f64>, bool, bool);

    fn accumulator() -> (AsyncAccumulator, Arc<Mutex<Vec<Emission>>>) {
        let emitted: Arc<Mutex<Vec<Emission>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = emitted.clone();
        let callback: AsyncCallback = Arc::new(move |results, done, in_progress| {
            let scores = results.iter().map(|r| r.score).collect();
            sink.lock().unwrap().push((scores, done, in_progress));
        });
        (AsyncAccumulator::new(callback), emitted)
    }

    fn result(score: f64, order: u64) -> GlobalSearchResult {
        GlobalSearchResult {
            path: format!("/r/f{order}"),
            name: format!("f{order}"),
            directory: "/r".into(),
            score,
            path_len: 5,
            match_start: 0,
            match_end: 1,
            match_count: 2,
            word_hits: 0,
            segments: 1,
            order,
            has_match: true,
            spans: None,
            entry: Entry {
                path: PathBuf::from(format!("/r/f{order}")),
                name: format!("f{order}"),
                dir: PathBuf::from("/r"),
                is_dir: false,
                is_symlink: false,
                size: 0,
                mtime_ns: 0,
                mode: 0,
            },
        }
    }

    #[test]
    fn first_results_flush_immediately() {
        let (mut acc, emitted) = accumulator();
        acc.add(result(1.0, 0));
        acc.add(result(2.0, 1));
        let emissions = emitted.lock().unwrap();
        assert_eq!(emissions.len(), 2);
        assert_eq!(emissions[1].0, vec![2.0, 1.0], "snapshots are sorted");
    }

    #[test]
    fn snapshots_grow_and_stay_sorted() {
        let (mut acc, emitted) = accumulator();
        for i in 0..5 {
            acc.add(result(i as f64, i));
        }
        let emissions = emitted.lock().unwrap();
        let last = &emissions.last().unwrap().0;
        assert_eq!(last, &vec![4.0, 3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn later_results_are_batched() {
        let (mut acc, emitted) = accumulator();
        for i in 0..INITIAL_BATCH as u64 {
            acc.add(result(1.0, i));
        }
        let baseline = emitted.lock().unwrap().len();
        // Past the initial batch, a few adds inside the interval stay
        // pending.
        acc.add(result(1.0, 100));
        acc.add(result(1.0, 101));
        assert_eq!(emitted.lock().unwrap().len(), baseline);
        assert_eq!(acc.len(), INITIAL_BATCH + 2);
    }

    #[test]
    fn force_size_triggers_a_flush() {
        let (mut acc, emitted) = accumulator();
        for i in 0..(INITIAL_BATCH + BATCH_FORCE_SIZE) as u64 {
            acc.add(result(1.0, i));
        }
        let emissions = emitted.lock().unwrap();
        let last = emissions.last().unwrap();
        assert_eq!(last.0.len(), INITIAL_BATCH + BATCH_FORCE_SIZE);
    }

    #[test]
    fn finish_emits_status_then_terminal() {
        let (acc, emitted) = accumulator();
        let results: Vec<GlobalSearchResult> = (0..MERGE_STATUS_MINIMUM_RESULTS as u64)
            .map(|i| result(1.0, i))
            .collect();
        acc.finish(&results);
        let emissions = emitted.lock().unwrap();
        assert_eq!(emissions.len(), 2);
        assert_eq!((emissions[0].1, emissions[0].2), (true, true));
        assert_eq!((emissions[1].1, emissions[1].2), (true, false));
    }

    #[test]
    fn small_finish_skips_the_status_snapshot() {
        let (acc, emitted) = accumulator();
        let results = vec![result(1.0, 0)];
        acc.finish(&results);
        let emissions = emitted.lock().unwrap();
        assert_eq!(emissions.len(), 1);
        assert_eq!((emissions[0].1, emissions[0].2), (true, false));
    }
}
