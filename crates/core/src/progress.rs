//! Throttled progress reporting for the index build.

use std::time::{Duration, Instant};

/// Default spacing between progress emissions.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(150);

/// Entries-since-last-emit that forces an emission regardless of time.
const DELTA_THRESHOLD: usize = 1024;
/// Below this total, every update emits so startup feels live.
const EAGER_THRESHOLD: usize = 2048;

/// Rate-limits a count callback to an interval and a size delta.
pub struct ProgressTracker {
    interval: Duration,
    last_emit: Instant,
    last_count: Option<usize>,
    callback: Box<dyn FnMut(usize) + Send>,
}

impl ProgressTracker {
    pub fn new(interval: Duration, callback: Box<dyn FnMut(usize) + Send>) -> Self {
        ProgressTracker {
            interval,
            last_emit: Instant::now(),
            last_count: None,
            callback,
        }
    }

    /// Report a new running total; emits when due.
    pub fn update(&mut self, count: usize) {
        let delta = count.saturating_sub(self.last_count.unwrap_or(0));
        let due = self.last_emit.elapsed() >= self.interval
            || delta >= DELTA_THRESHOLD
            || count <= EAGER_THRESHOLD;
        if due {
            self.emit(count);
        }
    }

    /// Emit the final count if it was never reported.
    pub fn flush(&mut self, count: usize) {
        if self.last_count != Some(count) {
            self.emit(count);
        }
    }

    fn emit(&mut self, count: usize) {
        (self.callback)(count);
        self.last_emit = Instant::now();
        self.last_count = Some(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn tracker(interval: Duration) -> (ProgressTracker, Arc<Mutex<Vec<usize>>>) {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let sink = emitted.clone();
        let tracker = ProgressTracker::new(
            interval,
            Box::new(move |count| sink.lock().unwrap().push(count)),
        );
        (tracker, emitted)
    }

    #[test]
    fn small_totals_emit_every_update() {
        let (mut t, emitted) = tracker(Duration::from_secs(3600));
        t.update(1);
        t.update(2);
        t.update(3);
        assert_eq!(*emitted.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn large_totals_respect_the_delta_threshold() {
        let (mut t, emitted) = tracker(Duration::from_secs(3600));
        t.update(5_000);
        t.update(5_100); // below delta, suppressed
        t.update(5_000 + DELTA_THRESHOLD);
        assert_eq!(*emitted.lock().unwrap(), vec![5_000, 5_000 + DELTA_THRESHOLD]);
    }

    #[test]
    fn flush_always_reports_a_new_final_value() {
        let (mut t, emitted) = tracker(Duration::from_secs(3600));
        t.update(5_000);
        t.update(5_010);
        t.flush(5_010);
        t.flush(5_010); // unchanged, suppressed
        assert_eq!(*emitted.lock().unwrap(), vec![5_000, 5_010]);
    }
}
