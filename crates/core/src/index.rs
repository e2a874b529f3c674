//! Background file index: a worker pool drains a directory-job channel
//! while a single aggregator folds file records into the entries vector
//! and the rune buckets.
//!
//! The index is append-only during a build and frozen once published;
//! queries clone an `Arc` snapshot under a short lock and never touch the
//! mutex again. A generation counter invalidates query caches whenever a
//! build publishes or the index is torn down.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::bitset::RuneBitset;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::fuzzy::fold_rune;
use crate::ignore_provider::IgnoreProvider;
use crate::progress::{self, ProgressTracker};
use crate::types::{Entry, IndexedEntry};
use crate::walker::{scan_dir, HiddenProbe};

/// Capacity of the directory-job channel; overflow goes to worker-local
/// stacks.
const JOB_QUEUE_CAP: usize = 1024;
/// Capacity of the file-record channel into the aggregator.
const FILE_QUEUE_CAP: usize = 4096;
/// Backoff while the file channel is full and cancellation is pending.
const SEND_BACKOFF: Duration = Duration::from_millis(1);
/// Worker poll interval while waiting for jobs or shutdown.
const JOB_POLL: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// Index data
// ---------------------------------------------------------------------------

/// The frozen product of a build: entries plus rune buckets mapping each
/// indexable rune to the (ascending) indices of entries containing it.
#[derive(Debug, Default)]
pub struct FileIndex {
    pub entries: Vec<IndexedEntry>,
    pub buckets: HashMap<u8, Vec<u32>>,
}

impl FileIndex {
    /// Bucket size for one rune bit; zero means no entry contains it.
    pub fn bucket_len(&self, bit: u8) -> usize {
        self.buckets.get(&bit).map_or(0, Vec::len)
    }

    /// The smallest bucket among `bits`, as candidate enumeration seed.
    pub fn smallest_bucket(&self, bits: &RuneBitset) -> Option<&[u32]> {
        bits.bits()
            .map(|bit| self.buckets.get(&bit).map_or(&[][..], Vec::as_slice))
            .min_by_key(|bucket| bucket.len())
    }
}

/// Telemetry snapshot exposed by the façade.
#[derive(Debug, Clone, Serialize)]
pub struct IndexTelemetry {
    pub root: String,
    pub building: bool,
    pub ready: bool,
    pub disabled: bool,
    pub files_indexed: usize,
    pub threshold: usize,
    pub max_results: usize,
    /// Unix milliseconds; zero when the event never happened.
    pub started_at_ms: u64,
    pub updated_at_ms: u64,
    pub completed_at_ms: u64,
    pub duration_ms: u64,
    pub last_error: String,
}

struct IndexState {
    building: bool,
    ready: bool,
    disabled: bool,
    index: Arc<FileIndex>,
    generation: u64,
    files_indexed: usize,
    started_at_ms: u64,
    updated_at_ms: u64,
    completed_at_ms: u64,
    duration_ms: u64,
    last_error: String,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Shared index slot: one per [`crate::search::Searcher`]. All flags and
/// the entries snapshot live behind a single mutex with short critical
/// sections.
pub struct IndexHandle {
    root: PathBuf,
    config: Config,
    state: Mutex<IndexState>,
}

impl IndexHandle {
    pub fn new(root: &Path, config: Config) -> Arc<IndexHandle> {
        let disabled = config.disable_index;
        Arc::new(IndexHandle {
            root: root.to_path_buf(),
            config,
            state: Mutex::new(IndexState {
                building: false,
                ready: false,
                disabled,
                index: Arc::new(FileIndex::default()),
                generation: 0,
                files_indexed: 0,
                started_at_ms: 0,
                updated_at_ms: 0,
                completed_at_ms: 0,
                duration_ms: 0,
                last_error: String::new(),
            }),
        })
    }

    /// A queryable snapshot, only while `ready ∧ ¬building` and non-empty.
    pub fn snapshot(&self) -> Option<Arc<FileIndex>> {
        let state = self.state.lock().unwrap();
        if state.ready && !state.building && !state.index.entries.is_empty() {
            Some(state.index.clone())
        } else {
            None
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    /// True when a build could be started right now.
    pub fn can_build(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.building && !state.ready && !state.disabled
    }

    pub fn telemetry(&self) -> IndexTelemetry {
        let state = self.state.lock().unwrap();
        IndexTelemetry {
            root: self.root.display().to_string(),
            building: state.building,
            ready: state.ready,
            disabled: state.disabled,
            files_indexed: state.files_indexed,
            threshold: self.config.index_threshold,
            max_results: self.config.index_max_results,
            started_at_ms: state.started_at_ms,
            updated_at_ms: state.updated_at_ms,
            completed_at_ms: state.completed_at_ms,
            duration_ms: state.duration_ms,
            last_error: state.last_error.clone(),
        }
    }

    /// Kick off a background build. Returns false when one is already
    /// running, done, or the index is disabled.
    pub fn begin_build(
        self: &Arc<IndexHandle>,
        provider: Arc<IgnoreProvider>,
        hidden_probe: Option<HiddenProbe>,
        cancel: CancelToken,
    ) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.building || state.ready || state.disabled {
                return false;
            }
            state.building = true;
            state.files_indexed = 0;
            state.started_at_ms = now_ms();
            state.updated_at_ms = state.started_at_ms;
            state.last_error.clear();
        }

        let handle = Arc::clone(self);
        std::thread::Builder::new()
            .name("rdir-index".into())
            .spawn(move || run_build(handle, provider, hidden_probe, cancel))
            .map(|_| true)
            .unwrap_or_else(|err| {
                warn!(%err, "failed to spawn index build thread");
                let mut state = self.state.lock().unwrap();
                state.building = false;
                state.last_error = format!("spawn failed: {err}");
                false
            })
    }
}

// ---------------------------------------------------------------------------
// Build orchestration
// ---------------------------------------------------------------------------

enum DirJob {
    Dir(PathBuf, String),
}

struct FileRecord {
    entry: Entry,
    rel_path: String,
}

fn run_build(
    handle: Arc<IndexHandle>,
    provider: Arc<IgnoreProvider>,
    hidden_probe: Option<HiddenProbe>,
    cancel: CancelToken,
) {
    let started = Instant::now();
    let workers = handle.config.index_workers;
    info!(root = %handle.root.display(), workers, "index build started");

    let (job_tx, job_rx) = mpsc::sync_channel::<DirJob>(JOB_QUEUE_CAP);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (file_tx, file_rx) = mpsc::sync_channel::<FileRecord>(FILE_QUEUE_CAP);

    // One pending slot for the root; each processed directory adds
    // `children - 1`. Zero pending closes the job stream exactly once.
    let pending = Arc::new(AtomicI64::new(1));
    let closed = Arc::new(AtomicBool::new(false));
    job_tx
        .send(DirJob::Dir(handle.root.clone(), String::new()))
        .ok();

    let mut worker_handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let ctx = WorkerCtx {
            job_tx: job_tx.clone(),
            job_rx: Arc::clone(&job_rx),
            file_tx: file_tx.clone(),
            pending: Arc::clone(&pending),
            closed: Arc::clone(&closed),
            cancel: cancel.clone(),
            provider: Arc::clone(&provider),
            hidden_probe: hidden_probe.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("rdir-index-{worker_id}"))
            .spawn(move || worker_loop(ctx));
        match thread {
            Ok(join) => worker_handles.push(join),
            Err(err) => warn!(%err, worker_id, "failed to spawn index worker"),
        }
    }
    drop(job_tx);
    drop(file_tx);

    if worker_handles.is_empty() {
        let mut state = handle.state.lock().unwrap();
        state.building = false;
        state.disabled = true;
        state.last_error = "no index workers".into();
        return;
    }

    let outcome = aggregate(&handle, file_rx, &cancel);
    closed.store(true, Ordering::SeqCst);
    for join in worker_handles {
        let _ = join.join();
    }

    publish(&handle, outcome, started);
}

struct WorkerCtx {
    job_tx: SyncSender<DirJob>,
    job_rx: Arc<Mutex<Receiver<DirJob>>>,
    file_tx: SyncSender<FileRecord>,
    pending: Arc<AtomicI64>,
    closed: Arc<AtomicBool>,
    cancel: CancelToken,
    provider: Arc<IgnoreProvider>,
    hidden_probe: Option<HiddenProbe>,
}

fn worker_loop(ctx: WorkerCtx) {
    // Directories that did not fit in the shared channel.
    let mut local_stack: Vec<DirJob> = Vec::new();

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let job = match local_stack.pop() {
            Some(job) => job,
            None => {
                let recv = { ctx.job_rx.lock().unwrap().recv_timeout(JOB_POLL) };
                match recv {
                    Ok(job) => job,
                    Err(RecvTimeoutError::Timeout) => {
                        if ctx.closed.load(Ordering::SeqCst) || ctx.cancel.is_cancelled() {
                            break;
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        };

        let DirJob::Dir(abs_dir, rel_dir) = job;
        let matcher = ctx
            .provider
            .matcher_for(if rel_dir.is_empty() { "." } else { &rel_dir });

        let mut child_dirs = 0i64;
        for (entry, rel_path) in
            scan_dir(&abs_dir, &rel_dir, &matcher, ctx.hidden_probe.as_ref())
        {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if entry.is_dir {
                child_dirs += 1;
                ctx.provider.warm(&rel_path);
                let job = DirJob::Dir(entry.path.clone(), rel_path);
                match ctx.job_tx.try_send(job) {
                    Ok(()) => {}
                    Err(TrySendError::Full(job)) => local_stack.push(job),
                    Err(TrySendError::Disconnected(_)) => break,
                }
            } else {
                send_record(&ctx, FileRecord { entry, rel_path });
            }
        }

        let remaining = ctx.pending.fetch_add(child_dirs - 1, Ordering::SeqCst) + child_dirs - 1;
        if remaining == 0 && !ctx.closed.swap(true, Ordering::SeqCst) {
            debug!("directory frontier drained, closing job stream");
        }
    }
}

/// Blocking-ish send that stays responsive to cancellation while the
/// aggregator is busy.
fn send_record(ctx: &WorkerCtx, record: FileRecord) {
    let mut record = record;
    loop {
        match ctx.file_tx.try_send(record) {
            Ok(()) => return,
            Err(TrySendError::Full(back)) => {
                if ctx.cancel.is_cancelled() {
                    return;
                }
                record = back;
                std::thread::sleep(SEND_BACKOFF);
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

enum BuildOutcome {
    Complete(FileIndex),
    /// The configured entry cap stopped the walk; the capped index is
    /// still published.
    CapReached(FileIndex),
    /// Cancelled from outside; the partial index is discarded.
    Cancelled,
    Disabled(String),
}

/// Single consumer of file records: builds entries, buckets, and order
/// counters, reporting progress as it goes.
fn aggregate(
    handle: &Arc<IndexHandle>,
    file_rx: Receiver<FileRecord>,
    cancel: &CancelToken,
) -> BuildOutcome {
    let max_results = handle.config.index_max_results;
    let debug_progress = handle.config.debug_progress;

    let mut index = FileIndex::default();
    let mut order = 0u64;
    let mut cap_reached = false;

    let progress_handle = Arc::clone(handle);
    let mut tracker = ProgressTracker::new(
        progress::DEFAULT_INTERVAL,
        Box::new(move |count| {
            if debug_progress {
                debug!(count, "index progress");
            }
            let mut state = progress_handle.state.lock().unwrap();
            state.files_indexed = count;
            state.updated_at_ms = now_ms();
        }),
    );

    while let Ok(record) = file_rx.recv() {
        if cancel.is_cancelled() && !cap_reached {
            // Drain without building so workers never block on a full
            // channel.
            continue;
        }
        if cap_reached {
            continue;
        }

        if index.entries.try_reserve(1).is_err() {
            cancel.cancel();
            return BuildOutcome::Disabled("index arena exhausted".into());
        }

        let rel_lower: String = record.rel_path.chars().map(fold_rune).collect();
        let bitset = RuneBitset::from_lower(&rel_lower);
        let idx = index.entries.len() as u32;
        for bit in bitset.bits() {
            index.buckets.entry(bit).or_default().push(idx);
        }
        index.entries.push(IndexedEntry {
            entry: record.entry,
            rel_lower,
            rel_path: record.rel_path,
            bitset,
            order,
        });
        order += 1;

        tracker.update(index.entries.len());
        if index.entries.len() >= max_results {
            warn!(max_results, "index cap reached, cancelling build");
            cap_reached = true;
            cancel.cancel();
        }
    }

    tracker.flush(index.entries.len());
    if cap_reached {
        BuildOutcome::CapReached(index)
    } else if cancel.is_cancelled() {
        BuildOutcome::Cancelled
    } else {
        BuildOutcome::Complete(index)
    }
}

fn publish(handle: &Arc<IndexHandle>, outcome: BuildOutcome, started: Instant) {
    let mut state = handle.state.lock().unwrap();
    state.building = false;
    state.completed_at_ms = now_ms();
    state.duration_ms = started.elapsed().as_millis() as u64;
    state.generation += 1;

    match outcome {
        BuildOutcome::Complete(index) | BuildOutcome::CapReached(index) => {
            state.files_indexed = index.entries.len();
            info!(
                entries = index.entries.len(),
                duration_ms = state.duration_ms,
                "index build complete"
            );
            state.index = Arc::new(index);
            state.ready = true;
        }
        BuildOutcome::Cancelled => {
            debug!("index build cancelled, discarding partial index");
            state.ready = false;
        }
        BuildOutcome::Disabled(err) => {
            state.disabled = true;
            state.ready = false;
            warn!(%err, "index disabled for this session");
            state.last_error = err;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn wait_done(handle: &Arc<IndexHandle>) -> IndexTelemetry {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let telemetry = handle.telemetry();
            if !telemetry.building {
                return telemetry;
            }
            assert!(Instant::now() < deadline, "index build did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn config() -> Config {
        Config {
            index_workers: 3,
            ..Config::default()
        }
    }

    #[test]
    fn build_indexes_the_whole_tree_with_monotonic_order() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "src/main.rs");
        touch(tmp.path(), "src/lib.rs");
        touch(tmp.path(), "docs/guide.md");
        touch(tmp.path(), "README.md");
        fs::write(tmp.path().join(".gitignore"), "*.log\n").unwrap();
        touch(tmp.path(), "debug.log");

        let handle = IndexHandle::new(tmp.path(), config());
        let provider = Arc::new(IgnoreProvider::new(tmp.path()));
        assert!(handle.begin_build(provider, None, CancelToken::new()));
        // A second build cannot start while one runs or after it is ready.
        let telemetry = wait_done(&handle);
        assert!(telemetry.ready);
        assert!(!handle.can_build());

        let index = handle.snapshot().expect("snapshot after ready");
        let mut rels: Vec<&str> = index.entries.iter().map(|e| e.rel_path.as_str()).collect();
        rels.sort_unstable();
        assert_eq!(
            rels,
            [".gitignore", "README.md", "docs/guide.md", "src/lib.rs", "src/main.rs"]
        );

        for (i, entry) in index.entries.iter().enumerate() {
            assert_eq!(entry.order, i as u64, "orders are dense and monotonic");
            assert!(entry
                .bitset
                .contains(&RuneBitset::from_lower(&entry.rel_lower)));
        }

        // Buckets agree with entry contents.
        let bit = crate::bitset::rune_bit('g').unwrap();
        let bucket = index.buckets.get(&bit).expect("'g' bucket");
        for &idx in bucket {
            assert!(index.entries[idx as usize].rel_lower.contains('g'));
        }
        assert!(index.bucket_len(bit) >= 2);
    }

    #[test]
    fn cap_reached_publishes_a_capped_index() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..20 {
            touch(tmp.path(), &format!("f{i:02}.txt"));
        }
        let mut cfg = config();
        cfg.index_max_results = 5;
        let handle = IndexHandle::new(tmp.path(), cfg);
        let provider = Arc::new(IgnoreProvider::new(tmp.path()));
        assert!(handle.begin_build(provider, None, CancelToken::new()));
        let telemetry = wait_done(&handle);
        assert!(telemetry.ready);
        let index = handle.snapshot().unwrap();
        assert_eq!(index.entries.len(), 5);
    }

    #[test]
    fn cancelled_build_discards_partial_state() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.txt");
        let handle = IndexHandle::new(tmp.path(), config());
        let provider = Arc::new(IgnoreProvider::new(tmp.path()));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(handle.begin_build(provider, None, cancel));
        let telemetry = wait_done(&handle);
        assert!(!telemetry.ready);
        assert!(handle.snapshot().is_none());
        // The generation still advanced so stale caches die.
        assert_eq!(handle.generation(), 1);
    }

    #[test]
    fn empty_tree_is_ready_but_not_queryable() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = IndexHandle::new(tmp.path(), config());
        let provider = Arc::new(IgnoreProvider::new(tmp.path()));
        assert!(handle.begin_build(provider, None, CancelToken::new()));
        let telemetry = wait_done(&handle);
        assert!(telemetry.ready);
        assert!(handle.snapshot().is_none(), "zero entries never serve queries");
    }

    #[test]
    fn disabled_config_refuses_builds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.disable_index = true;
        let handle = IndexHandle::new(tmp.path(), cfg);
        let provider = Arc::new(IgnoreProvider::new(tmp.path()));
        assert!(!handle.begin_build(provider, None, CancelToken::new()));
        assert!(handle.telemetry().disabled);
    }
}
