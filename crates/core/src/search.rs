//! The search façade: dispatches queries to the in-memory index when it is
//! ready, falls back to the filesystem walker otherwise, owns cancellation
//! between back-to-back async searches, and feeds streaming callbacks.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use tracing::{debug, warn};

use crate::accumulator::{AsyncAccumulator, AsyncCallback, MAX_DISPLAY_RESULTS};
use crate::cancel::CancelToken;
use crate::collector::TopKCollector;
use crate::config::{Config, SpanMode};
use crate::fuzzy::{merge_spans, FuzzyMatcher, MatchSpan};
use crate::ignore_provider::IgnoreProvider;
use crate::index::{FileIndex, IndexHandle, IndexTelemetry};
use crate::query::{order_by_selectivity, prepare_query_tokens, QueryPlan};
use crate::rank::segment_boost;
use crate::types::{segment_count, Entry, GlobalSearchResult};
use crate::walker::{walk, HiddenProbe};

/// Bounded query cache: cleared wholesale at capacity and whenever the
/// index generation moves.
const QUERY_CACHE_CAP: usize = 32;
/// Chunk size for parallel candidate scoring.
const SCORE_CHUNK: usize = 512;

// ---------------------------------------------------------------------------
// Searcher
// ---------------------------------------------------------------------------

struct QueryCache {
    generation: u64,
    entries: std::collections::HashMap<(String, bool), Arc<Vec<GlobalSearchResult>>>,
}

/// Search engine for one root directory. Owns the ignore provider, the
/// background index, and async-search cancellation.
pub struct Searcher {
    root: PathBuf,
    config: Config,
    matcher: FuzzyMatcher,
    provider: Arc<IgnoreProvider>,
    index: Arc<IndexHandle>,
    hidden_probe: Option<HiddenProbe>,
    /// Monotonic token: only the search holding the current value may
    /// deliver callbacks.
    current_token: Arc<AtomicU64>,
    /// Cancel function of the in-flight async search.
    ongoing: Mutex<Option<CancelToken>>,
    /// Cancel function of the background index build.
    build_cancel: Mutex<Option<CancelToken>>,
    /// Serializes callback delivery against token bumps so a cancelled
    /// search can never deliver after its successor's first callback.
    callback_gate: Arc<Mutex<()>>,
    query_cache: RwLock<QueryCache>,
}

impl Searcher {
    pub fn new(root: &Path) -> Arc<Searcher> {
        Searcher::with_config(root, Config::global().clone())
    }

    pub fn with_config(root: &Path, config: Config) -> Arc<Searcher> {
        Searcher::with_options(root, config, None)
    }

    pub fn with_options(
        root: &Path,
        config: Config,
        hidden_probe: Option<HiddenProbe>,
    ) -> Arc<Searcher> {
        Arc::new(Searcher {
            root: root.to_path_buf(),
            matcher: FuzzyMatcher::with_config(&config),
            provider: Arc::new(IgnoreProvider::new(root)),
            index: IndexHandle::new(root, config.clone()),
            hidden_probe,
            current_token: Arc::new(AtomicU64::new(0)),
            ongoing: Mutex::new(None),
            build_cancel: Mutex::new(None),
            callback_gate: Arc::new(Mutex::new(())),
            query_cache: RwLock::new(QueryCache {
                generation: 0,
                entries: std::collections::HashMap::new(),
            }),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn telemetry(&self) -> IndexTelemetry {
        self.index.telemetry()
    }

    /// Cancel the in-flight async search, if any, and invalidate its
    /// delivery token.
    pub fn cancel_ongoing(&self) {
        if let Some(token) = self.ongoing.lock().unwrap().take() {
            token.cancel();
        }
        self.current_token.fetch_add(1, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Synchronous search
    // -----------------------------------------------------------------------

    /// Search under the root, index-accelerated when possible. Results are
    /// sorted best-first under the dominance predicate.
    pub fn search_recursive(
        &self,
        query: &str,
        case_sensitive: Option<bool>,
    ) -> Vec<GlobalSearchResult> {
        let cancel = CancelToken::new();
        if let Some(index) = self.index.snapshot() {
            return self.search_index(&index, query, case_sensitive);
        }
        let (results, _seen) = self.search_walk(query, case_sensitive, &cancel, None);
        results
    }

    // -----------------------------------------------------------------------
    // Asynchronous search
    // -----------------------------------------------------------------------

    /// Cancel any in-flight search, then stream this one's results to
    /// `callback`. Delivery ends with exactly one `(_, true, false)` call
    /// unless a later search supersedes this one first.
    pub fn search_recursive_async(
        self: &Arc<Self>,
        query: &str,
        case_sensitive: Option<bool>,
        callback: AsyncCallback,
    ) {
        self.cancel_ongoing();
        let token_id = self.current_token.load(Ordering::SeqCst);
        let cancel = CancelToken::new();
        *self.ongoing.lock().unwrap() = Some(cancel.clone());

        let searcher = Arc::clone(self);
        let query = query.to_string();
        let spawned = thread::Builder::new()
            .name("rdir-search".into())
            .spawn(move || {
                let gate = Arc::clone(&searcher.callback_gate);
                let current = Arc::clone(&searcher.current_token);
                let guarded: AsyncCallback = Arc::new(move |results, done, in_progress| {
                    let _delivery = gate.lock().unwrap();
                    if current.load(Ordering::SeqCst) == token_id {
                        (*callback)(results, done, in_progress);
                    }
                });

                if let Some(index) = searcher.index.snapshot() {
                    let results = searcher.search_index(&index, &query, case_sensitive);
                    if results.len() >= crate::accumulator::MERGE_STATUS_MINIMUM_RESULTS {
                        (*guarded)(&results, true, true);
                    }
                    (*guarded)(&results, true, false);
                } else {
                    let mut accumulator = AsyncAccumulator::new(guarded.clone());
                    let (results, _seen) = searcher.search_walk(
                        &query,
                        case_sensitive,
                        &cancel,
                        Some(&mut accumulator),
                    );
                    accumulator.finish(&results);
                }
            });
        if let Err(err) = spawned {
            warn!(%err, "failed to spawn search thread");
        }
    }

    // -----------------------------------------------------------------------
    // Walker path
    // -----------------------------------------------------------------------

    fn search_walk(
        &self,
        query: &str,
        case_sensitive: Option<bool>,
        cancel: &CancelToken,
        mut accumulator: Option<&mut AsyncAccumulator>,
    ) -> (Vec<GlobalSearchResult>, usize) {
        let plan = prepare_query_tokens(query, case_sensitive);
        let mut collector = TopKCollector::new(MAX_DISPLAY_RESULTS);
        let mut order = 0u64;
        let mut build_kicked = false;

        let seen = walk(
            &self.root,
            &self.provider,
            self.hidden_probe.as_ref(),
            cancel,
            &mut |entry, rel_path| {
                let result = if plan.is_match_all() {
                    Some(match_all_result(&entry, rel_path, order))
                } else {
                    let rel_lower: String =
                        rel_path.chars().map(crate::fuzzy::fold_rune).collect();
                    self.score_entry(&plan, rel_path, &rel_lower, &entry, order, SpanMode::Full)
                };
                order += 1;

                if let Some(result) = result {
                    if let Some(acc) = accumulator.as_deref_mut() {
                        acc.add(result.clone());
                    }
                    if collector.needs(&result) {
                        collector.store(result);
                    }
                }

                // Amortize later queries: once the walk proves the tree is
                // big enough, start indexing it in the background.
                if !build_kicked && order as usize >= self.config.index_threshold {
                    build_kicked = true;
                    self.maybe_start_index_build();
                }
            },
        );

        if !build_kicked && seen >= self.config.index_threshold {
            self.maybe_start_index_build();
        }
        (collector.into_sorted_results(), seen)
    }

    fn maybe_start_index_build(&self) {
        if self.config.disable_index || !self.index.can_build() {
            return;
        }
        let cancel = CancelToken::new();
        let started = self.index.begin_build(
            Arc::clone(&self.provider),
            self.hidden_probe.clone(),
            cancel.clone(),
        );
        if started {
            *self.build_cancel.lock().unwrap() = Some(cancel);
        }
    }

    // -----------------------------------------------------------------------
    // Index path
    // -----------------------------------------------------------------------

    fn search_index(
        &self,
        index: &Arc<FileIndex>,
        query: &str,
        case_sensitive: Option<bool>,
    ) -> Vec<GlobalSearchResult> {
        let mut plan = prepare_query_tokens(query, case_sensitive);
        let cache_key = (query.to_string(), plan.case_sensitive);
        let generation = self.index.generation();

        if let Some(cached) = self.cache_lookup(&cache_key, generation) {
            return (*cached).clone();
        }

        let results = if plan.is_match_all() {
            let mut collector = TopKCollector::new(MAX_DISPLAY_RESULTS);
            for entry in &index.entries {
                let result = match_all_result(&entry.entry, &entry.rel_path, entry.order);
                if collector.needs(&result) {
                    collector.store(result);
                }
            }
            collector.into_sorted_results()
        } else {
            order_by_selectivity(&mut plan.tokens, |bit| index.bucket_len(bit));
            let combined = plan.combined_bitset();

            // Candidate pruning: enumerate the rarest rune's bucket, then
            // demand every query rune via the bitset AND.
            let mut candidates = crate::pool::acquire_indices(index.entries.len());
            match index.smallest_bucket(&combined) {
                Some(bucket) => candidates.extend(
                    bucket
                        .iter()
                        .copied()
                        .filter(|&i| index.entries[i as usize].bitset.contains(&combined)),
                ),
                None => candidates.extend(0..index.entries.len() as u32),
            }
            debug!(
                candidates = candidates.len(),
                total = index.entries.len(),
                "index candidate filter"
            );

            let collector = candidates
                .par_chunks(SCORE_CHUNK)
                .map(|chunk| {
                    let mut local = TopKCollector::new(MAX_DISPLAY_RESULTS);
                    for &i in chunk {
                        let indexed = &index.entries[i as usize];
                        if let Some(result) = self.score_entry(
                            &plan,
                            &indexed.rel_path,
                            &indexed.rel_lower,
                            &indexed.entry,
                            indexed.order,
                            self.config.span_mode,
                        ) {
                            if local.needs(&result) {
                                local.store(result);
                            }
                        }
                    }
                    local
                })
                .reduce(
                    || TopKCollector::new(MAX_DISPLAY_RESULTS),
                    |mut a, b| {
                        a.merge(b);
                        a
                    },
                );
            collector.into_sorted_results()
        };

        self.cache_store(cache_key, &results, generation);
        results
    }

    fn cache_lookup(
        &self,
        key: &(String, bool),
        generation: u64,
    ) -> Option<Arc<Vec<GlobalSearchResult>>> {
        let cache = self.query_cache.read().unwrap();
        if cache.generation != generation {
            return None;
        }
        cache.entries.get(key).cloned()
    }

    fn cache_store(&self, key: (String, bool), results: &[GlobalSearchResult], generation: u64) {
        let mut cache = self.query_cache.write().unwrap();
        if self.index.generation() != generation {
            // A build published mid-query; these results belong to the
            // superseded index.
            return;
        }
        if cache.generation != generation {
            cache.entries.clear();
            cache.generation = generation;
        }
        if cache.entries.len() >= QUERY_CACHE_CAP {
            cache.entries.clear();
        }
        cache.entries.insert(key, Arc::new(results.to_vec()));
    }

    // -----------------------------------------------------------------------
    // Scoring
    // -----------------------------------------------------------------------

    /// Token-AND match of one entry: every token must align, scores and
    /// details aggregate across tokens. `None` means "not a candidate".
    fn score_entry(
        &self,
        plan: &QueryPlan,
        rel_path: &str,
        rel_lower: &str,
        entry: &Entry,
        order: u64,
        span_mode: SpanMode,
    ) -> Option<GlobalSearchResult> {
        let text: &str = if plan.case_sensitive {
            rel_path
        } else {
            rel_lower
        };

        let mut total = 0.0f64;
        let mut start = i32::MAX;
        let mut end = -1i32;
        let mut match_count = 0usize;
        let mut word_hits = 0usize;
        let mut spans: Vec<MatchSpan> = Vec::new();

        for token in &plan.tokens {
            if !is_subsequence(&token.pattern_runes, text) {
                return None;
            }
            let (score, matched, details) = self.matcher.match_runes(&token.pattern_runes, text, true);
            if !matched {
                return None;
            }
            total += score + segment_boost(&token.pattern, text, &details);
            start = start.min(details.start);
            end = end.max(details.end);
            match_count += details.match_count;
            word_hits += details.word_hits;
            if span_mode != SpanMode::None {
                if let Some(token_spans) = details.spans {
                    spans.extend(token_spans);
                }
            }
        }

        let spans = match span_mode {
            SpanMode::None => None,
            SpanMode::Positions => {
                spans.sort_by_key(|s| (s.start, s.end));
                Some(spans)
            }
            SpanMode::Full => Some(merge_spans(spans)),
        };

        Some(GlobalSearchResult {
            path: entry.path.display().to_string(),
            name: entry.name.clone(),
            directory: entry.dir.display().to_string(),
            score: total,
            path_len: rel_path.chars().count(),
            match_start: start,
            match_end: end,
            match_count,
            word_hits,
            segments: segment_count(rel_path),
            order,
            has_match: true,
            spans,
            entry: entry.clone(),
        })
    }
}

impl Drop for Searcher {
    fn drop(&mut self) {
        self.cancel_ongoing();
        if let Some(token) = self.build_cancel.lock().unwrap().take() {
            token.cancel();
        }
    }
}

/// Empty-query result: every visited entry, score 1.0, no match data.
fn match_all_result(entry: &Entry, rel_path: &str, order: u64) -> GlobalSearchResult {
    GlobalSearchResult {
        path: entry.path.display().to_string(),
        name: entry.name.clone(),
        directory: entry.dir.display().to_string(),
        score: 1.0,
        path_len: rel_path.chars().count(),
        match_start: -1,
        match_end: -1,
        match_count: 0,
        word_hits: 0,
        segments: segment_count(rel_path),
        order,
        has_match: false,
        spans: None,
        entry: entry.clone(),
    }
}

/// Cheap necessary condition for a fuzzy match: the pattern's runes appear
/// in order in the target.
fn is_subsequence(needle: &[char], hay: &str) -> bool {
    let mut needle = needle.iter();
    let mut current = match needle.next() {
        None => return true,
        Some(&c) => c,
    };
    for c in hay.chars() {
        if c == current {
            match needle.next() {
                None => return true,
                Some(&next) => current = next,
            }
        }
    }
    false
}
