//! Fuzzy matching for go-to-file style queries: substring fast path with a
//! boundary-aware scoring pass, then a beam-pruned dynamic-programming
//! alignment when the pattern is scattered across the target.
//!
//! Scores are additive bonuses per matched rune, shaped so that contiguous
//! runs, word boundaries and final-segment matches dominate, with gap and
//! trailing penalties pulling scattered alignments down. Positions are rune
//! indices into the target.

use serde::Serialize;
use tracing::debug;

use crate::boundary::BoundaryCache;
use crate::config::{Config, DpKind};
use crate::pool::{self, DP_START};

// ---------------------------------------------------------------------------
// Scoring constants
// ---------------------------------------------------------------------------

const CHAR_BONUS: f64 = 1.2;
const BOUNDARY_BONUS: f64 = 0.6;
const CONSECUTIVE_BONUS: f64 = 1.2;
const GAP_PENALTY: f64 = 0.18;
/// Leading penalty per column before the first matched rune, as a fraction
/// of the gap penalty.
const LEADING_PENALTY_SCALE: f64 = 0.02;

const SUBSTRING_BONUS: f64 = 1.2;
/// Attenuation when the rune before the substring is `- _ space . :`.
const SUBSTRING_ATTENUATION_SOFT: f64 = 0.3;
/// Attenuation when the rune before the substring is an interior letter.
const SUBSTRING_ATTENUATION_WORD: f64 = 0.15;
const PREFIX_BONUS: f64 = 2.4;

const FINAL_SEGMENT_BONUS: f64 = 2.0;
const CROSS_SEGMENT_PENALTY: f64 = 0.9;
const START_PENALTY_FACTOR: f64 = 0.012;
const WORD_HIT_BONUS: f64 = 3.2;

/// Trailing runes after the match that are free of charge.
const TRAILING_FREE: usize = 20;
const TRAILING_PENALTY_SCALE: f64 = 0.25;

/// Beam: columns evaluated per row relative to the previous row's active
/// interval, and the margin added to the interval when shifting rows.
const BEAM_RADIUS: usize = 96;
const BEAM_MARGIN: usize = 48;

const SCORE_NONE: f64 = f64::NEG_INFINITY;

// ---------------------------------------------------------------------------
// Match output types
// ---------------------------------------------------------------------------

/// Inclusive `[start, end]` highlight range in rune indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchSpan {
    pub start: i32,
    pub end: i32,
}

/// Where and how a pattern landed in a target.
#[derive(Debug, Clone, Serialize)]
pub struct MatchDetails {
    /// Rune index of the first matched rune, -1 when nothing matched.
    pub start: i32,
    /// Rune index of the last matched rune, -1 when nothing matched (and
    /// for the empty pattern, which matches before the first rune).
    pub end: i32,
    /// Target length in runes.
    pub target_len: usize,
    /// Matched code points (= pattern length on success).
    pub match_count: usize,
    /// Matched positions that sit on a strong word boundary.
    pub word_hits: usize,
    /// Optional highlight spans; a single `[start, end]` span from the
    /// matcher, expandable per-token by callers.
    pub spans: Option<Vec<MatchSpan>>,
}

impl Default for MatchDetails {
    fn default() -> Self {
        MatchDetails {
            start: -1,
            end: -1,
            target_len: 0,
            match_count: 0,
            word_hits: 0,
            spans: None,
        }
    }
}

/// One entry of a [`FuzzyMatcher::match_multiple`] result.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FuzzyMatch {
    pub index: usize,
    pub score: f64,
}

/// Merge overlapping or adjacent spans, returning a sorted, disjoint list.
/// Idempotent.
pub fn merge_spans(mut spans: Vec<MatchSpan>) -> Vec<MatchSpan> {
    if spans.len() <= 1 {
        return spans;
    }
    spans.sort_by_key(|s| (s.start, s.end));
    let mut merged: Vec<MatchSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end + 1 => {
                last.end = last.end.max(span.end);
            }
            _ => merged.push(span),
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Case folding
// ---------------------------------------------------------------------------

/// One-to-one lowercase fold: ASCII fast path, first scalar of the Unicode
/// lowering otherwise.
#[inline]
pub fn fold_rune(c: char) -> char {
    if c.is_ascii() {
        c.to_ascii_lowercase()
    } else {
        c.to_lowercase().next().unwrap_or(c)
    }
}

/// Smart case: case-sensitive iff the pattern contains any uppercase code
/// point.
pub fn smart_case_sensitive(pattern: &str) -> bool {
    pattern.chars().any(char::is_uppercase)
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Scoring engine for (pattern, text) pairs. Cheap to construct and clone;
/// all scratch state lives in thread-local pools.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    /// Results scoring below this are dropped by `match_multiple`.
    pub min_score: f64,
    dp_kind: DpKind,
    debug: bool,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        FuzzyMatcher::with_config(Config::global())
    }
}

impl FuzzyMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(cfg: &Config) -> Self {
        FuzzyMatcher {
            min_score: 0.0,
            dp_kind: cfg.dp_kind,
            debug: cfg.debug_fuzzy,
        }
    }

    /// Score `pattern` against `text` with smart-case semantics.
    pub fn match_simple(&self, pattern: &str, text: &str) -> (f64, bool) {
        let (score, matched, _) = self.match_detailed(pattern, text);
        (score, matched)
    }

    /// Score with full details; case mode derived by smart case.
    pub fn match_detailed(&self, pattern: &str, text: &str) -> (f64, bool, MatchDetails) {
        self.match_detailed_with_case(pattern, text, smart_case_sensitive(pattern))
    }

    /// Score with an explicit case mode.
    pub fn match_detailed_with_case(
        &self,
        pattern: &str,
        text: &str,
        case_sensitive: bool,
    ) -> (f64, bool, MatchDetails) {
        let mut pattern_runes = pool::acquire_runes(pattern.len());
        if case_sensitive {
            pattern_runes.extend(pattern.chars());
        } else {
            pattern_runes.extend(pattern.chars().map(fold_rune));
        }
        self.match_runes(&pattern_runes, text, case_sensitive)
    }

    /// Score a pre-folded pattern (folded iff `case_sensitive` is false)
    /// against a target. The engine folds each query token once and calls
    /// this per candidate.
    pub fn match_runes(
        &self,
        pattern: &[char],
        text: &str,
        case_sensitive: bool,
    ) -> (f64, bool, MatchDetails) {
        if pattern.is_empty() {
            return (
                1.0,
                true,
                MatchDetails {
                    start: 0,
                    end: -1,
                    target_len: text.chars().count(),
                    ..MatchDetails::default()
                },
            );
        }

        let mut runes = pool::acquire_runes(text.len());
        if case_sensitive {
            runes.extend(text.chars());
        } else {
            runes.extend(text.chars().map(fold_rune));
        }
        let n = runes.len();
        let m = pattern.len();
        if m > n {
            return (0.0, false, MatchDetails::default());
        }

        let mut boundary = pool::acquire_boundary(n);

        // Byte-level search when everything is ASCII; byte and rune
        // indices coincide there.
        let substring = if is_ascii(&runes) && is_ascii(pattern) {
            let mut text_bytes = pool::acquire_bytes(n);
            text_bytes.extend(runes.iter().map(|&c| c as u8));
            let mut pattern_bytes = pool::acquire_bytes(m);
            pattern_bytes.extend(pattern.iter().map(|&c| c as u8));
            find_substring_bytes(&text_bytes, &pattern_bytes)
        } else {
            find_substring(&runes, pattern)
        };

        let (raw_score, start, end, word_hits) = if let Some(idx) = substring {
            let score = score_substring(&runes, pattern, idx, &mut boundary);
            let hits = (idx..idx + m)
                .filter(|&p| boundary.is_strong_boundary(&runes, p))
                .count();
            (score, idx, idx + m - 1, hits)
        } else {
            let dp = match self.dp_kind {
                DpKind::Ascii32 if is_ascii(&runes) && is_ascii(pattern) => {
                    match_runes_dp32(&runes, pattern, &mut boundary)
                }
                _ => match_runes_dp(&runes, pattern, &mut boundary),
            };
            let Some((score, positions)) = dp else {
                return (0.0, false, MatchDetails::default());
            };
            let hits = positions
                .iter()
                .filter(|&&p| boundary.is_strong_boundary(&runes, p as usize))
                .count();
            (
                score,
                positions[0] as usize,
                positions[m - 1] as usize,
                hits,
            )
        };

        let score = refine_score(raw_score, start, end, word_hits, &runes);
        if self.debug {
            debug!(
                pattern_len = m,
                target_len = n,
                start,
                end,
                word_hits,
                score,
                "fuzzy match"
            );
        }

        let details = MatchDetails {
            start: start as i32,
            end: end as i32,
            target_len: n,
            match_count: m,
            word_hits,
            spans: Some(vec![MatchSpan {
                start: start as i32,
                end: end as i32,
            }]),
        };
        (score, true, details)
    }

    /// Score one pattern against many texts, returning matches at or above
    /// `min_score` sorted by descending score, ties stable by input index.
    pub fn match_multiple(&self, pattern: &str, texts: &[&str]) -> Vec<FuzzyMatch> {
        let case_sensitive = smart_case_sensitive(pattern);
        let mut pattern_runes = pool::acquire_runes(pattern.len());
        if case_sensitive {
            pattern_runes.extend(pattern.chars());
        } else {
            pattern_runes.extend(pattern.chars().map(fold_rune));
        }

        let mut matches: Vec<FuzzyMatch> = texts
            .iter()
            .enumerate()
            .filter_map(|(index, text)| {
                let (score, matched, _) = self.match_runes(&pattern_runes, text, case_sensitive);
                (matched && score >= self.min_score).then_some(FuzzyMatch { index, score })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        matches
    }
}

fn is_ascii(runes: &[char]) -> bool {
    runes.iter().all(char::is_ascii)
}

// ---------------------------------------------------------------------------
// Substring fast path
// ---------------------------------------------------------------------------

/// First occurrence of `pattern` in `text`, as a rune index.
fn find_substring(text: &[char], pattern: &[char]) -> Option<usize> {
    if pattern.len() > text.len() {
        return None;
    }
    let last = text.len() - pattern.len();
    'outer: for i in 0..=last {
        for (k, &p) in pattern.iter().enumerate() {
            if text[i + k] != p {
                continue 'outer;
            }
        }
        return Some(i);
    }
    None
}

/// ASCII fast path of [`find_substring`].
fn find_substring_bytes(text: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > text.len() {
        return None;
    }
    text.windows(pattern.len()).position(|window| window == pattern)
}

/// Score a contiguous run found by the fast path.
fn score_substring(
    runes: &[char],
    pattern: &[char],
    idx: usize,
    boundary: &mut BoundaryCache,
) -> f64 {
    let mut score = 0.0;
    for k in 0..pattern.len() {
        let pos = idx + k;
        score += CHAR_BONUS;
        if boundary.is_word_boundary(runes, pos) {
            score += BOUNDARY_BONUS;
        }
        if k == 0 {
            score -= GAP_PENALTY * LEADING_PENALTY_SCALE * idx as f64;
        } else {
            score += CONSECUTIVE_BONUS;
        }
    }

    let mut substring_bonus = SUBSTRING_BONUS;
    if idx > 0 {
        let prev = runes[idx - 1];
        if prev == '/' || prev == '\\' {
            // Segment-initial: keep the full bonus.
        } else if matches!(prev, '-' | '_' | ' ' | '.' | ':') {
            substring_bonus *= SUBSTRING_ATTENUATION_SOFT;
        } else if prev.is_alphabetic() {
            substring_bonus *= SUBSTRING_ATTENUATION_WORD;
        }
    }
    score += substring_bonus;
    if idx == 0 {
        score += PREFIX_BONUS;
    }
    score
}

// ---------------------------------------------------------------------------
// Beamed DP fallback
// ---------------------------------------------------------------------------

/// Needleman–Wunsch-style alignment over (pattern rows, text columns) with
/// beam pruning around the previous row's active interval. Returns the
/// final score and the `m` matched positions, or `None` when the pattern
/// cannot be aligned.
fn match_runes_dp(
    runes: &[char],
    pattern: &[char],
    boundary: &mut BoundaryCache,
) -> Option<(f64, Vec<u32>)> {
    let n = runes.len();
    let m = pattern.len();
    let mut dp_guard = pool::acquire_dp(m, n, false);
    let dp = &mut *dp_guard;

    // Row 0: every occurrence of the first pattern rune, with the leading
    // penalty biasing toward early columns.
    let mut active_lo = usize::MAX;
    let mut active_hi = 0usize;
    {
        let hi = n - m; // room for the remaining pattern
        for j in 0..n {
            dp.prev[j] = SCORE_NONE;
        }
        for j in 0..=hi {
            if runes[j] != pattern[0] {
                continue;
            }
            let mut cell = CHAR_BONUS - GAP_PENALTY * LEADING_PENALTY_SCALE * j as f64;
            if boundary.is_word_boundary(runes, j) {
                cell += BOUNDARY_BONUS;
            }
            dp.prev[j] = cell;
            dp.set_back(0, j, DP_START);
            active_lo = active_lo.min(j);
            active_hi = active_hi.max(j);
        }
    }
    if active_lo == usize::MAX {
        return None;
    }
    let mut prev_lo = 0usize;
    let mut prev_hi = n - m;

    for i in 1..m {
        let lo = active_lo.saturating_sub(BEAM_RADIUS).max(i);
        let hi = (active_hi + BEAM_RADIUS).min(n - (m - i));
        if lo > hi {
            return None;
        }

        // Running best over the previous row: after the per-column decay
        // and the `j - 1` entrant, `best_prev` holds
        // `max over j' <= j-1 of prev[j'] - gap * (j - 1 - j')`.
        let mut best_prev = SCORE_NONE;
        let mut best_prev_col = 0u32;
        if lo >= 2 {
            let seed_end = (lo - 1).min(prev_hi + 1);
            for j in prev_lo..seed_end {
                let decayed = dp.prev[j] - GAP_PENALTY * ((lo - 2) - j) as f64;
                if decayed > best_prev {
                    best_prev = decayed;
                    best_prev_col = j as u32;
                }
            }
        }

        let mut row_lo = usize::MAX;
        let mut row_hi = 0usize;
        for j in lo..=hi {
            best_prev -= GAP_PENALTY;
            if j > 0 && (prev_lo..=prev_hi).contains(&(j - 1)) {
                let p = dp.prev[j - 1];
                if p > best_prev {
                    best_prev = p;
                    best_prev_col = (j - 1) as u32;
                }
            }

            let cell = if runes[j] == pattern[i] && best_prev.is_finite() {
                let mut score = best_prev + CHAR_BONUS;
                if boundary.is_word_boundary(runes, j) {
                    score += BOUNDARY_BONUS;
                }
                if best_prev_col as usize == j - 1 {
                    score += CONSECUTIVE_BONUS;
                }
                dp.set_back(i, j, best_prev_col);
                row_lo = row_lo.min(j);
                row_hi = row_hi.max(j);
                score
            } else {
                SCORE_NONE
            };
            dp.cur[j] = cell;
        }
        if row_lo == usize::MAX {
            return None;
        }

        std::mem::swap(&mut dp.prev, &mut dp.cur);
        prev_lo = lo;
        prev_hi = hi;
        active_lo = row_lo.saturating_sub(BEAM_MARGIN);
        active_hi = (row_hi + BEAM_MARGIN).min(n - 1);
    }

    // Best terminal column in the last row.
    let mut best = SCORE_NONE;
    let mut end = 0usize;
    for j in prev_lo..=prev_hi {
        if dp.prev[j] > best {
            best = dp.prev[j];
            end = j;
        }
    }
    if !best.is_finite() {
        return None;
    }

    // Trailing penalty: matches that strand a long tail of the target.
    let trail = n - 1 - end;
    if trail > TRAILING_FREE {
        best -= GAP_PENALTY * TRAILING_PENALTY_SCALE * ((trail - TRAILING_FREE) / 10) as f64;
    }

    let positions = reconstruct(dp, m, end)?;
    Some((best, positions))
}

/// Experimental f32 variant for all-ASCII inputs, selected by
/// `RDIR_EXPERIMENTAL_ASCII_DP32`. Mirrors [`match_runes_dp`]; the scalar
/// path is the reference implementation.
fn match_runes_dp32(
    runes: &[char],
    pattern: &[char],
    boundary: &mut BoundaryCache,
) -> Option<(f64, Vec<u32>)> {
    const NONE32: f32 = f32::NEG_INFINITY;
    let n = runes.len();
    let m = pattern.len();
    let mut dp_guard = pool::acquire_dp(m, n, true);
    let dp = &mut *dp_guard;

    let mut active_lo = usize::MAX;
    let mut active_hi = 0usize;
    {
        let hi = n - m;
        for j in 0..n {
            dp.prev32[j] = NONE32;
        }
        for j in 0..=hi {
            if runes[j] != pattern[0] {
                continue;
            }
            let mut cell = (CHAR_BONUS - GAP_PENALTY * LEADING_PENALTY_SCALE * j as f64) as f32;
            if boundary.is_word_boundary(runes, j) {
                cell += BOUNDARY_BONUS as f32;
            }
            dp.prev32[j] = cell;
            dp.set_back(0, j, DP_START);
            active_lo = active_lo.min(j);
            active_hi = active_hi.max(j);
        }
    }
    if active_lo == usize::MAX {
        return None;
    }
    let mut prev_lo = 0usize;
    let mut prev_hi = n - m;

    for i in 1..m {
        let lo = active_lo.saturating_sub(BEAM_RADIUS).max(i);
        let hi = (active_hi + BEAM_RADIUS).min(n - (m - i));
        if lo > hi {
            return None;
        }

        let mut best_prev = NONE32;
        let mut best_prev_col = 0u32;
        if lo >= 2 {
            let seed_end = (lo - 1).min(prev_hi + 1);
            for j in prev_lo..seed_end {
                let decayed = dp.prev32[j] - (GAP_PENALTY * ((lo - 2) - j) as f64) as f32;
                if decayed > best_prev {
                    best_prev = decayed;
                    best_prev_col = j as u32;
                }
            }
        }

        let mut row_lo = usize::MAX;
        let mut row_hi = 0usize;
        for j in lo..=hi {
            best_prev -= GAP_PENALTY as f32;
            if j > 0 && (prev_lo..=prev_hi).contains(&(j - 1)) {
                let p = dp.prev32[j - 1];
                if p > best_prev {
                    best_prev = p;
                    best_prev_col = (j - 1) as u32;
                }
            }

            let cell = if runes[j] == pattern[i] && best_prev.is_finite() {
                let mut score = best_prev + CHAR_BONUS as f32;
                if boundary.is_word_boundary(runes, j) {
                    score += BOUNDARY_BONUS as f32;
                }
                if best_prev_col as usize == j - 1 {
                    score += CONSECUTIVE_BONUS as f32;
                }
                dp.set_back(i, j, best_prev_col);
                row_lo = row_lo.min(j);
                row_hi = row_hi.max(j);
                score
            } else {
                NONE32
            };
            dp.cur32[j] = cell;
        }
        if row_lo == usize::MAX {
            return None;
        }

        std::mem::swap(&mut dp.prev32, &mut dp.cur32);
        prev_lo = lo;
        prev_hi = hi;
        active_lo = row_lo.saturating_sub(BEAM_MARGIN);
        active_hi = (row_hi + BEAM_MARGIN).min(n - 1);
    }

    let mut best = NONE32;
    let mut end = 0usize;
    for j in prev_lo..=prev_hi {
        if dp.prev32[j] > best {
            best = dp.prev32[j];
            end = j;
        }
    }
    if !best.is_finite() {
        return None;
    }

    let mut score = best as f64;
    let trail = n - 1 - end;
    if trail > TRAILING_FREE {
        score -= GAP_PENALTY * TRAILING_PENALTY_SCALE * ((trail - TRAILING_FREE) / 10) as f64;
    }

    let positions = reconstruct(dp, m, end)?;
    Some((score, positions))
}

/// Walk the back-pointer grid from the chosen end column. A generation
/// mismatch means the beam never wrote the cell; the match fails rather
/// than fabricating positions.
fn reconstruct(dp: &pool::DpScratch, m: usize, end: usize) -> Option<Vec<u32>> {
    let mut positions = vec![0u32; m];
    let mut col = end as u32;
    for i in (0..m).rev() {
        positions[i] = col;
        let back = dp.back_at(i, col as usize)?;
        if i == 0 {
            if back != DP_START {
                return None;
            }
        } else {
            col = back;
        }
    }
    Some(positions)
}

// ---------------------------------------------------------------------------
// Post-scoring refinements (shared by both paths)
// ---------------------------------------------------------------------------

/// Segment-aware adjustments applied after the raw alignment score.
fn refine_score(mut score: f64, start: usize, end: usize, word_hits: usize, runes: &[char]) -> f64 {
    let crossings = runes[start..=end].iter().filter(|&&c| c == '/').count();
    score -= CROSS_SEGMENT_PENALTY * crossings as f64;

    match runes.iter().rposition(|&c| c == '/') {
        Some(ls) if start < ls => {
            score -= START_PENALTY_FACTOR * (ls - start) as f64;
        }
        Some(ls) if start > ls => {
            score += FINAL_SEGMENT_BONUS;
        }
        None => {
            // Bare file name: the whole target is the final segment.
            score += FINAL_SEGMENT_BONUS;
        }
        _ => {}
    }

    score + WORD_HIT_BONUS * word_hits as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
