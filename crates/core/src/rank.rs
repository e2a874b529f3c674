//! Segment-aware rank boost layered on top of the matcher score.
//!
//! The matcher only sees a flat rune sequence; this pass rewards tokens
//! that line up with the path's structure: an entire segment, the base
//! name, a segment prefix. Matches that smear across segment boundaries
//! are penalized instead.

use crate::fuzzy::MatchDetails;

/// How well a token lines up with some path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegmentRank {
    None,
    Substring,
    Prefix,
    ExactBase,
    Exact,
}

const EXACT_BOOST: f64 = 2.6;
const EXACT_BASE_BOOST: f64 = 2.1;
const PREFIX_BOOST: f64 = 1.25;
const SUBSTRING_BOOST: f64 = 0.2;
const FINAL_SEGMENT_BOOST: f64 = 0.85;
const DEPTH_PENALTY: f64 = 0.22;
const CROSS_SEGMENT_PENALTY: f64 = 0.45;
/// Flat penalty when nothing lines up and the match crosses segments.
const CROSS_ONLY_PENALTY: f64 = -0.25;

impl SegmentRank {
    fn boost(self) -> f64 {
        match self {
            SegmentRank::Exact => EXACT_BOOST,
            SegmentRank::ExactBase => EXACT_BASE_BOOST,
            SegmentRank::Prefix => PREFIX_BOOST,
            SegmentRank::Substring => SUBSTRING_BOOST,
            SegmentRank::None => 0.0,
        }
    }

    /// Classify one segment against the token.
    fn of(segment: &str, token: &str) -> SegmentRank {
        if segment == token {
            return SegmentRank::Exact;
        }
        if let Some((stem, _ext)) = segment.rsplit_once('.') {
            if !stem.is_empty() && stem == token {
                return SegmentRank::ExactBase;
            }
        }
        if segment.starts_with(token) {
            return SegmentRank::Prefix;
        }
        if segment.contains(token) {
            return SegmentRank::Substring;
        }
        SegmentRank::None
    }
}

/// Boost for one token over one path. `token` and `rel_path` must share a
/// case view (both folded, or both raw for case-sensitive queries);
/// `details` is that token's match in the full path.
pub fn segment_boost(token: &str, rel_path: &str, details: &MatchDetails) -> f64 {
    if token.is_empty() || rel_path.is_empty() {
        return 0.0;
    }

    let crosses = span_crosses_segment(rel_path, details);

    let segments: Vec<&str> = rel_path.split('/').collect();
    let mut best = SegmentRank::None;
    let mut best_depth = 0usize;
    for (depth, segment) in segments.iter().enumerate() {
        let rank = SegmentRank::of(segment, token);
        // Deeper wins ties so the depth penalty reflects the best placement.
        if rank > best || (rank == best && rank != SegmentRank::None) {
            best = rank;
            best_depth = depth;
        }
    }

    if best == SegmentRank::None {
        if crosses {
            return CROSS_ONLY_PENALTY;
        }
        return 0.0;
    }

    let mut boost = best.boost();
    if best_depth == segments.len() - 1 {
        boost += FINAL_SEGMENT_BOOST;
    }
    boost -= DEPTH_PENALTY * (segments.len() - 1 - best_depth) as f64;
    if crosses {
        boost -= CROSS_SEGMENT_PENALTY;
    }
    boost.max(0.0)
}

/// Does the matched interval contain a `/`?
fn span_crosses_segment(rel_path: &str, details: &MatchDetails) -> bool {
    if details.start < 0 || details.end < details.start {
        return false;
    }
    let (start, end) = (details.start as usize, details.end as usize);
    rel_path
        .chars()
        .enumerate()
        .take(end + 1)
        .skip(start)
        .any(|(_, c)| c == '/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(start: i32, end: i32) -> MatchDetails {
        MatchDetails {
            start,
            end,
            ..MatchDetails::default()
        }
    }

    #[test]
    fn exact_segment_outranks_substring() {
        let exact = segment_boost("orion", "workspace/apps/orion/readme.md", &details(15, 19));
        let sub = segment_boost(
            "orion",
            "third_party/docs/readme-with-orion-reference.txt",
            &details(29, 33),
        );
        assert!(exact > sub, "{exact} vs {sub}");
    }

    #[test]
    fn exact_base_name_applies_without_extension() {
        let boost = segment_boost("main", "src/main.rs", &details(4, 7));
        // ExactBase + final segment - no depth penalty.
        assert!((boost - (EXACT_BASE_BOOST + FINAL_SEGMENT_BOOST)).abs() < 1e-9);
    }

    #[test]
    fn hidden_file_stem_is_not_empty_base() {
        // ".gitignore" splits to an empty stem; it must not rank ExactBase
        // for an empty-ish token and ranks Exact only on full equality.
        assert_eq!(SegmentRank::of(".gitignore", "gitignore"), SegmentRank::Substring);
        assert_eq!(SegmentRank::of(".gitignore", ".gitignore"), SegmentRank::Exact);
    }

    #[test]
    fn final_segment_bonus_requires_last_position() {
        let last = segment_boost("api", "docs/api", &details(5, 7));
        let middle = segment_boost("api", "api/docs/x", &details(0, 2));
        assert!(last > middle, "{last} vs {middle}");
    }

    #[test]
    fn depth_penalty_grows_toward_the_root() {
        let shallow = segment_boost("core", "core/a/b/c/file.txt", &details(0, 3));
        let deep = segment_boost("core", "a/b/c/core/file.txt", &details(6, 9));
        assert!(deep > shallow, "{deep} vs {shallow}");
    }

    #[test]
    fn cross_segment_span_is_penalized() {
        let contained = segment_boost("ab", "xx/ab.txt", &details(3, 4));
        let crossing = segment_boost("ab", "xa/b/ab.txt", &details(1, 3));
        assert!(contained > crossing, "{contained} vs {crossing}");
    }

    #[test]
    fn no_segment_hit_with_crossing_span_returns_flat_penalty() {
        // "xz" matches x|z across the slash but no single segment.
        let boost = segment_boost("xz", "ax/zb.txt", &details(1, 3));
        assert_eq!(boost, CROSS_ONLY_PENALTY);
    }

    #[test]
    fn boost_is_floored_at_zero() {
        // Prefix rank at the root of a deep tree: 1.25 - 0.22 * 6 < 0.
        let boost = segment_boost("or", "order/a/b/c/d/e/file.txt", &details(0, 1));
        assert_eq!(boost, 0.0);
    }
}
