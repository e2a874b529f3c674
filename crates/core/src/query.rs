//! Query planning: tokenization, smart-case folding, and selectivity
//! ordering.

use crate::bitset::RuneBitset;
use crate::fuzzy::{fold_rune, smart_case_sensitive};

/// One whitespace-delimited query token with its precomputed views.
#[derive(Debug, Clone)]
pub struct QueryToken {
    /// The token as typed.
    pub raw: String,
    /// Full lowercase fold of `raw`.
    pub folded: String,
    /// Effective pattern: `folded` unless the query is case-sensitive.
    pub pattern: String,
    /// Decoded code points of `pattern`.
    pub pattern_runes: Vec<char>,
    /// Indexable runes of the folded form, for the index pre-filter.
    pub bitset: RuneBitset,
}

impl QueryToken {
    fn new(raw: &str, case_sensitive: bool) -> QueryToken {
        let folded: String = raw.chars().map(fold_rune).collect();
        let pattern = if case_sensitive {
            raw.to_string()
        } else {
            folded.clone()
        };
        let pattern_runes: Vec<char> = pattern.chars().collect();
        let bitset = RuneBitset::from_lower(&folded);
        QueryToken {
            raw: raw.to_string(),
            folded,
            pattern,
            pattern_runes,
            bitset,
        }
    }

    /// Empty-query-equivalent: nothing to match.
    pub fn is_empty(&self) -> bool {
        self.pattern_runes.is_empty()
    }
}

/// A planned query: ordered tokens plus the derived case mode. An empty
/// token list is the "match everything" signal.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    pub tokens: Vec<QueryToken>,
    pub case_sensitive: bool,
}

impl QueryPlan {
    pub fn is_match_all(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Union of all token bitsets; a candidate entry must contain it.
    pub fn combined_bitset(&self) -> RuneBitset {
        self.tokens
            .iter()
            .fold(RuneBitset::EMPTY, |acc, t| acc.union(&t.bitset))
    }
}

/// Tokenize a query. Case mode is smart case on the raw query unless
/// overridden. Tokens are ordered longest first so the most selective one
/// is evaluated first.
pub fn prepare_query_tokens(query: &str, case_override: Option<bool>) -> QueryPlan {
    let case_sensitive = case_override.unwrap_or_else(|| smart_case_sensitive(query));
    let mut tokens: Vec<QueryToken> = query
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| QueryToken::new(t, case_sensitive))
        .collect();
    tokens.sort_by(|a, b| b.pattern_runes.len().cmp(&a.pattern_runes.len()));
    QueryPlan {
        tokens,
        case_sensitive,
    }
}

/// Re-order tokens for an index query: ascending by the size of each
/// token's rarest rune bucket, fingerprint of the full distribution as the
/// tie-break. Tokens whose runes all miss the index sort last.
pub fn order_by_selectivity(tokens: &mut [QueryToken], bucket_len: impl Fn(u8) -> usize) {
    let key = |token: &QueryToken| -> (usize, u64) {
        let mut min = usize::MAX;
        let mut fingerprint = 0u64;
        for bit in token.bitset.bits() {
            let len = bucket_len(bit);
            min = min.min(len);
            fingerprint = fingerprint.rotate_left(7) ^ len as u64;
        }
        (min, fingerprint)
    };
    tokens.sort_by_key(key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_splitting_discards_empties() {
        let plan = prepare_query_tokens("  foo \t bar\u{3000}baz  ", None);
        let raws: Vec<&str> = plan.tokens.iter().map(|t| t.raw.as_str()).collect();
        assert_eq!(raws, ["foo", "bar", "baz"]);
    }

    #[test]
    fn empty_and_whitespace_queries_are_match_all() {
        assert!(prepare_query_tokens("", None).is_match_all());
        assert!(prepare_query_tokens("   \t ", None).is_match_all());
    }

    #[test]
    fn smart_case_tracks_uppercase_anywhere() {
        assert!(!prepare_query_tokens("foo bar", None).case_sensitive);
        assert!(prepare_query_tokens("foo Bar", None).case_sensitive);
        // Override wins over smart case.
        assert!(prepare_query_tokens("foo", Some(true)).case_sensitive);
    }

    #[test]
    fn patterns_fold_only_when_insensitive() {
        let plan = prepare_query_tokens("ReadMe", None);
        assert_eq!(plan.tokens[0].pattern, "ReadMe");
        assert_eq!(plan.tokens[0].folded, "readme");

        let plan = prepare_query_tokens("readme", None);
        assert_eq!(plan.tokens[0].pattern, "readme");
    }

    #[test]
    fn tokens_order_longest_first() {
        let plan = prepare_query_tokens("ab longest mid", None);
        let raws: Vec<&str> = plan.tokens.iter().map(|t| t.raw.as_str()).collect();
        assert_eq!(raws, ["longest", "mid", "ab"]);
    }

    #[test]
    fn replanning_joined_tokens_is_stable() {
        let plan = prepare_query_tokens("foo bar", None);
        let joined = plan
            .tokens
            .iter()
            .map(|t| t.raw.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let replanned = prepare_query_tokens(&joined, None);
        let a: Vec<&str> = plan.tokens.iter().map(|t| t.raw.as_str()).collect();
        let b: Vec<&str> = replanned.tokens.iter().map(|t| t.raw.as_str()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn selectivity_prefers_rare_runes() {
        let mut tokens = prepare_query_tokens("aa zz", None).tokens;
        // 'a' bucket is huge, 'z' bucket tiny: zz must come first.
        let sizes = |bit: u8| -> usize {
            if bit == crate::bitset::rune_bit('z').unwrap() {
                3
            } else {
                10_000
            }
        };
        order_by_selectivity(&mut tokens, sizes);
        assert_eq!(tokens[0].raw, "zz");
    }

    #[test]
    fn combined_bitset_is_union_of_tokens() {
        let plan = prepare_query_tokens("ab 12", None);
        let combined = plan.combined_bitset();
        for c in ['a', 'b', '1', '2'] {
            assert!(combined.has(crate::bitset::rune_bit(c).unwrap()));
        }
    }
}
