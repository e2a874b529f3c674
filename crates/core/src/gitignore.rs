//! Git-style ignore rules: line parsing, wildcard matching, and the
//! ordered matcher with last-match-wins semantics.
//!
//! Matchers are value types. A child directory starts from a clone of its
//! parent's pattern list and appends its own rules, so a matcher handed to
//! one thread is never mutated by another.

use std::path::Path;
use tracing::debug;

// ---------------------------------------------------------------------------
// Pattern parsing
// ---------------------------------------------------------------------------

/// One parsed ignore rule. `base` is the root-relative directory of the
/// file the rule came from (empty for root-level rules); the rule only
/// applies beneath it.
#[derive(Debug, Clone)]
pub struct GitignorePattern {
    /// Cleaned pattern body, escapes resolved, `!` / trailing `/` /
    /// leading `/` stripped.
    pattern: String,
    negation: bool,
    dir_only: bool,
    anchored: bool,
    has_slash: bool,
    /// Entire pattern is wildcard-free.
    literal: Option<String>,
    /// Pattern is `X*` with no other metacharacters.
    prefix: Option<String>,
    /// Pattern is `*X` with no other metacharacters.
    suffix: Option<String>,
    base: String,
}

impl GitignorePattern {
    /// Parse one line of an ignore file. Returns `None` for blanks and
    /// comments.
    pub fn parse(line: &str, base: &str) -> Option<GitignorePattern> {
        // Trailing spaces are trimmed unless escaped by an odd run of
        // backslashes, which protects exactly one space.
        let mut body = line.trim_end_matches(' ');
        let kept_space = line.len() > body.len()
            && body.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1;

        if body.is_empty() {
            return None;
        }
        if body.starts_with('#') {
            return None;
        }

        let mut negation = false;
        if let Some(rest) = body.strip_prefix('!') {
            negation = true;
            body = rest;
            if body.is_empty() {
                return None;
            }
        }

        // Resolve backslash escapes.
        let mut resolved = String::with_capacity(body.len() + 1);
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(next) => resolved.push(next),
                    None => resolved.push('\\'),
                }
            } else {
                resolved.push(c);
            }
        }
        if kept_space {
            // The odd backslash at the end escaped one trimmed space.
            if resolved.ends_with('\\') {
                resolved.pop();
            }
            resolved.push(' ');
        }

        let mut dir_only = false;
        if resolved.ends_with('/') {
            dir_only = true;
            resolved.pop();
        }
        let mut anchored = false;
        if let Some(rest) = resolved.strip_prefix('/') {
            anchored = true;
            resolved = rest.to_string();
        }
        if resolved.is_empty() {
            return None;
        }
        let has_slash = resolved.contains('/');

        let (literal, prefix, suffix) = specialize(&resolved);

        Some(GitignorePattern {
            pattern: resolved,
            negation,
            dir_only,
            anchored,
            has_slash,
            literal,
            prefix,
            suffix,
            base: base.trim_matches('/').to_string(),
        })
    }

    /// Does this rule match `rel_path` (root-relative, forward slashes)?
    fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }

        // Rules only see paths beneath their own directory.
        let target = if self.base.is_empty() {
            rel_path
        } else {
            match rel_path.strip_prefix(self.base.as_str()) {
                Some(rest) if rest.starts_with('/') => &rest[1..],
                _ => return false,
            }
        };
        if target.is_empty() {
            return false;
        }

        if self.anchored || self.has_slash {
            return self.matches_candidate(target);
        }

        // Unanchored, slash-free: the final component, the full relative
        // path, or any suffix split on '/'.
        if self.matches_candidate(target) {
            return true;
        }
        let mut rest = target;
        while let Some(pos) = rest.find('/') {
            rest = &rest[pos + 1..];
            if self.matches_candidate(rest) {
                return true;
            }
        }
        false
    }

    fn matches_candidate(&self, candidate: &str) -> bool {
        if let Some(lit) = &self.literal {
            return candidate == lit;
        }
        if let Some(prefix) = &self.prefix {
            return candidate.starts_with(prefix.as_str()) && !candidate[prefix.len()..].contains('/');
        }
        if let Some(suffix) = &self.suffix {
            return candidate.ends_with(suffix.as_str())
                && !candidate[..candidate.len() - suffix.len()].contains('/');
        }
        glob_match(&self.pattern, candidate)
    }
}

/// Precompute the literal / pure-prefix / pure-suffix forms when the
/// pattern has at most one `*` at an end and no other metacharacters.
fn specialize(pattern: &str) -> (Option<String>, Option<String>, Option<String>) {
    let meta_free = |s: &str| !s.contains(['*', '?', '[']);
    if meta_free(pattern) {
        return (Some(pattern.to_string()), None, None);
    }
    if let Some(stem) = pattern.strip_suffix('*') {
        if meta_free(stem) && !stem.is_empty() {
            return (None, Some(stem.to_string()), None);
        }
    }
    if let Some(stem) = pattern.strip_prefix('*') {
        if meta_free(stem) && !stem.is_empty() {
            return (None, None, Some(stem.to_string()));
        }
    }
    (None, None, None)
}

// ---------------------------------------------------------------------------
// Wildcard matching
// ---------------------------------------------------------------------------

/// Match a pattern against a slash-separated candidate. `**` crosses
/// segment boundaries; `*` and `?` never match `/`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat_segs: Vec<&str> = pattern.split('/').collect();
    let txt_segs: Vec<&str> = text.split('/').collect();
    match_segments(&pat_segs, &txt_segs)
}

fn match_segments(pat: &[&str], txt: &[&str]) -> bool {
    if pat.is_empty() {
        return txt.is_empty();
    }
    if pat[0] == "**" {
        // Zero or more whole segments.
        if match_segments(&pat[1..], txt) {
            return true;
        }
        return !txt.is_empty() && match_segments(pat, &txt[1..]);
    }
    if txt.is_empty() {
        return false;
    }
    let p: Vec<char> = pat[0].chars().collect();
    let t: Vec<char> = txt[0].chars().collect();
    match_chars(&p, &t) && match_segments(&pat[1..], &txt[1..])
}

fn match_chars(pat: &[char], txt: &[char]) -> bool {
    if pat.is_empty() {
        return txt.is_empty();
    }
    match pat[0] {
        '*' => {
            if match_chars(&pat[1..], txt) {
                return true;
            }
            !txt.is_empty() && match_chars(pat, &txt[1..])
        }
        '?' => !txt.is_empty() && match_chars(&pat[1..], &txt[1..]),
        '[' => {
            if txt.is_empty() {
                return false;
            }
            match match_class(&pat[1..], txt[0]) {
                Some((hit, rest)) => hit && match_chars(rest, &txt[1..]),
                // Unterminated class: fall back to a literal bracket.
                None => txt[0] == '[' && match_chars(&pat[1..], &txt[1..]),
            }
        }
        c => !txt.is_empty() && txt[0] == c && match_chars(&pat[1..], &txt[1..]),
    }
}

/// POSIX-style bracket class with `!` negation and `a-z` ranges. Returns
/// whether `c` is in the class plus the pattern remainder, or `None` when
/// the class never closes.
fn match_class(pat: &[char], c: char) -> Option<(bool, &[char])> {
    let mut i = 0;
    let mut negate = false;
    if pat.first() == Some(&'!') {
        negate = true;
        i = 1;
    }
    let mut matched = false;
    let mut first = true;
    loop {
        let &ch = pat.get(i)?;
        if ch == ']' && !first {
            i += 1;
            break;
        }
        first = false;
        if pat.get(i + 1) == Some(&'-') && pat.get(i + 2).is_some_and(|&e| e != ']') {
            let hi = *pat.get(i + 2)?;
            if (ch..=hi).contains(&c) {
                matched = true;
            }
            i += 3;
        } else {
            if ch == c {
                matched = true;
            }
            i += 1;
        }
    }
    Some((matched != negate, &pat[i..]))
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// An ordered list of ignore rules. The last matching rule wins; a winning
/// non-negation rule ignores the path.
#[derive(Debug, Clone, Default)]
pub struct GitignoreMatcher {
    patterns: Vec<GitignorePattern>,
}

impl GitignoreMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Append the rules of one ignore-file body, lowest priority first.
    pub fn add_content(&mut self, content: &str, base: &str) {
        for line in content.lines() {
            if let Some(pattern) = GitignorePattern::parse(line, base) {
                self.patterns.push(pattern);
            }
        }
    }

    /// Append rules from a file on disk; unreadable files add nothing.
    pub fn add_file(&mut self, path: &Path, base: &str) {
        match std::fs::read_to_string(path) {
            Ok(content) => self.add_content(&content, base),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => debug!(path = %path.display(), %err, "skipping unreadable ignore file"),
        }
    }

    /// Is `rel_path` (root-relative) ignored? Paths are normalized to
    /// forward slashes.
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let normalized;
        let rel_path = if rel_path.contains('\\') {
            normalized = rel_path.replace('\\', "/");
            normalized.as_str()
        } else {
            rel_path
        };

        let mut ignored = false;
        for pattern in &self.patterns {
            if pattern.matches(rel_path, is_dir) {
                ignored = !pattern.negation;
            }
        }
        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(content: &str) -> GitignoreMatcher {
        let mut m = GitignoreMatcher::new();
        m.add_content(content, "");
        m
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let m = matcher("\n   \n# comment\n");
        assert!(m.is_empty());
    }

    #[test]
    fn escaped_hash_is_a_pattern() {
        let m = matcher("\\#notes");
        assert!(m.is_ignored("#notes", false));
    }

    #[test]
    fn last_match_wins_with_negation() {
        let m = matcher("*.log\n!important.log");
        assert!(m.is_ignored("debug.log", false));
        assert!(!m.is_ignored("important.log", false));
        // Reversed order flips the outcome.
        let m = matcher("!important.log\n*.log");
        assert!(m.is_ignored("important.log", false));
    }

    #[test]
    fn directory_only_requires_a_directory() {
        let m = matcher("build/");
        assert!(m.is_ignored("build", true));
        assert!(!m.is_ignored("build", false));
        assert!(m.is_ignored("sub/build", true));
    }

    #[test]
    fn anchored_pattern_matches_root_only() {
        let m = matcher("/target");
        assert!(m.is_ignored("target", true));
        assert!(!m.is_ignored("sub/target", true));
    }

    #[test]
    fn unanchored_name_matches_any_depth() {
        let m = matcher("node_modules");
        assert!(m.is_ignored("node_modules", true));
        assert!(m.is_ignored("a/b/node_modules", true));
        assert!(!m.is_ignored("node_modules_backup", true));
    }

    #[test]
    fn slashed_pattern_is_root_relative() {
        let m = matcher("docs/api");
        assert!(m.is_ignored("docs/api", false));
        assert!(!m.is_ignored("sub/docs/api", false));
    }

    #[test]
    fn double_star_prefix_matches_any_depth() {
        let m = matcher("**/generated");
        assert!(m.is_ignored("generated", true));
        assert!(m.is_ignored("a/b/generated", true));
    }

    #[test]
    fn double_star_suffix_matches_subtree() {
        let m = matcher("vendor/**");
        assert!(m.is_ignored("vendor", true));
        assert!(m.is_ignored("vendor/a/b.txt", false));
        assert!(!m.is_ignored("not-vendor/a", false));
    }

    #[test]
    fn double_star_infix_collapses() {
        let m = matcher("a/**/b");
        assert!(m.is_ignored("a/b", false));
        assert!(m.is_ignored("a/x/b", false));
        assert!(m.is_ignored("a/x/y/b", false));
        assert!(!m.is_ignored("a/x", false));
    }

    #[test]
    fn single_star_does_not_cross_segments() {
        let m = matcher("src/*.rs");
        assert!(m.is_ignored("src/main.rs", false));
        assert!(!m.is_ignored("src/sub/main.rs", false));
    }

    #[test]
    fn question_mark_matches_one_rune() {
        let m = matcher("?.txt");
        assert!(m.is_ignored("a.txt", false));
        assert!(!m.is_ignored("ab.txt", false));
    }

    #[test]
    fn bracket_classes_with_ranges_and_negation() {
        let m = matcher("log[0-9].txt");
        assert!(m.is_ignored("log1.txt", false));
        assert!(!m.is_ignored("logx.txt", false));

        let m = matcher("log[!0-9].txt");
        assert!(m.is_ignored("logx.txt", false));
        assert!(!m.is_ignored("log1.txt", false));
    }

    #[test]
    fn unterminated_class_degrades_to_literal() {
        let m = matcher("weird[name");
        assert!(m.is_ignored("weird[name", false));
        assert!(!m.is_ignored("weirdx", false));
    }

    #[test]
    fn escaped_bang_and_trailing_space() {
        let m = matcher("\\!literal");
        assert!(m.is_ignored("!literal", false));

        let m = matcher("name\\ ");
        assert!(m.is_ignored("name ", false));
        assert!(!m.is_ignored("name", false));

        let m = matcher("name   ");
        assert!(m.is_ignored("name", false));
    }

    #[test]
    fn base_directory_scopes_rules() {
        let mut m = GitignoreMatcher::new();
        m.add_content("*.tmp", "sub/dir");
        assert!(m.is_ignored("sub/dir/a.tmp", false));
        assert!(m.is_ignored("sub/dir/deeper/a.tmp", false));
        assert!(!m.is_ignored("a.tmp", false));
        assert!(!m.is_ignored("other/a.tmp", false));
    }

    #[test]
    fn clone_on_extend_leaves_parent_untouched() {
        let mut parent = GitignoreMatcher::new();
        parent.add_content("*.log", "");
        let mut child = parent.clone();
        child.add_content("!keep.log", "sub");

        assert!(parent.is_ignored("sub/keep.log", false));
        assert!(!child.is_ignored("sub/keep.log", false));
        assert_eq!(parent.len(), 1);
        assert_eq!(child.len(), 2);
    }

    #[test]
    fn prefix_and_suffix_specializations_match() {
        let m = matcher("cache-*");
        assert!(m.is_ignored("cache-v1", false));
        assert!(m.is_ignored("a/cache-v2", false));
        assert!(!m.is_ignored("cache", false));

        let m = matcher("*.swp");
        assert!(m.is_ignored(".file.swp", false));
        assert!(!m.is_ignored("swp", false));
    }

    #[test]
    fn backslash_paths_are_normalized() {
        let m = matcher("src/*.rs");
        assert!(m.is_ignored("src\\main.rs", false));
    }
}
