//! Per-directory ignore matchers with inheritance and caching.
//!
//! The root matcher layers global sources (git core excludes, the user's
//! global ignore files, `.git/info/exclude`) under the root's own
//! `.gitignore` / `.ignore` / `.rdirignore`. Each subdirectory's matcher is
//! a clone of its parent extended with that directory's files, cached by
//! normalized relative key. Readers get `Arc`s; extension never mutates a
//! published matcher.

use dashmap::DashMap;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::gitignore::GitignoreMatcher;

/// Per-directory ignore files, lowest priority first.
const DIR_IGNORE_FILES: &[&str] = &[".gitignore", ".ignore", ".rdirignore"];

/// Concurrent cache of directory matchers keyed by root-relative directory
/// (`"."` for the root).
pub struct IgnoreProvider {
    root: PathBuf,
    cache: DashMap<String, Arc<GitignoreMatcher>>,
}

impl IgnoreProvider {
    /// Build a provider rooted at `root`, constructing and caching the root
    /// matcher immediately.
    pub fn new(root: &Path) -> Self {
        let provider = IgnoreProvider {
            root: root.to_path_buf(),
            cache: DashMap::new(),
        };
        let root_matcher = provider.build_root_matcher();
        provider
            .cache
            .insert(".".to_string(), Arc::new(root_matcher));
        provider
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The matcher governing entries of `rel_dir`, composing parents on
    /// demand and caching every level on the way down.
    pub fn matcher_for(&self, rel_dir: &str) -> Arc<GitignoreMatcher> {
        let key = normalize_key(rel_dir);
        if let Some(cached) = self.cache.get(key.as_ref()) {
            return cached.clone();
        }

        let parent = self.matcher_for(parent_key(&key));
        let mut matcher = (*parent).clone();
        let dir = self.root.join(key.as_ref());
        for name in DIR_IGNORE_FILES {
            matcher.add_file(&dir.join(name), &key);
        }
        let matcher = Arc::new(matcher);
        self.cache.insert(key.into_owned(), matcher.clone());
        matcher
    }

    /// Pre-populate the cache for a directory about to be walked.
    pub fn warm(&self, rel_dir: &str) {
        let _ = self.matcher_for(rel_dir);
    }

    /// Is the entry at `rel_path` ignored under its directory's rules?
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let dir = match rel_path.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => ".",
        };
        self.matcher_for(dir).is_ignored(rel_path, is_dir)
    }

    // -----------------------------------------------------------------------
    // Root matcher construction
    // -----------------------------------------------------------------------

    fn build_root_matcher(&self) -> GitignoreMatcher {
        let mut matcher = GitignoreMatcher::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut add_global = |matcher: &mut GitignoreMatcher, path: PathBuf| {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            if seen.insert(canonical) {
                matcher.add_file(&path, "");
            }
        };

        // Lowest priority: the excludes file named in the repo's git config.
        if let Some(excludes) = core_excludes_file(&self.root) {
            debug!(path = %excludes.display(), "using core.excludesfile");
            add_global(&mut matcher, excludes);
        }

        // User-global ignore files, deduped by canonical path.
        if let Some(home) = home_dir() {
            add_global(&mut matcher, home.join(".gitignore"));
            add_global(&mut matcher, home.join(".gitignore_global"));
            add_global(&mut matcher, home.join(".config/git/ignore"));
        }

        // Repo-local exclude file.
        matcher.add_file(&self.root.join(".git/info/exclude"), "");

        // Highest priority: the root's own ignore files.
        for name in DIR_IGNORE_FILES {
            matcher.add_file(&self.root.join(name), "");
        }
        matcher
    }
}

/// Normalize a relative directory to a cache key: `"."` for the root,
/// no leading/trailing slashes otherwise.
fn normalize_key(rel_dir: &str) -> std::borrow::Cow<'_, str> {
    let trimmed = rel_dir.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        std::borrow::Cow::Borrowed(".")
    } else if trimmed.len() == rel_dir.len() {
        std::borrow::Cow::Borrowed(trimmed)
    } else {
        std::borrow::Cow::Owned(trimmed.to_string())
    }
}

fn parent_key(key: &str) -> &str {
    match key.rsplit_once('/') {
        Some((parent, _)) => parent,
        None => ".",
    }
}

/// Resolve `[core] excludesfile = ...` from the repository's git config.
fn core_excludes_file(root: &Path) -> Option<PathBuf> {
    let config = std::fs::read_to_string(root.join(".git/config")).ok()?;
    let section_re = Regex::new(r"^\s*\[([^\]]+)\]").unwrap();
    let kv_re = Regex::new(r"^\s*excludesfile\s*=\s*(.+?)\s*$").unwrap();

    let mut in_core = false;
    for line in config.lines() {
        if let Some(caps) = section_re.captures(line) {
            in_core = caps[1].trim().eq_ignore_ascii_case("core");
            continue;
        }
        if in_core {
            if let Some(caps) = kv_re.captures(line) {
                return Some(expand_home(caps[1].trim()));
            }
        }
    }
    None
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn root_rules_apply_everywhere() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), ".gitignore", "*.log\n");
        fs::create_dir_all(tmp.path().join("sub")).unwrap();

        let provider = IgnoreProvider::new(tmp.path());
        assert!(provider.is_ignored("debug.log", false));
        assert!(provider.is_ignored("sub/debug.log", false));
        assert!(!provider.is_ignored("sub/notes.txt", false));
    }

    #[test]
    fn child_rules_extend_parent_rules() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), ".gitignore", "*.log\n");
        write(tmp.path(), "sub/.gitignore", "!keep.log\n*.tmp\n");

        let provider = IgnoreProvider::new(tmp.path());
        assert!(provider.is_ignored("sub/debug.log", false));
        assert!(!provider.is_ignored("sub/keep.log", false));
        assert!(provider.is_ignored("sub/x.tmp", false));
        // Sibling directories are unaffected by sub's rules.
        assert!(provider.is_ignored("keep.log", false));
        assert!(!provider.is_ignored("x.tmp", false));
    }

    #[test]
    fn rdirignore_outranks_gitignore() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), ".gitignore", "out/\n");
        write(tmp.path(), ".rdirignore", "!out/\n");

        let provider = IgnoreProvider::new(tmp.path());
        assert!(!provider.is_ignored("out", true));
    }

    #[test]
    fn git_info_exclude_is_layered_below_root_files() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), ".git/info/exclude", "secret.txt\n");
        let provider = IgnoreProvider::new(tmp.path());
        assert!(provider.is_ignored("secret.txt", false));

        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), ".git/info/exclude", "secret.txt\n");
        write(tmp.path(), ".gitignore", "!secret.txt\n");
        let provider = IgnoreProvider::new(tmp.path());
        assert!(!provider.is_ignored("secret.txt", false));
    }

    #[test]
    fn core_excludesfile_is_parsed_from_git_config() {
        let tmp = tempfile::tempdir().unwrap();
        let excludes = tmp.path().join("global-ignores");
        fs::write(&excludes, "*.bak\n").unwrap();
        write(
            tmp.path(),
            ".git/config",
            &format!(
                "[core]\n\texcludesfile = {}\n[remote \"origin\"]\n\turl = x\n",
                excludes.display()
            ),
        );

        let provider = IgnoreProvider::new(tmp.path());
        assert!(provider.is_ignored("old.bak", false));
    }

    #[test]
    fn matcher_cache_returns_shared_instances() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        let provider = IgnoreProvider::new(tmp.path());
        let first = provider.matcher_for("a/b");
        let second = provider.matcher_for("a/b/");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
