//! Breadth-first filesystem traversal with ignore rules and cooperative
//! cancellation.
//!
//! The walker feeds the non-indexed search path; the index builder reuses
//! its per-directory enumeration so both apply identical skip rules.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::gitignore::GitignoreMatcher;
use crate::ignore_provider::IgnoreProvider;
use crate::types::Entry;

/// Injected platform hidden/system predicate. Returns true when the entry
/// should be skipped. Platform-specific probes live outside the core.
pub type HiddenProbe = Arc<dyn Fn(&Path, &fs::Metadata) -> bool + Send + Sync>;

/// Enumerate one directory, applying the skip rules: `.git` is never
/// descended, the hidden probe runs on every entry, and the directory's
/// matcher filters the rest. Entries come back name-sorted for
/// deterministic ordering, directories and files alike.
pub(crate) fn scan_dir(
    abs_dir: &Path,
    rel_dir: &str,
    matcher: &GitignoreMatcher,
    hidden_probe: Option<&HiddenProbe>,
) -> Vec<(Entry, String)> {
    let read = match fs::read_dir(abs_dir) {
        Ok(read) => read,
        Err(err) => {
            debug!(dir = %abs_dir.display(), %err, "skipping unreadable directory");
            return Vec::new();
        }
    };

    let mut out: Vec<(Entry, String)> = Vec::new();
    for dir_entry in read {
        let dir_entry = match dir_entry {
            Ok(e) => e,
            Err(err) => {
                debug!(dir = %abs_dir.display(), %err, "skipping unreadable entry");
                continue;
            }
        };
        let path = dir_entry.path();
        let meta = match dir_entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                debug!(path = %path.display(), %err, "stat failed");
                continue;
            }
        };

        let entry = Entry::from_metadata(&path, &meta);
        if entry.is_dir && entry.name == ".git" {
            continue;
        }
        if let Some(probe) = hidden_probe {
            if probe(&path, &meta) {
                continue;
            }
        }

        let rel_path = if rel_dir.is_empty() || rel_dir == "." {
            entry.name.clone()
        } else {
            format!("{rel_dir}/{}", entry.name)
        };
        if matcher.is_ignored(&rel_path, entry.is_dir) {
            continue;
        }
        out.push((entry, rel_path));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    out
}

/// Walk the tree under `root` breadth-first, invoking `visit` for every
/// surviving file with its entry and forward-slashed relative path.
/// Returns the number of files visited. The token is checked before each
/// directory and each entry handoff.
pub fn walk(
    root: &Path,
    provider: &IgnoreProvider,
    hidden_probe: Option<&HiddenProbe>,
    cancel: &CancelToken,
    visit: &mut dyn FnMut(Entry, &str),
) -> usize {
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(String::new());
    let mut seen_files = 0usize;

    while let Some(rel_dir) = queue.pop_front() {
        if cancel.is_cancelled() {
            break;
        }
        let abs_dir = if rel_dir.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&rel_dir)
        };
        let matcher = provider.matcher_for(if rel_dir.is_empty() { "." } else { &rel_dir });

        for (entry, rel_path) in scan_dir(&abs_dir, &rel_dir, &matcher, hidden_probe) {
            if cancel.is_cancelled() {
                return seen_files;
            }
            if entry.is_dir {
                // Warm the provider cache before the child is dequeued.
                provider.warm(&rel_path);
                queue.push_back(rel_path);
            } else {
                seen_files += 1;
                visit(entry, &rel_path);
            }
        }
    }
    seen_files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn collect(root: &Path) -> Vec<String> {
        let provider = IgnoreProvider::new(root);
        let cancel = CancelToken::new();
        let mut seen = Vec::new();
        walk(root, &provider, None, &cancel, &mut |_, rel| {
            seen.push(rel.to_string())
        });
        seen
    }

    #[test]
    fn walks_breadth_first_and_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "b.txt");
        touch(tmp.path(), "a/deep.txt");
        touch(tmp.path(), "a.txt");
        assert_eq!(collect(tmp.path()), ["a.txt", "b.txt", "a/deep.txt"]);
    }

    #[test]
    fn git_directory_is_never_entered() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), ".git/objects/abc");
        touch(tmp.path(), "src/lib.rs");
        assert_eq!(collect(tmp.path()), ["src/lib.rs"]);
    }

    #[test]
    fn ignored_directories_are_not_descended() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".gitignore"), "target/\n*.log\n").unwrap();
        touch(tmp.path(), "target/debug/app");
        touch(tmp.path(), "src/main.rs");
        touch(tmp.path(), "src/build.log");
        assert_eq!(collect(tmp.path()), [".gitignore", "src/main.rs"]);
    }

    #[test]
    fn hidden_probe_filters_entries() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), ".hidden.txt");
        touch(tmp.path(), "visible.txt");

        let provider = IgnoreProvider::new(tmp.path());
        let cancel = CancelToken::new();
        let probe: HiddenProbe = Arc::new(|path: &Path, _meta: &fs::Metadata| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
        });
        let mut seen = Vec::new();
        walk(tmp.path(), &provider, Some(&probe), &cancel, &mut |_, rel| {
            seen.push(rel.to_string())
        });
        assert_eq!(seen, ["visible.txt"]);
    }

    #[test]
    fn cancellation_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..16 {
            touch(tmp.path(), &format!("f{i:02}.txt"));
        }
        let provider = IgnoreProvider::new(tmp.path());
        let cancel = CancelToken::new();
        let mut seen = 0usize;
        walk(tmp.path(), &provider, None, &cancel, &mut |_, _| {
            seen += 1;
            if seen == 3 {
                cancel.cancel();
            }
        });
        assert_eq!(seen, 3);
    }

    #[test]
    fn subdirectory_rules_apply_during_the_walk() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/.gitignore"), "*.tmp\n").unwrap();
        touch(tmp.path(), "sub/keep.rs");
        touch(tmp.path(), "sub/drop.tmp");
        touch(tmp.path(), "root.tmp");
        assert_eq!(collect(tmp.path()), ["root.tmp", "sub/.gitignore", "sub/keep.rs"]);
    }
}
