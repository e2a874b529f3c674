//! Core value types shared across the walker, index and search engine.

use serde::Serialize;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use crate::bitset::RuneBitset;

// ---------------------------------------------------------------------------
// Filesystem entries
// ---------------------------------------------------------------------------

/// A single filesystem item as enumerated by the walker. Immutable after
/// creation.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    /// Absolute path.
    pub path: PathBuf,
    /// Final path component.
    pub name: String,
    /// Absolute directory containing the entry.
    pub dir: PathBuf,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch, 0 when
    /// unavailable.
    pub mtime_ns: u64,
    /// Platform file-mode bits (0 off Unix).
    pub mode: u32,
}

impl Entry {
    /// Build an entry from a path and its (symlink-aware) metadata.
    pub fn from_metadata(path: &Path, meta: &Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::MetadataExt;
            meta.mode()
        };
        #[cfg(not(unix))]
        let mode = 0;

        Entry {
            path: path.to_path_buf(),
            name,
            dir,
            is_dir: meta.is_dir(),
            is_symlink: meta.file_type().is_symlink(),
            size: meta.len(),
            mtime_ns,
            mode,
        }
    }
}

/// An entry as stored in the background index: the walker's record plus the
/// precomputed data queries need. Written only by the index aggregator
/// during a build, read by many query threads once the index is ready.
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub entry: Entry,
    /// Root-relative path, forward slashes, lowercased.
    pub rel_lower: String,
    /// Root-relative path, forward slashes, original case.
    pub rel_path: String,
    /// Presence set of indexable runes in `rel_lower`.
    pub bitset: RuneBitset,
    /// Monotonic insertion counter, strictly increasing per build.
    pub order: u64,
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// One ranked hit of a global search, aggregated over all query tokens.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalSearchResult {
    /// Absolute path.
    pub path: String,
    pub name: String,
    pub directory: String,
    pub score: f64,
    /// Root-relative path length in runes.
    pub path_len: usize,
    /// Rune index of the earliest matched position across tokens, -1 when
    /// the query was empty.
    pub match_start: i32,
    /// Rune index of the latest matched position across tokens.
    pub match_end: i32,
    /// Matched code points summed over tokens.
    pub match_count: usize,
    /// Strong-word-boundary hits summed over tokens.
    pub word_hits: usize,
    /// Slash-delimited components in the relative path.
    pub segments: usize,
    /// Input-order counter; ties sort by it for stable output.
    pub order: u64,
    /// False only for the empty-query "list everything" case.
    pub has_match: bool,
    /// Merged highlight spans, present per the span-mode policy.
    pub spans: Option<Vec<crate::fuzzy::MatchSpan>>,
    pub entry: Entry,
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Normalize a root-relative path to forward slashes, best-effort on
/// non-UTF-8 names.
pub fn rel_path_string(root: &Path, abs: &Path) -> String {
    let rel = abs.strip_prefix(root).unwrap_or(abs);
    let s = rel.to_string_lossy();
    if s.contains('\\') {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

/// Number of slash-delimited components in a relative path.
pub fn segment_count(rel_path: &str) -> usize {
    if rel_path.is_empty() {
        return 0;
    }
    rel_path.split('/').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_path_is_forward_slashed() {
        let root = Path::new("/repo");
        let abs = Path::new("/repo/src/main.rs");
        assert_eq!(rel_path_string(root, abs), "src/main.rs");
    }

    #[test]
    fn segment_count_counts_components() {
        assert_eq!(segment_count(""), 0);
        assert_eq!(segment_count("main.rs"), 1);
        assert_eq!(segment_count("src/pkg/main.rs"), 3);
    }
}
