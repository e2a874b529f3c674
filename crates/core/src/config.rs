//! Environment-driven configuration, read once at startup into an
//! immutable struct. Components never consult `std::env` directly.

use std::collections::HashMap;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Defaults and clamps
// ---------------------------------------------------------------------------

const DEFAULT_INDEX_MAX_RESULTS: usize = 1_000_000;
const MIN_INDEX_MAX_RESULTS: usize = 10_000;
const MIN_INDEX_WORKERS: usize = 2;
const MAX_INDEX_WORKERS: usize = 8;

/// Span computation policy for index queries. The conservative default is
/// `None`; callers that render highlights opt in via
/// `RDIR_INDEX_LAZY_SPANS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanMode {
    #[default]
    None,
    Positions,
    Full,
}

impl SpanMode {
    fn parse(s: &str) -> SpanMode {
        match s.trim().to_ascii_lowercase().as_str() {
            "positions" => SpanMode::Positions,
            "full" => SpanMode::Full,
            _ => SpanMode::None,
        }
    }
}

/// Dynamic-programming implementation selected at startup. Scalar f64 is
/// authoritative; the ASCII f32 variant is experimental and opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DpKind {
    #[default]
    Scalar,
    Ascii32,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Background index disabled entirely; every search walks.
    pub disable_index: bool,
    /// Minimum files a walk must see before an index build is kicked off.
    pub index_threshold: usize,
    /// Hard cap on indexed entries, clamped to at least 10_000.
    pub index_max_results: usize,
    /// Worker pool size for the index build.
    pub index_workers: usize,
    pub debug_fuzzy: bool,
    pub debug_progress: bool,
    pub dp_kind: DpKind,
    pub span_mode: SpanMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            disable_index: false,
            index_threshold: 0,
            index_max_results: DEFAULT_INDEX_MAX_RESULTS,
            index_workers: default_workers(),
            debug_fuzzy: false,
            debug_progress: false,
            dp_kind: DpKind::Scalar,
            span_mode: SpanMode::None,
        }
    }
}

/// `clamp(cpus - 1, 2, 8)`; rayon's pool size stands in for the cpu count.
fn default_workers() -> usize {
    rayon::current_num_threads()
        .saturating_sub(1)
        .clamp(MIN_INDEX_WORKERS, MAX_INDEX_WORKERS)
}

fn flag_set(v: Option<&str>) -> bool {
    matches!(v.map(str::trim), Some("1") | Some("true"))
}

impl Config {
    /// Read the `RDIR_*` environment once. Call sites share the result via
    /// [`Config::global`].
    pub fn from_env() -> Config {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("RDIR_"))
            .collect();
        Config::from_vars(&vars)
    }

    /// Build from an explicit snapshot. Tests use this instead of mutating
    /// the process environment.
    pub fn from_vars(vars: &HashMap<String, String>) -> Config {
        let get = |k: &str| vars.get(k).map(String::as_str);

        let index_max_results = get("RDIR_INDEX_MAX_RESULTS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_INDEX_MAX_RESULTS)
            .max(MIN_INDEX_MAX_RESULTS);

        let index_workers = get("RDIR_INDEX_MAX_WORKERS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&w| w > 0)
            .unwrap_or_else(default_workers);

        // Capability dispatch: the experimental path only wins when asked
        // for and not force-disabled.
        let dp_kind = if flag_set(get("RDIR_EXPERIMENTAL_ASCII_DP32"))
            && !flag_set(get("RDIR_DISABLE_SIMD_DP"))
        {
            DpKind::Ascii32
        } else {
            DpKind::Scalar
        };

        Config {
            disable_index: flag_set(get("RDIR_DISABLE_INDEX")),
            index_threshold: get("RDIR_INDEX_THRESHOLD")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0),
            index_max_results,
            index_workers,
            debug_fuzzy: flag_set(get("RDIR_DEBUG_FUZZY")),
            debug_progress: flag_set(get("RDIR_DEBUG_PROGRESS")),
            dp_kind,
            span_mode: get("RDIR_INDEX_LAZY_SPANS")
                .map(SpanMode::parse)
                .unwrap_or_default(),
        }
    }

    /// Process-wide configuration, initialized from the environment on
    /// first use.
    pub fn global() -> &'static Config {
        static CONFIG: OnceLock<Config> = OnceLock::new();
        CONFIG.get_or_init(Config::from_env)
    }
}
