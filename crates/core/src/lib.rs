//! Search and indexing core for the rdir terminal file browser.
//!
//! Three tightly coupled subsystems: the fuzzy matcher ([`fuzzy`]), the
//! global search engine ([`search`]), and the parallel file index
//! ([`index`]). The matcher scores a pattern against a path the way
//! editor go-to-file pickers do; the engine plans multi-token queries,
//! ranks candidates and streams partial results; the index is built in
//! the background by a worker pool so later queries skip the walk.
//!
//! The terminal UI, key handling and CLI live elsewhere; this crate only
//! takes a root directory and query strings and hands back ranked
//! results.

pub mod accumulator;
pub mod bitset;
pub mod boundary;
pub mod cancel;
pub mod collector;
pub mod config;
pub mod fuzzy;
pub mod gitignore;
pub mod ignore_provider;
pub mod index;
pub mod pool;
pub mod progress;
pub mod query;
pub mod rank;
pub mod search;
pub mod types;
pub mod walker;

pub use accumulator::AsyncCallback;
pub use cancel::CancelToken;
pub use config::{Config, SpanMode};
pub use fuzzy::{FuzzyMatch, FuzzyMatcher, MatchDetails, MatchSpan};
pub use gitignore::GitignoreMatcher;
pub use ignore_provider::IgnoreProvider;
pub use index::IndexTelemetry;
pub use search::Searcher;
pub use types::{Entry, GlobalSearchResult};
pub use walker::HiddenProbe;
