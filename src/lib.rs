//! Coverlay: per-line test coverage ingestion and query engine
//!
//! This library watches a project's `.coverlay/state` directory for coverage
//! snapshot files produced by an external test runner, parses and merges them
//! into an immutable in-memory collection, and answers per-line queries of
//! the form "which tests cover this line, and did they pass" with cached,
//! low-latency lookups and correct invalidation on state changes.
//!
//! It is a read-side indexer: it never runs tests, never computes coverage,
//! and persists nothing.
//!
//! # Pipeline
//!
//! filesystem change → debounced reload → atomic snapshot publish → cache
//! invalidation → next query rebuilds the per-file line index.
//!
//! # Example
//!
//! ```ignore
//! use coverlay::CoverageEngine;
//! use std::path::Path;
//!
//! let engine = CoverageEngine::new();
//! engine.attach(Path::new("/path/to/project"))?;
//!
//! // line number -> tests covering that line
//! let coverage = engine.query("src/calculator.cs", &[5, 6, 7]);
//! for (line, tests) in &coverage {
//!     for test in tests {
//!         println!("{line}: {} ({})", test.name, if test.failed() { "FAIL" } else { "pass" });
//!     }
//! }
//! ```

pub mod cli;
pub mod error;
pub mod index;
pub mod paths;
pub mod query;
pub mod snapshot;
pub mod store;

// Re-export commonly used types
pub use error::{CoverlayError, Result};
pub use index::{build_file_index, CoveredTest, FileIndex};
pub use paths::{
    normalize_separators, normalize_source_path, CoverageRoot, MARKER_DIR_NAME, STATE_DIR_NAME,
};
pub use query::{CoverageEngine, EditorContext, QueryCache};
pub use snapshot::{parse_snapshot, FileCoverage, Snapshot, TestFailure, TestResult};
pub use store::{StateStore, DEBOUNCE_WINDOW};
