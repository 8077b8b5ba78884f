//! Coverage snapshot model and parser
//!
//! A snapshot is the parsed contents of one coverage-state file written by an
//! external test runner into the watched `state` directory. Snapshots are
//! immutable once parsed; a reload replaces the whole collection rather than
//! patching individual records.
//!
//! The wire format is JSON with camelCase field names, but producers written
//! against older serializer defaults emit PascalCase, so every field carries
//! a PascalCase alias.

use serde::{Deserialize, Serialize};

use crate::error::{CoverlayError, Result};

/// One fully-parsed coverage-state file.
///
/// Multiple snapshots coexist (typically one per test project); the merged
/// view is the union across all currently-loaded snapshots. Tests are never
/// deduplicated across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Tests recorded by this run, in producer order
    #[serde(alias = "Tests")]
    pub tests: Vec<TestResult>,
}

impl Snapshot {
    /// Number of tests in this snapshot
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Number of tests whose most recent run failed
    pub fn failed_count(&self) -> usize {
        self.tests.iter().filter(|t| t.failed()).count()
    }
}

/// One test's most recent run, identified by its fully-qualified name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Fully-qualified test name, unique within one snapshot
    #[serde(alias = "Name")]
    pub name: String,

    /// Elapsed duration in milliseconds
    #[serde(alias = "Duration")]
    pub duration: u64,

    /// Present when the most recent run failed; absent means passed
    #[serde(alias = "Failure", default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TestFailure>,

    /// Per-file line hits recorded during this test's execution
    #[serde(alias = "FileCoverage")]
    pub file_coverage: Vec<FileCoverage>,
}

impl TestResult {
    /// Whether the most recent run of this test failed
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Whether the most recent run of this test passed
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Lines one test executed in one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCoverage {
    /// Source path, forward-slash separated, relative to the coverage root
    #[serde(alias = "Path")]
    pub path: String,

    /// 1-based line numbers the owning test executed in this file
    #[serde(alias = "LineCoverage")]
    pub line_coverage: Vec<u32>,
}

/// Failure details attached to a test; never mutated after parse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFailure {
    /// Failure message from the test runner
    #[serde(alias = "Message")]
    pub message: String,

    /// Stack trace, one frame per entry
    #[serde(alias = "StackTrace", default)]
    pub stack_trace: Vec<String>,

    /// Captured standard output, one line per entry
    #[serde(alias = "Stdout", default)]
    pub stdout: Vec<String>,
}

impl TestFailure {
    /// Stack trace joined with newlines, for display
    pub fn stack_trace_joined(&self) -> String {
        self.stack_trace.join("\n")
    }

    /// Captured stdout joined with newlines, for display
    pub fn stdout_joined(&self) -> String {
        self.stdout.join("\n")
    }
}

/// Parse one coverage-state file into a validated snapshot.
///
/// Pure function over the byte payload. Returns `Malformed` when the payload
/// is not structurally valid JSON for the snapshot shape, or when any
/// recorded line number is 0 (line numbers are 1-based; serde already rejects
/// negative values for the unsigned field).
///
/// Tolerates an absent `failure` (test passed) and empty coverage arrays
/// (a test that recorded no line hits is still a valid test).
pub fn parse_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    let snapshot: Snapshot =
        serde_json::from_slice(bytes).map_err(|e| CoverlayError::malformed(e.to_string()))?;

    for test in &snapshot.tests {
        for coverage in &test.file_coverage {
            if coverage.line_coverage.contains(&0) {
                return Err(CoverlayError::malformed(format!(
                    "test '{}' records line 0 for '{}' (line numbers are 1-based)",
                    test.name, coverage.path
                )));
            }
        }
    }

    Ok(snapshot)
}

// ============================================================================
// Tests
// ============================================================================
