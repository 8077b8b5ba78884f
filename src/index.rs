//! Coverage index: per-file line → covering-tests mapping
//!
//! Derived wholesale from the current snapshot collection for one normalized
//! source path. Indexes are never mutated in place; the query cache rebuilds
//! and replaces them after every state change.

use std::collections::{HashMap, HashSet};

use crate::paths::normalize_separators;
use crate::snapshot::{Snapshot, TestFailure, TestResult};

/// Mapping from 1-based line number to the tests covering that line.
///
/// Lines with no covering tests are absent, never present with an empty set.
pub type FileIndex = HashMap<u32, Vec<CoveredTest>>;

/// One test's contribution to a covered line, as consumed by annotation UIs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveredTest {
    /// Fully-qualified test name
    pub name: String,

    /// Elapsed duration in milliseconds
    pub duration: u64,

    /// Failure details when the most recent run failed
    pub failure: Option<TestFailure>,
}

impl CoveredTest {
    fn from_test(test: &TestResult) -> Self {
        Self {
            name: test.name.clone(),
            duration: test.duration,
            failure: test.failure.clone(),
        }
    }

    /// Whether the covering test failed on its most recent run
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Everything before the last `.` of the fully-qualified name
    pub fn class_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(split) => &self.name[..split],
            None => "",
        }
    }

    /// Everything after the last `.` of the fully-qualified name
    pub fn short_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(split) => &self.name[split + 1..],
            None => &self.name,
        }
    }
}

/// Build the per-line coverage index for one normalized source path.
///
/// Flattens every snapshot's tests, keeps the coverage entries whose
/// normalized path equals `path`, and groups the recorded lines. Within one
/// snapshot a test contributes at most once per line even when its coverage
/// entries repeat; across snapshots tests are not deduplicated, so two
/// snapshots both claiming a line yield two entries for it.
pub fn build_file_index(snapshots: &[Snapshot], path: &str) -> FileIndex {
    let mut index: FileIndex = HashMap::new();

    for snapshot in snapshots {
        let mut seen: HashMap<u32, HashSet<&str>> = HashMap::new();

        for test in &snapshot.tests {
            for coverage in &test.file_coverage {
                if normalize_separators(&coverage.path) != path {
                    continue;
                }
                for &line in &coverage.line_coverage {
                    if seen.entry(line).or_default().insert(test.name.as_str()) {
                        index
                            .entry(line)
                            .or_default()
                            .push(CoveredTest::from_test(test));
                    }
                }
            }
        }
    }

    // Dangling-reference guard: a grouped line that resolved to no tests is
    // logged and skipped instead of faulting the whole computation.
    index.retain(|line, tests| {
        if tests.is_empty() {
            tracing::warn!(line, path, "coverage entry resolves to no tests, skipping line");
            return false;
        }
        true
    });

    index
}

// ============================================================================
// Tests
// ============================================================================
