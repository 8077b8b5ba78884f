//! Coverage-root discovery and source-path normalization
//!
//! All paths crossing into the index/query core are forward-slash normalized
//! and relative to the coverage root, so that cache and index keys compare
//! with exact string equality regardless of the host OS separator.

use std::path::{Path, PathBuf};

/// Marker directory that anchors a coverage root
pub const MARKER_DIR_NAME: &str = ".coverlay";

/// Child of the marker directory holding coverage-state files
pub const STATE_DIR_NAME: &str = "state";

/// A discovered coverage root.
///
/// The project directory is the ancestor that contains the `.coverlay`
/// marker; all relative paths in coverage data are anchored at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRoot {
    project_dir: PathBuf,
}

impl CoverageRoot {
    /// Walk upward from `start` through ancestor directories until one
    /// containing a `.coverlay` marker subdirectory is found.
    ///
    /// Returns `None` when no ancestor qualifies; callers treat that as
    /// "stay detached", not as an error.
    pub fn discover(start: &Path) -> Option<Self> {
        let mut dir = Some(start);
        while let Some(candidate) = dir {
            if candidate.join(MARKER_DIR_NAME).is_dir() {
                return Some(Self {
                    project_dir: candidate.to_path_buf(),
                });
            }
            dir = candidate.parent();
        }
        None
    }

    /// The ancestor directory holding the marker
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// The `.coverlay` marker directory itself
    pub fn marker_dir(&self) -> PathBuf {
        self.project_dir.join(MARKER_DIR_NAME)
    }

    /// The watched `state` directory inside the marker
    pub fn state_dir(&self) -> PathBuf {
        self.marker_dir().join(STATE_DIR_NAME)
    }

    /// Convert an absolute, OS-native document path into the core's key form:
    /// forward slashes, relative to the project directory when it lies inside
    /// it. Paths outside the project are returned normalized but unstripped.
    pub fn normalize_source_path(&self, path: &Path) -> String {
        normalize_source_path(path, &self.project_dir)
    }
}

/// Replace backslash separators with forward slashes
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize `path` against `project_dir`: forward slashes, project prefix
/// stripped. Comparison is exact-string and case-sensitive.
pub fn normalize_source_path(path: &Path, project_dir: &Path) -> String {
    let path = normalize_separators(&path.to_string_lossy());
    let root = normalize_separators(&project_dir.to_string_lossy());
    let root = root.trim_end_matches('/');

    match path
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
    {
        Some(relative) => relative.to_string(),
        None => path,
    }
}
