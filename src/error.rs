//! Error types and exit codes for coverlay operations

use std::path::Path;
use std::process::ExitCode;
use thiserror::Error;

/// Main error type for coverlay operations
#[derive(Error, Debug)]
pub enum CoverlayError {
    #[error("Malformed state file{}: {message}", fmt_origin(.path))]
    Malformed {
        /// Originating state file, when the payload came from disk
        path: Option<String>,
        message: String,
    },

    #[error("No coverage root found above: {start}")]
    NoCoverageRoot { start: String },

    #[error("Coverage entry for {path}:{line} resolves to no tests")]
    DanglingReference { path: String, line: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_origin(path: &Option<String>) -> String {
    match path {
        Some(p) => format!(" {p}"),
        None => String::new(),
    }
}

impl CoverlayError {
    /// A malformed-payload error with no originating file
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            path: None,
            message: message.into(),
        }
    }

    /// Attach the originating state file to a malformed-payload error.
    /// Other variants pass through unchanged.
    pub fn for_file(self, path: &Path) -> Self {
        match self {
            Self::Malformed { message, .. } => Self::Malformed {
                path: Some(path.display().to_string()),
                message,
            },
            other => other,
        }
    }

    /// Convert error to appropriate exit code:
    /// - 0: Success
    /// - 1: IO error
    /// - 2: No coverage root found
    /// - 3: Malformed state file
    /// - 4: Inconsistent coverage data
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) => ExitCode::from(1),
            Self::NoCoverageRoot { .. } => ExitCode::from(2),
            Self::Malformed { .. } => ExitCode::from(3),
            Self::DanglingReference { .. } => ExitCode::from(4),
        }
    }
}

/// Result type alias for coverlay operations
pub type Result<T> = std::result::Result<T, CoverlayError>;
