//! CLI argument definitions using clap with subcommand architecture
//!
//! The binary is a development surface over the library core: inspect a
//! single state file, run a one-shot coverage query, or tail a watched
//! project and print reload events.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "coverlay")]
#[command(about = "Per-line test coverage ingestion and query engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose diagnostics on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse one coverage-state file and print its contents
    Inspect {
        /// Path to the state file
        file: PathBuf,

        /// Emit the parsed snapshot as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// One-shot query: which tests cover which lines of a source file
    Query {
        /// Source file to query (absolute, or relative to the project root)
        file: PathBuf,

        /// Lines to query, as a range `5..20` or a list `5,6,9`.
        /// Omit to print every covered line.
        #[arg(long)]
        lines: Option<String>,

        /// Directory to start coverage-root discovery from
        /// (default: the source file's parent)
        #[arg(long, env = "COVERLAY_ROOT")]
        root: Option<PathBuf>,

        /// Emit the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch a project's coverage state and print a line per reload
    Watch {
        /// Directory to start coverage-root discovery from (default: cwd)
        #[arg(long, env = "COVERLAY_ROOT")]
        root: Option<PathBuf>,
    },
}

/// Parse a `--lines` spec: either an inclusive range `a..b` or a
/// comma-separated list. Line numbers are 1-based.
pub fn parse_line_spec(spec: &str) -> Result<Vec<u32>, String> {
    if let Some((start, end)) = spec.split_once("..") {
        let start: u32 = start
            .trim()
            .parse()
            .map_err(|_| format!("invalid range start: '{start}'"))?;
        let end: u32 = end
            .trim()
            .parse()
            .map_err(|_| format!("invalid range end: '{end}'"))?;
        if start == 0 {
            return Err("line numbers are 1-based".to_string());
        }
        if end < start {
            return Err(format!("empty range: {start}..{end}"));
        }
        return Ok((start..=end).collect());
    }

    spec.split(',')
        .map(|part| {
            let line: u32 = part
                .trim()
                .parse()
                .map_err(|_| format!("invalid line number: '{part}'"))?;
            if line == 0 {
                return Err("line numbers are 1-based".to_string());
            }
            Ok(line)
        })
        .collect()
}
