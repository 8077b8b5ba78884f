//! Coverlay CLI entry point

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use coverlay::cli::{parse_line_spec, Cli, Command};
use coverlay::{
    parse_snapshot, CoverageEngine, CoverlayError, CoveredTest, Snapshot, StateStore,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "coverlay=debug" } else { "coverlay=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run(cli: Cli) -> coverlay::Result<()> {
    match cli.command {
        Command::Inspect { file, json } => run_inspect(&file, json),
        Command::Query {
            file,
            lines,
            root,
            json,
        } => run_query(&file, lines.as_deref(), root.as_deref(), json),
        Command::Watch { root } => run_watch(root.as_deref()),
    }
}

/// Parse one state file and print its contents
fn run_inspect(file: &Path, json: bool) -> coverlay::Result<()> {
    let bytes = fs::read(file)?;
    let snapshot = parse_snapshot(&bytes).map_err(|e| e.for_file(file))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot)
                .map_err(|e| CoverlayError::malformed(e.to_string()))?
        );
        return Ok(());
    }

    println!(
        "{}: {} tests, {} failed",
        file.display(),
        snapshot.test_count(),
        snapshot.failed_count()
    );
    for test in &snapshot.tests {
        let status = if test.failed() { "FAIL" } else { "pass" };
        let files = test.file_coverage.len();
        println!(
            "  [{status}] {} ({} ms, {files} files covered)",
            test.name, test.duration
        );
        if let Some(failure) = &test.failure {
            println!("         {}", failure.message);
        }
    }

    Ok(())
}

/// One-shot coverage query for a source file
fn run_query(
    file: &Path,
    lines: Option<&str>,
    root: Option<&Path>,
    json: bool,
) -> coverlay::Result<()> {
    let file = absolute(file)?;
    let start = match root {
        Some(dir) => dir.to_path_buf(),
        None => file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let engine = CoverageEngine::new();
    if !engine.attach(&start)? {
        return Err(CoverlayError::NoCoverageRoot {
            start: start.display().to_string(),
        });
    }

    let Some(coverage_root) = engine.coverage_root() else {
        return Err(CoverlayError::NoCoverageRoot {
            start: start.display().to_string(),
        });
    };
    let normalized = coverage_root.normalize_source_path(&file);

    let coverage: BTreeMap<u32, Vec<CoveredTest>> = match lines {
        Some(spec) => {
            let visible = parse_line_spec(spec).map_err(CoverlayError::malformed)?;
            engine.query(&normalized, &visible).into_iter().collect()
        }
        None => engine
            .file_index(&normalized)
            .iter()
            .map(|(line, tests)| (*line, tests.clone()))
            .collect(),
    };

    if json {
        let value = serde_json::json!({
            "path": normalized,
            "lines": coverage
                .iter()
                .map(|(line, tests)| {
                    (
                        line.to_string(),
                        tests
                            .iter()
                            .map(|t| {
                                serde_json::json!({
                                    "name": t.name,
                                    "duration": t.duration,
                                    "failed": t.failed(),
                                })
                            })
                            .collect::<Vec<_>>(),
                    )
                })
                .collect::<BTreeMap<String, Vec<serde_json::Value>>>(),
        });
        let rendered = serde_json::to_string_pretty(&value)
            .map_err(|e| CoverlayError::malformed(e.to_string()))?;
        println!("{rendered}");
        return Ok(());
    }

    if coverage.is_empty() {
        println!("{normalized}: no coverage data");
        return Ok(());
    }

    println!("{normalized}:");
    for (line, tests) in &coverage {
        for test in tests {
            let status = if test.failed() { "FAIL" } else { "pass" };
            println!("  {line:>5} [{status}] {} ({} ms)", test.name, test.duration);
        }
    }

    Ok(())
}

/// Watch a project's coverage state, printing a line per reload
fn run_watch(root: Option<&Path>) -> coverlay::Result<()> {
    let start = match root {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };

    let store = Arc::new(StateStore::new());
    let weak = Arc::downgrade(&store);
    store.on_changed(move || {
        if let Some(store) = weak.upgrade() {
            let snapshots = store.snapshots();
            let tests: usize = snapshots.iter().map(Snapshot::test_count).sum();
            let failed: usize = snapshots.iter().map(Snapshot::failed_count).sum();
            println!(
                "reloaded: {} snapshots, {tests} tests, {failed} failed",
                snapshots.len()
            );
        }
    });

    if !store.attach(&start)? {
        return Err(CoverlayError::NoCoverageRoot {
            start: start.display().to_string(),
        });
    }

    if let Some(root) = store.coverage_root() {
        println!("watching {}", root.state_dir().display());
    }

    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn absolute(path: &Path) -> coverlay::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
