//! Integration tests for the coverlay engine
//!
//! End-to-end behavior across the store, index, and query layers: real
//! temporary directories, a real filesystem watcher, and real debounced
//! reloads.
//!
//! ## Test Fixture Strategy
//!
//! Tests use tempfile to create a project directory with a `.coverlay/state`
//! layout and write state files into it, so watcher behavior is exercised the
//! same way a test runner writing snapshots would.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use coverlay::{CoverageEngine, EditorContext, StateStore};

// ============================================================================
// TEST FIXTURE UTILITIES
// ============================================================================

/// A project directory with a `.coverlay/state` layout
struct TestProject {
    dir: TempDir,
}

impl TestProject {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(dir.path().join(".coverlay/state")).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn state_dir(&self) -> PathBuf {
        self.path().join(".coverlay/state")
    }

    fn write_state(&self, name: &str, contents: &str) {
        fs::write(self.state_dir().join(name), contents).unwrap();
    }

    fn remove_state(&self, name: &str) {
        fs::remove_file(self.state_dir().join(name)).unwrap();
    }
}

/// One-test snapshot document covering `lines` of `path`
fn snapshot_json(test_name: &str, path: &str, lines: &[u32], failed: bool) -> String {
    let lines = lines
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let failure = if failed {
        r#""failure": { "message": "boom" },"#
    } else {
        ""
    };
    format!(
        r#"{{
            "tests": [
                {{
                    "name": "{test_name}",
                    "duration": 10,
                    {failure}
                    "fileCoverage": [ {{ "path": "{path}", "lineCoverage": [{lines}] }} ]
                }}
            ]
        }}"#
    )
}

/// Poll `cond` until it holds or `timeout` elapses
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    cond()
}

/// Generous settle time for debounce plus watcher latency
const SETTLE: Duration = Duration::from_secs(3);

// ============================================================================
// QUERY SCENARIOS
// ============================================================================

#[test]
fn query_returns_covered_lines_only() {
    let project = TestProject::new();
    project.write_state("run.json", &snapshot_json("Foo.Bar", "src/a.cs", &[5, 6], false));

    let engine = CoverageEngine::new();
    assert!(engine.attach(project.path()).unwrap());

    let coverage = engine.query("src/a.cs", &[5, 6, 7]);
    assert_eq!(coverage.len(), 2);
    assert_eq!(coverage[&5][0].name, "Foo.Bar");
    assert_eq!(coverage[&5][0].duration, 10);
    assert!(!coverage[&5][0].failed());
    assert_eq!(coverage[&6][0].name, "Foo.Bar");
    assert!(!coverage.contains_key(&7));
}

#[test]
fn query_reports_failure_details() {
    let project = TestProject::new();
    project.write_state("run.json", &snapshot_json("Foo.Bar", "src/a.cs", &[5], true));

    let engine = CoverageEngine::new();
    engine.attach(project.path()).unwrap();

    let coverage = engine.query("src/a.cs", &[5]);
    let test = &coverage[&5][0];
    assert!(test.failed());
    assert_eq!(test.failure.as_ref().unwrap().message, "boom");
}

#[test]
fn same_test_name_in_two_snapshots_not_deduplicated() {
    let project = TestProject::new();
    project.write_state("one.json", &snapshot_json("X", "src/b.cs", &[3], false));
    project.write_state("two.json", &snapshot_json("X", "src/b.cs", &[3], true));

    let engine = CoverageEngine::new();
    engine.attach(project.path()).unwrap();

    let coverage = engine.query("src/b.cs", &[3]);
    let tests = &coverage[&3];
    assert_eq!(tests.len(), 2);
    // Both contributions are visible, one passing and one failing
    assert!(tests.iter().any(|t| !t.failed()));
    assert!(tests.iter().any(|t| t.failed()));
}

#[test]
fn truncated_state_file_excluded_without_faulting() {
    let project = TestProject::new();
    project.write_state("good.json", &snapshot_json("Ok.Test", "src/a.cs", &[1], false));
    let full = snapshot_json("Broken.Test", "src/a.cs", &[2], false);
    project.write_state("truncated.json", &full[..full.len() / 2]);

    let engine = CoverageEngine::new();
    engine.attach(project.path()).unwrap();

    let coverage = engine.query("src/a.cs", &[1, 2]);
    assert_eq!(coverage.len(), 1);
    assert_eq!(coverage[&1][0].name, "Ok.Test");
    assert!(!coverage.contains_key(&2));
}

#[test]
fn unattached_engine_serves_empty_results() {
    let dir = TempDir::new().unwrap();

    let engine = CoverageEngine::new();
    assert!(!engine.attach(dir.path()).unwrap());
    assert!(engine.query("src/a.cs", &[1, 2, 3]).is_empty());
}

// ============================================================================
// RELOAD AND INVALIDATION
// ============================================================================

#[test]
fn new_state_file_invalidates_cached_queries() {
    let project = TestProject::new();
    project.write_state("run.json", &snapshot_json("Old.Test", "src/a.cs", &[1], false));

    let engine = CoverageEngine::new();
    engine.attach(project.path()).unwrap();
    assert_eq!(engine.query("src/a.cs", &[1])[&1][0].name, "Old.Test");

    project.write_state("run.json", &snapshot_json("New.Test", "src/a.cs", &[1], false));

    assert!(wait_until(SETTLE, || {
        let coverage = engine.query("src/a.cs", &[1]);
        coverage
            .get(&1)
            .is_some_and(|tests| tests[0].name == "New.Test")
    }));
}

#[test]
fn deleted_state_file_removes_its_coverage() {
    let project = TestProject::new();
    project.write_state("one.json", &snapshot_json("A.Test", "src/a.cs", &[1], false));
    project.write_state("two.json", &snapshot_json("B.Test", "src/a.cs", &[2], false));

    let engine = CoverageEngine::new();
    engine.attach(project.path()).unwrap();
    assert_eq!(engine.query("src/a.cs", &[1, 2]).len(), 2);

    project.remove_state("two.json");

    assert!(wait_until(SETTLE, || {
        let coverage = engine.query("src/a.cs", &[1, 2]);
        coverage.len() == 1 && coverage.contains_key(&1)
    }));
}

#[test]
fn reload_of_unchanged_directory_is_idempotent() {
    let project = TestProject::new();
    let contents = snapshot_json("Same.Test", "src/a.cs", &[4, 5], false);
    project.write_state("run.json", &contents);

    let store = Arc::new(StateStore::new());
    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    store.on_changed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    store.attach(project.path()).unwrap();
    let first = store.snapshots();

    // Rewrite identical bytes to force a reload without changing content
    project.write_state("run.json", &contents);
    assert!(wait_until(SETTLE, || reloads.load(Ordering::SeqCst) >= 2));

    let second = store.snapshots();
    assert_eq!(*first, *second);
}

#[test]
fn event_burst_coalesces_into_few_reloads() {
    let project = TestProject::new();
    project.write_state("run.json", &snapshot_json("T0", "src/a.cs", &[1], false));

    let store = Arc::new(StateStore::new());
    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    store.on_changed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    store.attach(project.path()).unwrap();
    let baseline = reloads.load(Ordering::SeqCst);

    const BURST: usize = 8;
    for _ in 0..BURST {
        project.write_state("run.json", &snapshot_json("T.Final", "src/a.cs", &[1], false));
        // Well within the 100ms quiescence window
        thread::sleep(Duration::from_millis(2));
    }

    assert!(wait_until(SETTLE, || {
        store.snapshots().first().is_some_and(|s| s.tests[0].name == "T.Final")
    }));
    thread::sleep(Duration::from_millis(500));

    let burst_reloads = reloads.load(Ordering::SeqCst) - baseline;
    assert!(burst_reloads >= 1);
    assert!(
        burst_reloads < BURST,
        "expected coalescing, got {burst_reloads} reloads for {BURST} events"
    );
}

#[cfg(unix)]
#[test]
fn unreadable_state_file_abandons_reload_silently() {
    use std::os::unix::fs::PermissionsExt;

    let project = TestProject::new();
    project.write_state("a.json", &snapshot_json("Kept.Test", "src/a.cs", &[1], false));
    project.write_state("locked.json", &snapshot_json("Locked.Test", "src/a.cs", &[2], false));

    let store = Arc::new(StateStore::new());
    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    store.on_changed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    store.attach(project.path()).unwrap();
    assert_eq!(store.snapshots().len(), 2);
    let baseline = reloads.load(Ordering::SeqCst);

    let locked = project.state_dir().join("locked.json");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // Privileged processes bypass file modes; an unreadable file cannot
        // be simulated here.
        return;
    }

    // The triggering change itself parses fine; the reload must still be
    // abandoned because the locked file cannot be read.
    project.write_state("a.json", &snapshot_json("Replaced.Test", "src/a.cs", &[1], false));
    thread::sleep(Duration::from_secs(1));

    assert_eq!(reloads.load(Ordering::SeqCst), baseline);
    let snapshots = store.snapshots();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].tests[0].name, "Kept.Test");
    assert_eq!(snapshots[1].tests[0].name, "Locked.Test");

    // Once readable again, the next event picks up the deferred change
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
    project.write_state("a.json", &snapshot_json("Replaced.Test", "src/a.cs", &[1], false));
    assert!(wait_until(SETTLE, || {
        store
            .snapshots()
            .first()
            .is_some_and(|s| s.tests[0].name == "Replaced.Test")
    }));
}

#[test]
fn unrelated_marker_files_do_not_trigger_reload() {
    let project = TestProject::new();
    project.write_state("run.json", &snapshot_json("T", "src/a.cs", &[1], false));

    let store = Arc::new(StateStore::new());
    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    store.on_changed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    store.attach(project.path()).unwrap();
    let baseline = reloads.load(Ordering::SeqCst);

    // Config and log files beside the state directory are out of scope
    fs::write(project.path().join(".coverlay/config.toml"), "retain = 5").unwrap();
    fs::write(project.path().join(".coverlay/runner.log"), "run complete").unwrap();
    thread::sleep(Duration::from_secs(1));
    assert_eq!(reloads.load(Ordering::SeqCst), baseline);

    // State events are still observed
    project.write_state("run.json", &snapshot_json("T2", "src/a.cs", &[1], false));
    assert!(wait_until(SETTLE, || {
        reloads.load(Ordering::SeqCst) > baseline
    }));
}

#[test]
fn state_directory_created_after_attach_is_picked_up() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join(".coverlay")).unwrap();

    let engine = CoverageEngine::new();
    assert!(engine.attach(dir.path()).unwrap());
    assert!(engine.query("src/a.cs", &[1]).is_empty());

    fs::create_dir_all(dir.path().join(".coverlay/state")).unwrap();
    fs::write(
        dir.path().join(".coverlay/state/run.json"),
        snapshot_json("Late.Test", "src/a.cs", &[1], false),
    )
    .unwrap();

    assert!(wait_until(SETTLE, || {
        engine
            .query("src/a.cs", &[1])
            .get(&1)
            .is_some_and(|tests| tests[0].name == "Late.Test")
    }));
}

#[test]
fn detach_clears_published_state() {
    let project = TestProject::new();
    project.write_state("run.json", &snapshot_json("T", "src/a.cs", &[1], false));

    let engine = CoverageEngine::new();
    engine.attach(project.path()).unwrap();
    assert!(!engine.query("src/a.cs", &[1]).is_empty());

    engine.detach();
    assert!(engine.query("src/a.cs", &[1]).is_empty());
}

// ============================================================================
// EDITOR CONTEXT
// ============================================================================

struct FakeEditor {
    document: PathBuf,
    visible: BTreeSet<u32>,
}

impl EditorContext for FakeEditor {
    fn document_path(&self) -> Option<PathBuf> {
        Some(self.document.clone())
    }

    fn visible_lines(&self) -> BTreeSet<u32> {
        self.visible.clone()
    }
}

#[test]
fn editor_query_normalizes_absolute_document_path() {
    let project = TestProject::new();
    project.write_state("run.json", &snapshot_json("Foo.Bar", "src/a.cs", &[5, 6], false));

    let engine = CoverageEngine::new();
    engine.attach(project.path()).unwrap();

    let editor = FakeEditor {
        document: project.path().join("src").join("a.cs"),
        visible: BTreeSet::from([5, 6, 7]),
    };

    let coverage = engine.query_editor(&editor);
    assert_eq!(coverage.len(), 2);
    assert_eq!(coverage[&5][0].name, "Foo.Bar");
    assert!(!coverage.contains_key(&7));
}
