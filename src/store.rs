//! State store: watches the coverage-state directory and publishes snapshots
//!
//! Owns the directory watch, debounces bursts of filesystem events, reloads
//! every state file on change, and publishes the merged snapshot collection
//! plus a change notification. The published collection is immutable once
//! published; a reload replaces the whole `Arc`, so concurrent readers see
//! either the old or the new collection, never a partial one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │   notify    │────>│  debouncer  │────>│ reload + publish │
//! │   watcher   │     │  (100ms)    │     │  + listener fan  │
//! └─────────────┘     └─────────────┘     └──────────────────┘
//! ```
//!
//! Unlike the usual global-monitor pattern in editor plugins, the store is an
//! explicitly constructed value; the caller controls its lifecycle through
//! `attach` and `detach`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use parking_lot::{Mutex, RwLock};

use crate::error::{CoverlayError, Result};
use crate::paths::{CoverageRoot, MARKER_DIR_NAME};
use crate::snapshot::{parse_snapshot, Snapshot};

/// Quiescence window for coalescing bursts of filesystem events
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

type ChangeListener = Box<dyn Fn() + Send + Sync>;

/// Authoritative, always-current collection of snapshots loaded from every
/// file in the watched state directory.
///
/// # Example
///
/// ```ignore
/// use coverlay::StateStore;
/// use std::path::Path;
///
/// let store = StateStore::new();
/// store.on_changed(|| println!("coverage state changed"));
/// if store.attach(Path::new("/path/to/project"))? {
///     let snapshots = store.snapshots();
/// }
/// ```
pub struct StateStore {
    shared: Arc<StoreShared>,
    watch: Mutex<Option<WatchGuard>>,
}

struct StoreShared {
    /// Published collection. Replaced wholesale on each successful reload.
    snapshots: RwLock<Arc<Vec<Snapshot>>>,

    /// Coverage root of the active watch, None while detached
    root: RwLock<Option<CoverageRoot>>,

    /// Listeners invoked once per successful reload
    listeners: Mutex<Vec<ChangeListener>>,

    /// Bumped on every attach/detach; a reload publishes only if its
    /// generation is still current, so superseded reloads are discarded.
    generation: AtomicU64,
}

/// Stops the watcher thread when dropped
struct WatchGuard {
    running: Arc<AtomicBool>,
}

impl WatchGuard {
    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

impl StateStore {
    /// Create a detached store; `snapshots()` is empty until a successful
    /// `attach` and load.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StoreShared {
                snapshots: RwLock::new(Arc::new(Vec::new())),
                root: RwLock::new(None),
                listeners: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
            }),
            watch: Mutex::new(None),
        }
    }

    /// Discover the coverage root above `start` and begin watching its state
    /// directory. Replaces any prior watch and its published state.
    ///
    /// Performs the initial load synchronously before returning; subsequent
    /// reloads run on the watcher thread, debounced by [`DEBOUNCE_WINDOW`].
    ///
    /// Returns `Ok(false)` when no ancestor of `start` contains the marker
    /// directory: the store stays detached and queries keep returning empty
    /// results, per the availability-over-errors policy. Watcher setup
    /// failures are real errors and are returned as `Err`.
    pub fn attach(&self, start: &Path) -> Result<bool> {
        self.detach();

        let Some(root) = CoverageRoot::discover(start) else {
            tracing::debug!(
                start = %start.display(),
                "no {MARKER_DIR_NAME} marker in any ancestor, store stays detached"
            );
            return Ok(false);
        };

        let generation = self.shared.generation.load(Ordering::SeqCst);
        let marker_dir = root.marker_dir();
        let state_dir = root.state_dir();
        *self.shared.root.write() = Some(root);

        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer(DEBOUNCE_WINDOW, tx)
            .map_err(|e| CoverlayError::Io(std::io::Error::new(ErrorKind::Other, e.to_string())))?;

        // Watch the state directory itself so unrelated files under the
        // marker never trigger reloads. Before the producer has created the
        // state child, watch the marker so the creation is picked up.
        let watch_target = if state_dir.is_dir() { state_dir } else { marker_dir };
        debouncer
            .watcher()
            .watch(&watch_target, RecursiveMode::Recursive)
            .map_err(|e| {
                CoverlayError::Io(std::io::Error::new(ErrorKind::Other, e.to_string()))
            })?;

        self.shared.reload(generation);

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let thread_shared = Arc::clone(&self.shared);

        std::thread::spawn(move || {
            while thread_running.load(Ordering::SeqCst) {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(Ok(events)) => {
                        tracing::debug!("received {} debounced state events", events.len());
                        // Drain batches that queued up behind this one so a
                        // burst of events yields a single reload.
                        while rx.try_recv().is_ok() {}
                        thread_shared.reload(generation);
                    }
                    Ok(Err(e)) => {
                        tracing::error!("state watcher error: {:?}", e);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            // Keep the debouncer alive until the thread exits
            drop(debouncer);
        });

        *self.watch.lock() = Some(WatchGuard { running });

        Ok(true)
    }

    /// Stop the active watch and clear all published state.
    ///
    /// A reload still in flight is not aborted, but its result is discarded.
    pub fn detach(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(guard) = self.watch.lock().take() {
            guard.stop();
        }

        *self.shared.root.write() = None;
        *self.shared.snapshots.write() = Arc::new(Vec::new());
    }

    /// Whether a watch is currently active
    pub fn is_attached(&self) -> bool {
        self.watch.lock().is_some()
    }

    /// The most recently published snapshot collection.
    ///
    /// Empty before any load has completed or after a detach. The returned
    /// `Arc` stays coherent even while a reload is publishing a replacement.
    pub fn snapshots(&self) -> Arc<Vec<Snapshot>> {
        Arc::clone(&self.shared.snapshots.read())
    }

    /// The coverage root of the active watch, if attached
    pub fn coverage_root(&self) -> Option<CoverageRoot> {
        self.shared.root.read().clone()
    }

    /// Register a listener invoked after every successful reload.
    ///
    /// Not invoked for abandoned reloads (transient I/O) or for reloads
    /// superseded by a newer attach.
    pub fn on_changed(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared.listeners.lock().push(Box::new(listener));
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        if let Some(guard) = self.watch.lock().take() {
            guard.stop();
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("attached", &self.is_attached())
            .field("snapshots", &self.snapshots().len())
            .finish()
    }
}

impl StoreShared {
    /// Enumerate and parse every state file, then publish atomically.
    ///
    /// Transient I/O failures (a file locked mid-write, an unreadable
    /// directory entry) abandon the attempt silently: the previous collection
    /// keeps serving and listeners are not invoked; the next filesystem event
    /// retries. Malformed files are logged and excluded without failing the
    /// rest of the reload.
    fn reload(&self, generation: u64) {
        let Some(state_dir) = self.root.read().as_ref().map(CoverageRoot::state_dir) else {
            return;
        };

        let entries = match fs::read_dir(&state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // No state directory yet: publish the empty collection so
                // stale data from a deleted run does not linger.
                self.publish(generation, Vec::new());
                return;
            }
            Err(e) => {
                tracing::debug!(
                    dir = %state_dir.display(),
                    "state directory unreadable, keeping previous snapshots: {e}"
                );
                return;
            }
        };

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else {
                return;
            };
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut next = Vec::with_capacity(files.len());
        for path in &files {
            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        "state file unreadable, keeping previous snapshots: {e}"
                    );
                    return;
                }
            };

            match parse_snapshot(&bytes) {
                Ok(snapshot) => next.push(snapshot),
                Err(e) => {
                    tracing::warn!("excluding malformed state file: {}", e.for_file(path));
                }
            }
        }

        self.publish(generation, next);
    }

    /// Atomically replace the published collection and fan out the change
    /// notification, unless a newer attach superseded this reload.
    fn publish(&self, generation: u64, next: Vec<Snapshot>) {
        {
            let mut slot = self.snapshots.write();
            if self.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!("discarding reload superseded by a newer attach");
                return;
            }
            *slot = Arc::new(next);
        }

        for listener in self.listeners.lock().iter() {
            listener();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
