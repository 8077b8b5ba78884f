//! Query/cache layer: memoized per-file coverage views
//!
//! Visible-range queries arrive on every scroll or keystroke, while state
//! reloads are comparatively rare. The cache stores the full per-file index
//! on first query and serves filtered views until the store announces a
//! change, at which point the whole cache is dropped. Correctness over
//! precision: there is no per-file invalidation.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::index::{build_file_index, CoveredTest, FileIndex};
use crate::paths::CoverageRoot;
use crate::snapshot::Snapshot;
use crate::store::StateStore;

/// Host-editor capabilities the engine needs, kept deliberately narrow so the
/// core stays decoupled from any specific editor
pub trait EditorContext {
    /// Absolute, OS-native path of the active document, if any
    fn document_path(&self) -> Option<PathBuf>;

    /// 1-based line numbers currently visible in the view
    fn visible_lines(&self) -> BTreeSet<u32>;
}

/// Per-file memoized view over the coverage index.
///
/// All reads and writes share one critical section; contention is low and a
/// read must never observe an in-flight invalidation.
///
/// Entries are tagged with the identity of the published collection they were
/// built from. A query thread can capture the collection, lose the race
/// against a reload's invalidation, and only then populate the cache; the tag
/// ensures such an entry is dropped as soon as any query arrives with the
/// replacement collection, so stale indexes never outlive the change
/// notification.
pub struct QueryCache {
    state: Mutex<CacheState>,
}

struct CacheState {
    /// Pointer identity of the snapshot collection the entries derive from
    source: usize,
    indexes: HashMap<String, Arc<FileIndex>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                source: 0,
                indexes: HashMap::new(),
            }),
        }
    }

    /// The full line → tests index for one normalized path, built from
    /// `snapshots` on first call and cached while `snapshots` remains the
    /// published collection.
    pub fn file_index(&self, snapshots: &Arc<Vec<Snapshot>>, path: &str) -> Arc<FileIndex> {
        let source = Arc::as_ptr(snapshots) as usize;

        let mut state = self.state.lock();
        if state.source != source {
            state.indexes.clear();
            state.source = source;
        }

        if let Some(cached) = state.indexes.get(path) {
            return Arc::clone(cached);
        }

        let built = Arc::new(build_file_index(snapshots, path));
        state.indexes.insert(path.to_string(), Arc::clone(&built));
        built
    }

    /// The cached index filtered to `visible_lines`. Lines without coverage
    /// are absent from the result.
    pub fn query(
        &self,
        snapshots: &Arc<Vec<Snapshot>>,
        path: &str,
        visible_lines: &[u32],
    ) -> HashMap<u32, Vec<CoveredTest>> {
        let index = self.file_index(snapshots, path);
        visible_lines
            .iter()
            .filter_map(|line| index.get(line).map(|tests| (*line, tests.clone())))
            .collect()
    }

    /// Drop every cached index; the next query per path recomputes from the
    /// then-current snapshot collection.
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        state.indexes.clear();
        state.source = 0;
    }

    /// Number of cached per-file indexes
    pub fn len(&self) -> usize {
        self.state.lock().indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().indexes.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Store + cache wired together: the full ingestion and query engine.
///
/// Reload notifications from the store invalidate the cache, so query
/// results always derive from the current snapshot collection. Query callers
/// never see an error: a detached store or unknown path yields an empty map.
///
/// # Example
///
/// ```ignore
/// use coverlay::CoverageEngine;
/// use std::path::Path;
///
/// let engine = CoverageEngine::new();
/// engine.attach(Path::new("/path/to/project"))?;
/// let coverage = engine.query("src/a.cs", &[5, 6, 7]);
/// for (line, tests) in &coverage {
///     println!("{line}: {} tests", tests.len());
/// }
/// ```
pub struct CoverageEngine {
    store: Arc<StateStore>,
    cache: Arc<QueryCache>,
}

impl CoverageEngine {
    pub fn new() -> Self {
        let store = Arc::new(StateStore::new());
        let cache = Arc::new(QueryCache::new());

        let invalidated = Arc::clone(&cache);
        store.on_changed(move || invalidated.invalidate_all());

        Self { store, cache }
    }

    /// Attach the underlying store; see [`StateStore::attach`]
    pub fn attach(&self, start: &Path) -> crate::Result<bool> {
        self.cache.invalidate_all();
        self.store.attach(start)
    }

    /// Detach the underlying store and clear cached indexes
    pub fn detach(&self) {
        self.store.detach();
        self.cache.invalidate_all();
    }

    /// The underlying state store
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// The coverage root of the active watch, if attached
    pub fn coverage_root(&self) -> Option<CoverageRoot> {
        self.store.coverage_root()
    }

    /// Per-line coverage for the visible lines of one normalized path
    pub fn query(&self, path: &str, visible_lines: &[u32]) -> HashMap<u32, Vec<CoveredTest>> {
        let snapshots = self.store.snapshots();
        self.cache.query(&snapshots, path, visible_lines)
    }

    /// Full per-line coverage for one normalized path
    pub fn file_index(&self, path: &str) -> Arc<FileIndex> {
        let snapshots = self.store.snapshots();
        self.cache.file_index(&snapshots, path)
    }

    /// Query coverage for whatever the host editor is showing.
    ///
    /// Empty when no document is open or the store is detached.
    pub fn query_editor(&self, editor: &dyn EditorContext) -> HashMap<u32, Vec<CoveredTest>> {
        let Some(document) = editor.document_path() else {
            return HashMap::new();
        };
        let Some(root) = self.store.coverage_root() else {
            return HashMap::new();
        };

        let path = root.normalize_source_path(&document);
        let visible: Vec<u32> = editor.visible_lines().into_iter().collect();
        self.query(&path, &visible)
    }
}

impl Default for CoverageEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
