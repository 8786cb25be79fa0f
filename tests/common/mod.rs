#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use preload_fs::cache::folder::FolderCache;
use preload_fs::listing::{Lister, ListingError};
use preload_fs::sched::{PendingTask, Priority};
use preload_fs::{Fetcher, PrefetchConfig, Prefetcher};

/// Record produced by [`Recorder`] fetchers. `call` is the global index of the fetch that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub path: PathBuf,
    pub call: usize,
}

impl TestRecord {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            call: 0,
        }
    }
}

/// A second record shape, used to check per-type isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherRecord(pub PathBuf);

/// Plain fetcher that records nothing.
pub fn plain_fetcher() -> Fetcher<TestRecord> {
    Arc::new(TestRecord::new)
}

/// In-memory directory tree. Directories absent from the map fail to list.
#[derive(Default)]
pub struct MemLister {
    dirs: HashMap<PathBuf, Vec<(OsString, bool)>>,
    listings: AtomicUsize,
}

impl MemLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `dir` with `files` and `subdirs`. Subdirectories are not added as directories
    /// themselves; call `with_dir` for them too if they should be listable.
    pub fn with_dir(mut self, dir: &str, files: &[&str], subdirs: &[&str]) -> Self {
        let entries = files
            .iter()
            .map(|name| (OsString::from(name), false))
            .chain(subdirs.iter().map(|name| (OsString::from(name), true)))
            .collect();
        self.dirs.insert(PathBuf::from(dir), entries);
        self
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    fn entries(&self, dir: &Path) -> Result<&[(OsString, bool)], ListingError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        self.dirs
            .get(dir)
            .map(Vec::as_slice)
            .ok_or_else(|| ListingError::Unavailable {
                path: dir.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
    }
}

impl Lister for MemLister {
    fn list_names(&self, dir: &Path) -> Result<Vec<OsString>, ListingError> {
        Ok(self
            .entries(dir)?
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn list_subdirectory_names(&self, dir: &Path) -> Result<Vec<OsString>, ListingError> {
        Ok(self
            .entries(dir)?
            .iter()
            .filter(|(_, is_dir)| *is_dir)
            .map(|(name, _)| name.clone())
            .collect())
    }
}

#[derive(Default)]
struct RecorderState {
    started: Vec<PathBuf>,
    finished: Vec<PathBuf>,
    gated: HashSet<PathBuf>,
    panics: HashSet<PathBuf>,
    open: bool,
}

#[derive(Default)]
struct RecorderInner {
    state: Mutex<RecorderState>,
    opened: Condvar,
    calls: AtomicUsize,
}

/// Instrumented fetcher factory: logs every fetch, can hold chosen paths until released, and
/// can make chosen paths panic.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches of `path` block until [`release`](Self::release) is called.
    pub fn gate(&self, path: impl Into<PathBuf>) {
        self.inner.state.lock().unwrap().gated.insert(path.into());
    }

    /// Let every gated fetch proceed, now and in the future.
    pub fn release(&self) {
        self.inner.state.lock().unwrap().open = true;
        self.inner.opened.notify_all();
    }

    /// Fetches of `path` panic.
    pub fn panic_on(&self, path: impl Into<PathBuf>) {
        self.inner.state.lock().unwrap().panics.insert(path.into());
    }

    pub fn fetcher(&self) -> impl Fn(&Path) -> TestRecord + Send + Sync + 'static {
        let inner = Arc::clone(&self.inner);
        move |path: &Path| {
            let call = inner.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let should_panic = {
                let mut state = inner.state.lock().unwrap();
                state.started.push(path.to_path_buf());
                if state.gated.contains(path) {
                    while !state.open {
                        state = inner.opened.wait(state).unwrap();
                    }
                }
                state.panics.contains(path)
            };
            assert!(!should_panic, "recorder told to fail on {}", path.display());
            inner
                .state
                .lock()
                .unwrap()
                .finished
                .push(path.to_path_buf());
            TestRecord {
                path: path.to_path_buf(),
                call,
            }
        }
    }

    pub fn shared_fetcher(&self) -> Fetcher<TestRecord> {
        Arc::new(self.fetcher())
    }

    pub fn started(&self) -> Vec<PathBuf> {
        self.inner.state.lock().unwrap().started.clone()
    }

    pub fn finished(&self) -> Vec<PathBuf> {
        self.inner.state.lock().unwrap().finished.clone()
    }

    pub fn has_started(&self, path: &str) -> bool {
        self.started().iter().any(|p| p == Path::new(path))
    }

    /// Number of fetches that started for `path`.
    pub fn count(&self, path: &str) -> usize {
        self.started()
            .iter()
            .filter(|p| p.as_path() == Path::new(path))
            .count()
    }
}

pub fn task(
    path: &str,
    folder: &Arc<FolderCache<TestRecord>>,
    fetcher: &Fetcher<TestRecord>,
    priority: Priority,
) -> PendingTask<TestRecord> {
    PendingTask::new(PathBuf::from(path), folder, Arc::clone(fetcher), priority)
}

pub fn config(max_entries: usize, workers: usize) -> PrefetchConfig {
    PrefetchConfig {
        max_entries,
        workers: Some(workers),
    }
}

pub fn mem_prefetcher(lister: MemLister, max_entries: usize, workers: usize) -> Prefetcher {
    Prefetcher::with_lister(
        &config(max_entries, workers),
        tokio::runtime::Handle::current(),
        lister,
    )
}

/// Sorted record paths, for order-independent comparisons.
pub fn paths<R: AsRef<TestRecord>>(records: &[R]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = records.iter().map(|r| r.as_ref().path.clone()).collect();
    paths.sort();
    paths
}

/// Poll `condition` until it holds, or panic after two seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting until {what}");
}
