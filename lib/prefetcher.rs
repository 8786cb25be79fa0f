//! Public entry point: prefetch directories, read the cache, wait for results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cache::registry::{CacheRegistry, TypeTable};
use crate::config::PrefetchConfig;
use crate::expand::{DirectoryExpander, ExpandReport, ExpandScope};
use crate::listing::{FsLister, Lister};
use crate::record::{Fetcher, Record};
use crate::sched::pool::Scheduler;
use crate::sched::task::fetch_guarded;

/// What [`FolderPrefetcher::peek`] found in the cache.
#[derive(Debug, Clone)]
pub struct Cached<R> {
    /// `true` if every entry of the directory has been fetched.
    pub complete: bool,
    /// Records fetched so far, in no particular order.
    pub records: Vec<Arc<R>>,
}

/// Shared prefetching state: one cache registry, one scheduler, one lister.
///
/// Use [`for_records`](Self::for_records) to get a handle for a specific record type. Every
/// handle created from the same `Prefetcher` shares its cache and worker pool.
#[derive(Clone)]
pub struct Prefetcher {
    registry: Arc<CacheRegistry>,
    scheduler: Scheduler,
    lister: Arc<dyn Lister>,
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Prefetcher {
    /// Creates a prefetcher that lists directories through [`std::fs`] and spawns onto `handle`.
    #[must_use]
    pub fn new(config: &PrefetchConfig, handle: Handle) -> Self {
        Self::with_lister(config, handle, FsLister)
    }

    /// Creates a prefetcher with a custom listing collaborator.
    #[must_use]
    pub fn with_lister(config: &PrefetchConfig, handle: Handle, lister: impl Lister) -> Self {
        let workers = config.worker_count();
        debug!(max_entries = config.max_entries, workers, "creating prefetcher");
        Self {
            registry: Arc::new(CacheRegistry::from_config(config)),
            scheduler: Scheduler::new(handle, workers),
            lister: Arc::new(lister),
        }
    }

    /// Returns a handle that caches records of type `R`, produced by `fetcher`.
    ///
    /// Handles for the same `R` share one table, whichever fetcher they were created with.
    pub fn for_records<R: Record>(
        &self,
        fetcher: impl Fn(&Path) -> R + Send + Sync + 'static,
    ) -> FolderPrefetcher<R> {
        let fetcher: Fetcher<R> = Arc::new(fetcher);
        FolderPrefetcher {
            expander: DirectoryExpander::new(
                self.registry.ensure_type::<R>(),
                self.scheduler.clone(),
                Arc::clone(&self.lister),
                fetcher,
            ),
            registry: Arc::clone(&self.registry),
        }
    }

    /// The cache registry shared by every handle.
    #[must_use]
    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    /// The scheduler shared by every handle.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Cancel queued work and drop every cached folder of every record type.
    ///
    /// Fetches already running finish, but their results are discarded. Returns the number of
    /// folders dropped.
    pub fn clear(&self) -> usize {
        clear_registry(&self.registry)
    }

    /// Every record of every type currently cached. Meant for diagnostics.
    #[must_use]
    pub fn all_records(&self) -> Vec<Arc<dyn Record>> {
        self.registry.all_records()
    }
}

fn clear_registry(registry: &CacheRegistry) -> usize {
    let cancelled = registry.cancel_all();
    let dropped = registry.clear_all();
    debug!(cancelled, dropped, "cleared prefetch cache");
    dropped
}

/// Typed prefetching handle for records of type `R`.
///
/// Cheap to clone. Paths are made absolute against the current directory before use, without
/// resolving symlinks.
pub struct FolderPrefetcher<R> {
    expander: DirectoryExpander<R>,
    registry: Arc<CacheRegistry>,
}

impl<R> Clone for FolderPrefetcher<R> {
    fn clone(&self) -> Self {
        Self {
            expander: self.expander.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R> std::fmt::Debug for FolderPrefetcher<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderPrefetcher")
            .field("expander", &self.expander)
            .finish_non_exhaustive()
    }
}

impl<R: Record> FolderPrefetcher<R> {
    /// Table holding this record type's folders.
    #[must_use]
    pub fn table(&self) -> &Arc<TypeTable<R>> {
        self.expander.table()
    }

    /// Prefetch only `dir` itself.
    pub fn preload_folder(&self, dir: impl AsRef<Path>) -> JoinHandle<ExpandReport> {
        self.spawn_expand(dir.as_ref(), ExpandScope::Folder)
    }

    /// Prefetch `dir` and its subdirectories. Returns without waiting for any fetch.
    pub fn preload(&self, dir: impl AsRef<Path>) -> JoinHandle<ExpandReport> {
        self.spawn_expand(dir.as_ref(), ExpandScope::Children)
    }

    /// Prefetch `dir`, its subdirectories and its parent. Returns without waiting for any fetch.
    pub fn preload_wide(&self, dir: impl AsRef<Path>) -> JoinHandle<ExpandReport> {
        self.spawn_expand(dir.as_ref(), ExpandScope::Neighborhood)
    }

    fn spawn_expand(&self, dir: &Path, scope: ExpandScope) -> JoinHandle<ExpandReport> {
        let dir = normalize(dir);
        let expander = self.expander.clone();
        self.expander
            .scheduler()
            .handle()
            .spawn_blocking(move || expander.expand(&dir, scope))
    }

    /// Current cache contents for `dir`, without waiting or scheduling anything.
    #[must_use]
    pub fn peek(&self, dir: impl AsRef<Path>) -> Option<Cached<R>> {
        let folder = self.table().get(&normalize(dir.as_ref()))?;
        let (complete, records) = folder.status();
        Some(Cached { complete, records })
    }

    /// Records for every entry of `dir`.
    ///
    /// A complete folder is returned at once and an incomplete one is awaited. If `dir` was never
    /// prefetched, or its folder is dropped before it completes, the directory is listed and
    /// fetched inline without touching the cache. Entries whose fetcher panicked are left out.
    pub async fn load(&self, dir: impl AsRef<Path>) -> Vec<Arc<R>> {
        let dir = normalize(dir.as_ref());

        if let Some(folder) = self.table().get(&dir) {
            let (tx, rx) = oneshot::channel();
            folder.set_listener(Box::new(move |records: Vec<Arc<R>>| {
                let _ = tx.send(records);
            }));
            // Holding the folder here would keep an evicted folder, and this waiter, alive forever.
            drop(folder);
            match rx.await {
                Ok(records) => return records,
                Err(_) => debug!(dir = %dir.display(), "folder dropped before completing"),
            }
        }

        self.load_direct(dir).await
    }

    /// Like [`load`](Self::load), but hands the records to `on_result` from a runtime task.
    pub fn load_with(
        &self,
        dir: impl AsRef<Path>,
        on_result: impl FnOnce(Vec<Arc<R>>) + Send + 'static,
    ) -> JoinHandle<()> {
        let this = self.clone();
        let dir = dir.as_ref().to_path_buf();
        self.expander
            .scheduler()
            .handle()
            .spawn(async move { on_result(this.load(dir).await) })
    }

    async fn load_direct(&self, dir: PathBuf) -> Vec<Arc<R>> {
        let lister = Arc::clone(self.expander.lister());
        let fetcher = Arc::clone(self.expander.fetcher());
        let listed = dir.clone();
        let handle = self.expander.scheduler().handle().spawn_blocking(move || {
            let names = lister.list_names(&listed).unwrap_or_else(|err| {
                debug!(%err, "treating unlistable directory as empty");
                Vec::new()
            });
            names
                .into_iter()
                .filter_map(|name| {
                    let entry = listed.join(name);
                    match fetch_guarded(fetcher.as_ref(), &entry) {
                        Ok(record) => Some(Arc::new(record)),
                        Err(reason) => {
                            warn!(entry = %entry.display(), %reason, "fetcher panicked");
                            None
                        }
                    }
                })
                .collect::<Vec<_>>()
        });
        handle.await.unwrap_or_else(|err| {
            error!(dir = %dir.display(), %err, "direct load failed");
            Vec::new()
        })
    }

    /// Cancel queued work and drop every cached folder of every record type.
    pub fn clear(&self) -> usize {
        clear_registry(&self.registry)
    }

    /// Returns `true` if no fetch for this record type is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.table().queue().is_idle()
    }
}

fn normalize(dir: &Path) -> PathBuf {
    std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf())
}
