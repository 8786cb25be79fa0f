//! Per-record-type tables of folder caches.

use std::any::{Any, TypeId};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error};

use crate::cache::eviction::RecencyQueue;
use crate::cache::folder::FolderCache;
use crate::config::{DEFAULT_MAX_ENTRIES, PrefetchConfig};
use crate::record::Record;
use crate::sched::queue::TaskQueue;

/// Result of [`TypeTable::put`].
#[derive(Debug)]
pub struct Placement<R> {
    /// The folder now stored under the requested path.
    pub folder: Arc<FolderCache<R>>,
    /// `true` if this call created the folder, `false` if it already existed.
    pub created: bool,
}

struct TableState<R> {
    folders: FxHashMap<PathBuf, Arc<FolderCache<R>>>,
    recency: RecencyQueue<PathBuf>,
}

/// Folder caches for a single record type, with their eviction order and task queue.
///
/// The folder map and the recency queue sit behind one lock. It is only ever held for a single
/// map operation, never while a directory is listed or an entry is fetched.
pub struct TypeTable<R> {
    state: Mutex<TableState<R>>,
    queue: Arc<TaskQueue<R>>,
    max_entries: usize,
}

impl<R> std::fmt::Debug for TypeTable<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeTable")
            .field("folders", &self.state.lock().folders.len())
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl<R: Record> TypeTable<R> {
    /// Creates an empty table that holds at most `max_entries` folders.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(TableState {
                folders: FxHashMap::default(),
                recency: RecencyQueue::new(),
            }),
            queue: Arc::new(TaskQueue::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Maximum number of folders kept before eviction kicks in.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Task queue feeding this table.
    #[must_use]
    pub fn queue(&self) -> &Arc<TaskQueue<R>> {
        &self.queue
    }

    /// Returns the folder cached for `dir`, if any. Does not count as a touch.
    #[must_use]
    pub fn get(&self, dir: &Path) -> Option<Arc<FolderCache<R>>> {
        self.state.lock().folders.get(dir).cloned()
    }

    /// Returns the folder for `dir`, creating it with room for `expected` entries if absent.
    ///
    /// Creating a folder counts as a touch. If the table then holds more than
    /// [`max_entries`](Self::max_entries) folders, the least recently touched quarter is evicted
    /// before returning. An existing folder is returned as is, whatever its capacity.
    pub fn put(&self, dir: &Path, expected: usize) -> Placement<R> {
        let mut state = self.state.lock();
        if let Some(folder) = state.folders.get(dir) {
            return Placement {
                folder: Arc::clone(folder),
                created: false,
            };
        }

        let folder = Arc::new(FolderCache::new(expected));
        state.folders.insert(dir.to_path_buf(), Arc::clone(&folder));
        state.recency.touch(dir.to_path_buf());

        if state.folders.len() > self.max_entries {
            let batch = (self.max_entries / 4).max(1);
            let mut evicted = 0usize;
            for _ in 0..batch {
                match state.recency.pop_oldest() {
                    Ok(oldest) => {
                        state.folders.remove(&oldest);
                        evicted += 1;
                    }
                    Err(err) => {
                        error!(%err, folders = state.folders.len(), "recency queue out of sync");
                        break;
                    }
                }
            }
            debug!(evicted, remaining = state.folders.len(), "evicted folders");
        }

        Placement {
            folder,
            created: true,
        }
    }

    /// Mark `dir` as recently used. Returns `false` if no folder is cached for it.
    pub fn touch(&self, dir: &Path) -> bool {
        let mut state = self.state.lock();
        if !state.folders.contains_key(dir) {
            return false;
        }
        state.recency.touch(dir.to_path_buf());
        true
    }

    /// Forget every folder. Queued and running tasks are left alone. Returns how many folders
    /// were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.folders.len();
        state.folders.clear();
        state.recency.clear();
        dropped
    }

    /// Number of cached folders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().folders.len()
    }

    /// Returns `true` if no folder is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record held by every folder in this table.
    #[must_use]
    pub fn records(&self) -> Vec<Arc<R>> {
        let folders: Vec<_> = self.state.lock().folders.values().cloned().collect();
        folders.iter().flat_map(|folder| folder.snapshot()).collect()
    }
}

/// Type-erased view used when an operation spans every record type.
trait ErasedTable: Send + Sync {
    fn clear(&self) -> usize;
    fn cancel_pending(&self) -> usize;
    fn records(&self) -> Vec<Arc<dyn Record>>;
    fn folder_count(&self) -> usize;
}

impl<R: Record> ErasedTable for TypeTable<R> {
    fn clear(&self) -> usize {
        TypeTable::clear(self)
    }

    fn cancel_pending(&self) -> usize {
        self.queue.cancel_all()
    }

    fn records(&self) -> Vec<Arc<dyn Record>> {
        TypeTable::records(self)
            .into_iter()
            .map(|record| record as Arc<dyn Record>)
            .collect()
    }

    fn folder_count(&self) -> usize {
        self.len()
    }
}

/// Both views point at the same table.
#[derive(Clone)]
struct TableSlot {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedTable>,
}

/// Owner of every [`TypeTable`], keyed by the record type's [`TypeId`].
///
/// Tables are created on first use, so callers never register record types up front. Each table
/// gets the same capacity but evicts independently.
pub struct CacheRegistry {
    tables: scc::HashMap<TypeId, TableSlot>,
    max_entries: usize,
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("types", &self.tables.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl CacheRegistry {
    /// Creates an empty registry whose tables each hold up to `max_entries` folders.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            tables: scc::HashMap::new(),
            max_entries,
        }
    }

    /// Creates an empty registry sized from `config`.
    #[must_use]
    pub fn from_config(config: &PrefetchConfig) -> Self {
        Self::new(config.max_entries)
    }

    /// Per-type folder capacity.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the table for `R`, creating it on first use.
    pub fn ensure_type<R: Record>(&self) -> Arc<TypeTable<R>> {
        let id = TypeId::of::<R>();
        let slot = match self.tables.read_sync(&id, |_, slot| slot.clone()) {
            Some(slot) => slot,
            None => match self.tables.entry_sync(id) {
                scc::hash_map::Entry::Occupied(occ) => occ.get().clone(),
                scc::hash_map::Entry::Vacant(vac) => {
                    let table = Arc::new(TypeTable::<R>::new(self.max_entries));
                    let slot = TableSlot {
                        typed: Arc::clone(&table) as Arc<dyn Any + Send + Sync>,
                        erased: table,
                    };
                    vac.insert_entry(slot.clone());
                    debug!(record = std::any::type_name::<R>(), "created type table");
                    slot
                }
            },
        };
        slot.typed
            .downcast::<TypeTable<R>>()
            .unwrap_or_else(|_| unreachable!("tables are keyed by the TypeId of their record type"))
    }

    /// Returns the table for `R` if it has been created.
    #[must_use]
    pub fn table<R: Record>(&self) -> Option<Arc<TypeTable<R>>> {
        self.tables
            .read_sync(&TypeId::of::<R>(), |_, slot| Arc::clone(&slot.typed))?
            .downcast::<TypeTable<R>>()
            .ok()
    }

    /// Returns the `R` folder cached for `dir`, if any.
    #[must_use]
    pub fn get<R: Record>(&self, dir: &Path) -> Option<Arc<FolderCache<R>>> {
        self.table::<R>()?.get(dir)
    }

    /// Returns the `R` folder for `dir`, creating it with room for `expected` entries if absent.
    pub fn put<R: Record>(&self, dir: &Path, expected: usize) -> Arc<FolderCache<R>> {
        self.ensure_type::<R>().put(dir, expected).folder
    }

    /// Forget every `R` folder. Tasks already queued for `R` are not cancelled.
    pub fn clear<R: Record>(&self) -> usize {
        self.table::<R>().map_or(0, |table| table.clear())
    }

    /// Forget every folder of every record type. Returns how many folders were dropped.
    pub fn clear_all(&self) -> usize {
        self.erased_tables().iter().map(|table| table.clear()).sum()
    }

    /// Cancel queued tasks of every record type. Returns how many queued tasks were dropped.
    ///
    /// Folders waiting on those tasks stay incomplete, so this is only paired with
    /// [`clear_all`](Self::clear_all).
    pub(crate) fn cancel_all(&self) -> usize {
        self.erased_tables()
            .iter()
            .map(|table| table.cancel_pending())
            .sum()
    }

    /// Number of cached folders across every record type.
    #[must_use]
    pub fn folder_count(&self) -> usize {
        self.erased_tables()
            .iter()
            .map(|table| table.folder_count())
            .sum()
    }

    /// Every record of every type currently cached. Meant for diagnostics.
    #[must_use]
    pub fn all_records(&self) -> Vec<Arc<dyn Record>> {
        self.erased_tables()
            .iter()
            .flat_map(|table| table.records())
            .collect()
    }

    fn erased_tables(&self) -> Vec<Arc<dyn ErasedTable>> {
        let mut tables = Vec::with_capacity(self.tables.len());
        self.tables.iter_sync(|_, slot| {
            tables.push(Arc::clone(&slot.erased));
            true
        });
        tables
    }
}
