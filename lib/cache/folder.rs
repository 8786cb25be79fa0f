//! Per-directory record container with completion signalling.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Callback fired once a folder holds every expected entry.
pub type Listener<R> = Box<dyn FnOnce(Vec<Arc<R>>) + Send>;

/// Errors returned when adding to a [`FolderCache`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FolderCacheError {
    /// More distinct entries arrived than the directory listing predicted.
    #[error("folder expected {expected} entries, refusing entry number {attempted}")]
    CapacityExceeded {
        /// Entry count taken from the listing when the folder was created.
        expected: usize,
        /// The entry count the rejected insert would have produced.
        attempted: usize,
    },
}

struct FolderState<R> {
    records: FxHashMap<PathBuf, Arc<R>>,
    /// Entries whose fetcher panicked. They occupy a slot so the folder can still complete.
    failures: FxHashMap<PathBuf, String>,
    listeners: Vec<Listener<R>>,
}

impl<R> FolderState<R> {
    fn filled(&self) -> usize {
        self.records.len() + self.failures.len()
    }

    fn holds(&self, entry: &Path) -> bool {
        self.records.contains_key(entry) || self.failures.contains_key(entry)
    }
}

/// Bounded collection of records for one directory.
///
/// The capacity is the entry count of the directory listing taken when the folder was created.
/// Records are keyed by the entry path they describe, so a repeated result for the same entry
/// replaces the previous one instead of using up a slot.
///
/// The folder is complete once every slot is filled. At that point each registered listener is
/// invoked exactly once, on the thread that filled the last slot, and then dropped.
pub struct FolderCache<R> {
    expected: usize,
    state: Mutex<FolderState<R>>,
}

impl<R> std::fmt::Debug for FolderCache<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FolderCache")
            .field("expected", &self.expected)
            .field("records", &state.records.len())
            .field("failures", &state.failures.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl<R> FolderCache<R> {
    /// Creates an empty folder expecting `expected` entries.
    ///
    /// A folder expecting zero entries is complete from the start.
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            state: Mutex::new(FolderState {
                records: FxHashMap::default(),
                failures: FxHashMap::default(),
                listeners: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FolderState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry count this folder was sized for.
    #[must_use]
    pub fn expected_count(&self) -> usize {
        self.expected
    }

    /// Number of filled slots, counting failed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().filled()
    }

    /// Returns `true` if no slot has been filled yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once every expected entry has been filled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().filled() == self.expected
    }

    /// Returns a copy of the records currently held, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<R>> {
        self.lock().records.values().cloned().collect()
    }

    /// Completion flag and record snapshot, read under a single lock.
    #[must_use]
    pub fn status(&self) -> (bool, Vec<Arc<R>>) {
        let state = self.lock();
        (
            state.filled() == self.expected,
            state.records.values().cloned().collect(),
        )
    }

    /// Returns `true` if `entry` already filled a slot, as a record or as a failure.
    #[must_use]
    pub fn holds(&self, entry: &Path) -> bool {
        self.lock().holds(entry)
    }

    /// Returns the entries whose fetch panicked, with the panic message.
    #[must_use]
    pub fn failures(&self) -> Vec<(PathBuf, String)> {
        self.lock()
            .failures
            .iter()
            .map(|(path, reason)| (path.clone(), reason.clone()))
            .collect()
    }

    /// Store the record fetched for `entry`.
    ///
    /// Returns `Ok(true)` if this insert completed the folder (listeners have fired by the time
    /// this returns).
    pub fn add(&self, entry: PathBuf, record: Arc<R>) -> Result<bool, FolderCacheError> {
        self.fill(entry, |state, entry| {
            state.failures.remove(&entry);
            state.records.insert(entry, record);
        })
    }

    /// Mark `entry` as failed with `reason`, filling its slot.
    ///
    /// A failure never replaces a record that already arrived for the same entry.
    pub fn add_failure(&self, entry: PathBuf, reason: String) -> Result<bool, FolderCacheError> {
        self.fill(entry, |state, entry| {
            if !state.records.contains_key(&entry) {
                state.failures.insert(entry, reason);
            }
        })
    }

    fn fill(
        &self,
        entry: PathBuf,
        write: impl FnOnce(&mut FolderState<R>, PathBuf),
    ) -> Result<bool, FolderCacheError> {
        let mut state = self.lock();
        let was_complete = state.filled() == self.expected;
        if !state.holds(&entry) && state.filled() + 1 > self.expected {
            return Err(FolderCacheError::CapacityExceeded {
                expected: self.expected,
                attempted: state.filled() + 1,
            });
        }
        write(&mut state, entry);

        if was_complete || state.filled() != self.expected {
            return Ok(false);
        }
        let listeners = std::mem::take(&mut state.listeners);
        let records: Vec<Arc<R>> = state.records.values().cloned().collect();
        drop(state);

        // Listeners run outside the lock so they may read this folder again.
        for listener in listeners {
            listener(records.clone());
        }
        Ok(true)
    }

    /// Register `listener` to receive the records once the folder is complete.
    ///
    /// If the folder is already complete the listener runs immediately, on the calling thread.
    pub fn set_listener(&self, listener: Listener<R>) {
        let mut state = self.lock();
        if state.filled() == self.expected {
            let records: Vec<Arc<R>> = state.records.values().cloned().collect();
            drop(state);
            listener(records);
        } else {
            state.listeners.push(listener);
        }
    }
}
