//! A single unit of fetch work.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use thiserror::Error;
use tracing::error;

use crate::cache::folder::{FolderCache, FolderCacheError};
use crate::record::{Fetcher, Record};

/// Scheduling tier of a [`PendingTask`]. Lower tiers run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// The user is waiting on this entry right now. Dispatched on submission.
    Now = 0,
    /// Likely to be needed soon, e.g. a child of the directory being shown.
    Future = 1,
    /// Speculative, e.g. the parent of the directory being shown.
    Possibly = 2,
}

impl Priority {
    /// Returns `true` if tasks of this tier bypass the queue and start immediately.
    #[must_use]
    pub fn is_eager(self) -> bool {
        matches!(self, Self::Now)
    }
}

/// Errors produced while folding a fetched record into its folder.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The target folder was evicted or cleared while the fetch was running.
    #[error("folder {folder} is gone, dropping result for {target}")]
    OrphanedResult {
        /// Entry that was fetched.
        target: PathBuf,
        /// Directory the entry belonged to.
        folder: PathBuf,
    },
    /// The folder refused the result.
    #[error("cannot store result for {target}: {source}")]
    Capacity {
        /// Entry that was fetched.
        target: PathBuf,
        /// Underlying folder error.
        #[source]
        source: FolderCacheError,
    },
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Fetch work for one directory entry, bound to the folder that receives its record.
///
/// Two tasks with the same target path are the same unit of work. The folder is held weakly,
/// so a task never keeps an evicted folder alive.
pub struct PendingTask<R> {
    id: u64,
    target: PathBuf,
    folder: Weak<FolderCache<R>>,
    fetcher: Fetcher<R>,
    priority: Priority,
    cancelled: Arc<AtomicBool>,
}

impl<R> std::fmt::Debug for PendingTask<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<R: Record> PendingTask<R> {
    /// Creates a task that fetches `target` into `folder`.
    #[must_use]
    pub fn new(
        target: PathBuf,
        folder: &Arc<FolderCache<R>>,
        fetcher: Fetcher<R>,
        priority: Priority,
    ) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            target,
            folder: Arc::downgrade(folder),
            fetcher,
            priority,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the fetcher and store its result in the target folder.
    ///
    /// Blocks for as long as the fetcher does. A panicking fetcher fills the entry's slot as a
    /// failure. Returns `Ok(true)` if this result completed the folder. A folder dropped before
    /// or during the fetch yields [`TaskError::OrphanedResult`].
    pub fn run(self) -> Result<bool, TaskError> {
        // Skip the I/O entirely if the folder is already gone.
        if self.folder.strong_count() == 0 {
            return Err(self.into_orphaned());
        }
        let outcome = fetch_guarded(self.fetcher.as_ref(), &self.target);

        let Some(folder) = self.folder.upgrade() else {
            return Err(self.into_orphaned());
        };

        let stored = match outcome {
            Ok(record) => folder.add(self.target.clone(), Arc::new(record)),
            Err(reason) => {
                error!(entry = %self.target.display(), %reason, "fetcher panicked");
                folder.add_failure(self.target.clone(), reason)
            }
        };
        stored.map_err(|source| TaskError::Capacity {
            target: self.target,
            source,
        })
    }
}

impl<R> PendingTask<R> {
    /// Process-unique id of this submission.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Entry path this task fetches. Doubles as the deduplication key.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Scheduling tier.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns `true` if this task was superseded or cancelled before it ran.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Advise the task not to run. Has no effect once the fetch has started.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub(crate) fn folder(&self) -> &Weak<FolderCache<R>> {
        &self.folder
    }

    fn into_orphaned(self) -> TaskError {
        TaskError::OrphanedResult {
            folder: self
                .target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            target: self.target,
        }
    }
}

/// Call `fetcher` on `path`, turning a panic into its message.
pub(crate) fn fetch_guarded<R>(
    fetcher: &(dyn Fn(&Path) -> R + Send + Sync),
    path: &Path,
) -> Result<R, String> {
    std::panic::catch_unwind(AssertUnwindSafe(|| fetcher(path))).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "fetcher panicked with a non-string payload".to_owned()
    }
}
