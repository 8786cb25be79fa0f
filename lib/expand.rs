//! Decides which directories to prefetch around a navigation target.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::folder::FolderCache;
use crate::cache::registry::TypeTable;
use crate::listing::Lister;
use crate::record::{Fetcher, Record};
use crate::sched::pool::Scheduler;
use crate::sched::task::{PendingTask, Priority};

/// How far around the target directory an expansion reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpandScope {
    /// Only the target directory.
    Folder,
    /// The target and each of its subdirectories.
    Children,
    /// The target, its subdirectories, and its parent.
    Neighborhood,
}

/// Counters describing what one expansion did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandReport {
    /// Folders that were not cached yet and got created.
    pub folders_created: usize,
    /// Folders that were already cached and only got touched.
    pub folders_retouched: usize,
    /// Fetch tasks handed to the scheduler, not counting coalesced ones.
    pub tasks_submitted: usize,
}

/// Turns "the user is looking at this directory" into prioritized fetch tasks.
///
/// The target directory is fetched at [`Priority::Now`], its subdirectories at
/// [`Priority::Future`] and its parent at [`Priority::Possibly`]. A directory that already has a
/// folder cache is only re-touched, unless it is opened at [`Priority::Now`] while still
/// incomplete: then its missing entries are resubmitted at that tier. Each directory is listed
/// before the table lock is taken.
pub struct DirectoryExpander<R> {
    table: Arc<TypeTable<R>>,
    scheduler: Scheduler,
    lister: Arc<dyn Lister>,
    fetcher: Fetcher<R>,
}

impl<R> Clone for DirectoryExpander<R> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            scheduler: self.scheduler.clone(),
            lister: Arc::clone(&self.lister),
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

impl<R> std::fmt::Debug for DirectoryExpander<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryExpander")
            .field("table", &self.table)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl<R: Record> DirectoryExpander<R> {
    /// Creates an expander feeding `table` through `scheduler`.
    #[must_use]
    pub fn new(
        table: Arc<TypeTable<R>>,
        scheduler: Scheduler,
        lister: Arc<dyn Lister>,
        fetcher: Fetcher<R>,
    ) -> Self {
        Self {
            table,
            scheduler,
            lister,
            fetcher,
        }
    }

    /// Table this expander writes into.
    #[must_use]
    pub fn table(&self) -> &Arc<TypeTable<R>> {
        &self.table
    }

    /// Listing collaborator.
    #[must_use]
    pub fn lister(&self) -> &Arc<dyn Lister> {
        &self.lister
    }

    /// Fetcher used for every entry.
    #[must_use]
    pub fn fetcher(&self) -> &Fetcher<R> {
        &self.fetcher
    }

    /// Scheduler the tasks are submitted to.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Schedule fetches for `dir` and, depending on `scope`, its neighbours.
    ///
    /// Blocks while directories are listed. Starts the drain loop if anything was submitted.
    pub fn expand(&self, dir: &Path, scope: ExpandScope) -> ExpandReport {
        let mut report = ExpandReport::default();

        self.schedule_folder(dir, Priority::Now, &mut report);

        if scope != ExpandScope::Folder {
            let children = self
                .lister
                .list_subdirectory_names(dir)
                .unwrap_or_else(|err| {
                    debug!(%err, "no subdirectories to expand");
                    Vec::new()
                });
            for child in children {
                self.schedule_folder(&dir.join(child), Priority::Future, &mut report);
            }
        }

        if scope == ExpandScope::Neighborhood
            && let Some(parent) = dir.parent()
        {
            self.schedule_folder(parent, Priority::Possibly, &mut report);
        }

        if report.tasks_submitted > 0 {
            self.scheduler.drain(self.table.queue());
        }
        trace!(
            dir = %dir.display(),
            ?scope,
            created = report.folders_created,
            retouched = report.folders_retouched,
            submitted = report.tasks_submitted,
            "expanded"
        );
        report
    }

    fn schedule_folder(&self, dir: &Path, priority: Priority, report: &mut ExpandReport) {
        if self.table.touch(dir) {
            report.folders_retouched += 1;
            if priority.is_eager()
                && let Some(folder) = self.table.get(dir)
            {
                self.escalate(dir, &folder, report);
            }
            return;
        }

        let names = self.lister.list_names(dir).unwrap_or_else(|err| {
            debug!(%err, "treating unlistable directory as empty");
            Vec::new()
        });

        // Another expansion may have created the folder while we were listing.
        let placement = self.table.put(dir, names.len());
        if !placement.created {
            report.folders_retouched += 1;
            if priority.is_eager() {
                self.escalate(dir, &placement.folder, report);
            }
            return;
        }
        report.folders_created += 1;

        for name in names {
            self.submit(dir.join(name), &placement.folder, priority, report);
        }
    }

    /// Resubmit every entry `folder` is still missing at [`Priority::Now`].
    ///
    /// Queued lazy tasks for those entries are superseded. Fetches already running coalesce.
    fn escalate(&self, dir: &Path, folder: &Arc<FolderCache<R>>, report: &mut ExpandReport) {
        if folder.is_complete() {
            return;
        }
        let names = match self.lister.list_names(dir) {
            Ok(names) => names,
            Err(err) => {
                debug!(%err, "cannot relist incomplete folder");
                return;
            }
        };
        let before = report.tasks_submitted;
        for name in names {
            let target = dir.join(name);
            if !folder.holds(&target) {
                self.submit(target, folder, Priority::Now, report);
            }
        }
        debug!(
            dir = %dir.display(),
            escalated = report.tasks_submitted - before,
            "raised incomplete folder to now"
        );
    }

    fn submit(
        &self,
        target: PathBuf,
        folder: &Arc<FolderCache<R>>,
        priority: Priority,
        report: &mut ExpandReport,
    ) {
        let task = PendingTask::new(target, folder, Arc::clone(&self.fetcher), priority);
        if self.scheduler.submit(self.table.queue(), task) {
            report.tasks_submitted += 1;
        }
    }
}
