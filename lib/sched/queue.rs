//! Deduplicating priority queue of fetch tasks.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::cache::folder::FolderCache;
use crate::record::Record;
use crate::sched::task::{PendingTask, Priority};

/// What [`TaskQueue::admit`] did with a submission.
#[derive(Debug)]
pub enum Admission<R> {
    /// Stored until the drain loop reaches it. `superseded` is `true` if it replaced a queued
    /// task for the same entry.
    Queued {
        /// Whether an older queued task for the same entry was cancelled.
        superseded: bool,
    },
    /// The same entry is already being fetched into the same folder, so the submission was
    /// dropped.
    Coalesced,
    /// The task was marked as running and must be executed by the caller right away.
    Dispatch(PendingTask<R>),
}

/// Heap position of a queued task. The task itself lives in `QueueState::queued`.
#[derive(Debug, PartialEq, Eq)]
struct Slot {
    priority: Priority,
    seq: u64,
    key: PathBuf,
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: the lowest tier, then the oldest submission, pops first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct Queued<R> {
    seq: u64,
    task: PendingTask<R>,
}

struct Running<R> {
    id: u64,
    folder: Weak<FolderCache<R>>,
    cancelled: Arc<AtomicBool>,
}

struct QueueState<R> {
    /// May hold stale slots for superseded tasks; they are skipped on pop.
    heap: BinaryHeap<Slot>,
    queued: FxHashMap<PathBuf, Queued<R>>,
    running: FxHashMap<PathBuf, Running<R>>,
    next_seq: u64,
}

/// Pending fetch work for one record type.
///
/// At most one task per entry path is queued at a time: a newer submission cancels and replaces
/// the older one. Tasks pop lowest [`Priority`] first. The queue only orders work. Running it is
/// the job of the [`Scheduler`](crate::sched::pool::Scheduler).
pub struct TaskQueue<R> {
    state: Mutex<QueueState<R>>,
    draining: AtomicBool,
}

impl<R> std::fmt::Debug for TaskQueue<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskQueue")
            .field("queued", &state.queued.len())
            .field("running", &state.running.len())
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .finish()
    }
}

impl<R: Record> Default for TaskQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> TaskQueue<R> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                queued: FxHashMap::default(),
                running: FxHashMap::default(),
                next_seq: 0,
            }),
            draining: AtomicBool::new(false),
        }
    }

    /// Accept a task, deduplicating it against queued and running work.
    ///
    /// With `eager` set, the task skips the heap and comes back as [`Admission::Dispatch`],
    /// already marked as running.
    pub fn admit(&self, task: PendingTask<R>, eager: bool) -> Admission<R> {
        let mut state = self.state.lock();

        if let Some(running) = state.running.get(task.target())
            && !running.cancelled.load(Ordering::Acquire)
            && Weak::ptr_eq(&running.folder, task.folder())
        {
            trace!(entry = %task.target().display(), "coalesced into running fetch");
            return Admission::Coalesced;
        }

        let superseded = match state.queued.remove(task.target()) {
            Some(old) => {
                old.task.cancel();
                trace!(
                    entry = %task.target().display(),
                    old = ?old.task.priority(),
                    new = ?task.priority(),
                    "superseded queued task"
                );
                true
            }
            None => false,
        };

        if eager {
            Self::mark_running(&mut state, &task);
            return Admission::Dispatch(task);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let key = task.target().to_path_buf();
        state.heap.push(Slot {
            priority: task.priority(),
            seq,
            key: key.clone(),
        });
        state.queued.insert(key, Queued { seq, task });
        Admission::Queued { superseded }
    }

    fn mark_running(state: &mut QueueState<R>, task: &PendingTask<R>) {
        state.running.insert(
            task.target().to_path_buf(),
            Running {
                id: task.id(),
                folder: task.folder().clone(),
                cancelled: task.cancel_flag(),
            },
        );
    }

    /// Take the highest-priority queued task and mark it as running.
    pub fn pop(&self) -> Option<PendingTask<R>> {
        let mut state = self.state.lock();
        while let Some(slot) = state.heap.pop() {
            let live = state
                .queued
                .get(&slot.key)
                .is_some_and(|queued| queued.seq == slot.seq);
            if !live {
                continue;
            }
            if let Some(queued) = state.queued.remove(&slot.key) {
                Self::mark_running(&mut state, &queued.task);
                return Some(queued.task);
            }
        }
        None
    }

    /// Record that the task `id` for `target` has finished running.
    pub fn finish(&self, target: &Path, id: u64) {
        let mut state = self.state.lock();
        if state.running.get(target).is_some_and(|r| r.id == id) {
            state.running.remove(target);
        }
    }

    /// Drop every queued task and flag every running one as cancelled.
    ///
    /// Running fetches are not interrupted. Returns the number of queued tasks dropped.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.state.lock();
        state.heap.clear();
        let dropped = state.queued.len();
        for (_, queued) in state.queued.drain() {
            queued.task.cancel();
        }
        for running in state.running.values() {
            running.cancelled.store(true, Ordering::Release);
        }
        dropped
    }

    /// Number of tasks waiting to be popped.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Number of tasks currently marked as running.
    #[must_use]
    pub fn running_len(&self) -> usize {
        self.state.lock().running.len()
    }

    /// Returns `true` if nothing is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.queued.is_empty() && state.running.is_empty()
    }

    /// Claim the right to run the drain loop. Returns `false` if a loop is already running.
    pub fn try_begin_drain(&self) -> bool {
        !self.draining.swap(true, Ordering::AcqRel)
    }

    /// Release the drain loop claim.
    pub fn end_drain(&self) {
        self.draining.store(false, Ordering::Release);
    }

    /// Returns `true` while a drain loop holds the claim.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}
