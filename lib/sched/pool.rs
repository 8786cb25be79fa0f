//! Bounded worker pool that drains [`TaskQueue`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, trace, warn};

use crate::record::Record;
use crate::sched::queue::{Admission, TaskQueue};
use crate::sched::task::{PendingTask, TaskError};

/// Counts eager fetches in flight. Lazy work waits until it drops to zero.
#[derive(Debug, Default)]
struct EagerGate {
    inflight: AtomicUsize,
    idle: Notify,
}

impl EagerGate {
    fn enter(&self) {
        self.inflight.fetch_add(1, Ordering::AcqRel);
    }

    fn exit(&self) {
        if self.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            // Register before checking so an exit between the check and the await still wakes us.
            let notified = self.idle.notified();
            if self.inflight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Runs fetch tasks on the blocking thread pool of a tokio runtime.
///
/// [`Priority::Now`](crate::sched::task::Priority::Now) tasks start on submission. Everything
/// else waits in its [`TaskQueue`] until a drain loop pops it, and at most `workers` of those
/// run at once. A drain loop does not start new lazy work while any eager task is in flight, so
/// speculative prefetching never competes with a fetch the user is waiting on.
///
/// One scheduler is shared by every record type. Each type's queue gets its own drain loop.
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
    workers: usize,
    permits: Arc<Semaphore>,
    eager: Arc<EagerGate>,
}

impl Scheduler {
    /// Creates a scheduler that spawns onto `handle` and runs up to `workers` lazy fetches
    /// concurrently. `workers` is clamped to `1..=Semaphore::MAX_PERMITS`.
    #[must_use]
    pub fn new(handle: Handle, workers: usize) -> Self {
        let workers = workers.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            handle,
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            eager: Arc::new(EagerGate::default()),
        }
    }

    /// Concurrency bound for lazy fetches.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runtime handle the scheduler spawns onto.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Number of eager fetches currently running.
    #[must_use]
    pub fn eager_in_flight(&self) -> usize {
        self.eager.inflight.load(Ordering::Acquire)
    }

    /// Submit `task` to `queue`.
    ///
    /// Eager tasks are dispatched right away. Lazy ones only run after [`drain`](Self::drain) is
    /// called. Returns `false` if the task was coalesced into a fetch already running for the
    /// same entry.
    pub fn submit<R: Record>(&self, queue: &Arc<TaskQueue<R>>, task: PendingTask<R>) -> bool {
        let eager = task.priority().is_eager();
        match queue.admit(task, eager) {
            Admission::Coalesced => false,
            Admission::Queued { .. } => true,
            Admission::Dispatch(task) => {
                self.eager.enter();
                let queue = Arc::clone(queue);
                let gate = Arc::clone(&self.eager);
                self.handle.spawn_blocking(move || {
                    execute(&queue, task);
                    gate.exit();
                });
                true
            }
        }
    }

    /// Start draining `queue` unless a drain loop for it is already running.
    pub fn drain<R: Record>(&self, queue: &Arc<TaskQueue<R>>) {
        if !queue.try_begin_drain() {
            trace!("drain already running");
            return;
        }
        let queue = Arc::clone(queue);
        let this = self.clone();
        self.handle.spawn(async move { this.drain_loop(queue).await });
    }

    async fn drain_loop<R: Record>(self, queue: Arc<TaskQueue<R>>) {
        debug!(queued = queue.queued_len(), "drain started");
        loop {
            self.eager.wait_idle().await;
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                queue.end_drain();
                return;
            };
            let Some(task) = queue.pop() else {
                drop(permit);
                queue.end_drain();
                // A submission may have slipped in between the empty pop and releasing the claim.
                if queue.queued_len() == 0 || !queue.try_begin_drain() {
                    break;
                }
                continue;
            };
            let worker_queue = Arc::clone(&queue);
            self.handle.spawn_blocking(move || {
                let _permit = permit;
                execute(&worker_queue, task);
            });
        }
        debug!("drain finished");
    }
}

fn execute<R: Record>(queue: &TaskQueue<R>, task: PendingTask<R>) {
    let id = task.id();
    let target = task.target().to_path_buf();

    if task.is_cancelled() {
        trace!(entry = %target.display(), "skipping cancelled task");
        queue.finish(&target, id);
        return;
    }

    trace!(entry = %target.display(), priority = ?task.priority(), "fetching");
    match task.run() {
        Ok(true) => debug!(folder = ?target.parent(), "folder complete"),
        Ok(false) => {}
        Err(err @ TaskError::OrphanedResult { .. }) => warn!(%err, "dropping fetched record"),
        Err(err @ TaskError::Capacity { .. }) => error!(%err, "dropping fetched record"),
    }
    queue.finish(&target, id);
}
