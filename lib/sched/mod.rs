//! Fetch task scheduling.

/// Bounded worker pool and drain loop.
pub mod pool;
/// Deduplicating priority queue.
pub mod queue;
/// Fetch tasks and their priority tiers.
pub mod task;

pub use pool::Scheduler;
pub use queue::{Admission, TaskQueue};
pub use task::{PendingTask, Priority, TaskError};
