//! preload-fs shared library.
//!
//! Speculatively fetches per-entry metadata for the directory a user is looking at and for the
//! directories they are likely to open next, so that navigating into them is served from memory.

/// Folder caches, their per-type registry and eviction order.
pub mod cache;
pub mod config;
/// Prefetch policy around a navigation target.
pub mod expand;
pub mod listing;
pub mod prefetcher;
pub mod record;
/// Fetch task queueing and execution.
pub mod sched;

pub use config::PrefetchConfig;
pub use listing::{FsLister, Lister, ListingError};
pub use prefetcher::{Cached, FolderPrefetcher, Prefetcher};
pub use record::{Fetcher, Record};
pub use sched::task::Priority;
