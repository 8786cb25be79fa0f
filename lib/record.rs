//! Plug-in points supplied by callers: the record type and the function that builds it.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// Metadata describing a single filesystem entry.
///
/// The cache never inspects a record. It only stores it, hands out shared references to it,
/// and groups it under the directory it was fetched for. Any `Debug + Send + Sync` type
/// qualifies, so records can be plain structs or enums carrying a per-entry error variant.
pub trait Record: Debug + Send + Sync + 'static {}

impl<T: Debug + Send + Sync + 'static> Record for T {}

/// Builds the record for one entry path.
///
/// Fetchers may block on I/O for an arbitrary amount of time and are called concurrently from
/// the blocking pool, so they must be thread safe.
pub type Fetcher<R> = Arc<dyn Fn(&Path) -> R + Send + Sync>;
