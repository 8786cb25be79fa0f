//! Prefetcher tuning knobs.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// Default number of folders kept per record type before eviction.
pub const DEFAULT_MAX_ENTRIES: usize = 40_000;

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

/// Settings for a [`Prefetcher`](crate::prefetcher::Prefetcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PrefetchConfig {
    /// Maximum number of folders cached per record type. Exceeding it evicts the least recently
    /// touched quarter.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Number of concurrent background fetches. Uses half the hardware threads if not specified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            workers: None,
        }
    }
}

impl PrefetchConfig {
    /// Resolved worker count: the configured value, or half the available parallelism rounded
    /// up. Never zero.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map_or(1, NonZeroUsize::get)
                    .div_ceil(2)
            })
            .max(1)
    }

    /// Validate the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` with one message per problem otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_entries < 4 {
            errors.push(format!(
                "max-entries must be at least 4, got {}.",
                self.max_entries
            ));
        }

        match self.workers {
            Some(0) => errors.push("workers must be at least 1.".to_owned()),
            Some(workers) if workers > Semaphore::MAX_PERMITS => errors.push(format!(
                "workers must be at most {}, got {workers}.",
                Semaphore::MAX_PERMITS
            )),
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
