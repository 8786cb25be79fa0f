//! Cache eviction bookkeeping.

/// Touch-ordered key queue used for capacity eviction.
pub mod recency;

pub use recency::{RecencyError, RecencyQueue};
