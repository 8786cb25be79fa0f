//! Recency ordering for cache keys.

use std::hash::Hash;

use hashlink::LinkedHashMap;
use thiserror::Error;

/// Errors returned by [`RecencyQueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecencyError {
    /// Tried to pop from a queue with no keys in it.
    #[error("recency queue is empty")]
    Empty,
}

/// Orders keys by the last time they were touched.
///
/// Backed by a [`LinkedHashMap`], so touching an existing key moves it to the newest end in O(1)
/// instead of scanning the queue. A key is present at most once.
///
/// Not thread-safe on its own. [`TypeTable`](crate::cache::registry::TypeTable) keeps it
/// behind the same lock as the folder map it orders.
#[derive(Debug)]
pub struct RecencyQueue<K> {
    /// Front is the oldest touch, back is the newest.
    ordered_keys: LinkedHashMap<K, ()>,
}

impl<K: Eq + Hash> Default for RecencyQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> RecencyQueue<K> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ordered_keys: LinkedHashMap::new(),
        }
    }

    /// Mark `key` as the most recently touched key, inserting it if absent.
    pub fn touch(&mut self, key: K) {
        self.ordered_keys.remove(&key);
        self.ordered_keys.insert(key, ());
    }

    /// Remove and return the least recently touched key.
    pub fn pop_oldest(&mut self) -> Result<K, RecencyError> {
        self.ordered_keys
            .pop_front()
            .map(|(key, ())| key)
            .ok_or(RecencyError::Empty)
    }

    /// Forget `key`. Returns `true` if it was tracked.
    pub fn remove(&mut self, key: &K) -> bool {
        self.ordered_keys.remove(key).is_some()
    }

    /// Returns `true` if `key` is tracked.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.ordered_keys.contains_key(key)
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered_keys.len()
    }

    /// Returns `true` if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered_keys.is_empty()
    }

    /// Forget every key.
    pub fn clear(&mut self) {
        self.ordered_keys.clear();
    }
}
