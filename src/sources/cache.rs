//! Per-key memoization where each key is initialized at most once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;

/// Map of string keys to lazily initialized values.
///
/// Concurrent callers asking for the same key wait on the same cell, so the
/// initializer runs once per key. A failed initialization leaves the cell
/// empty and the next caller tries again.
#[derive(Debug)]
pub struct OnceMap<V> {
    cells: Mutex<HashMap<String, Arc<OnceCell<V>>>>,
}

impl<V> Default for OnceMap<V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> OnceMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<OnceCell<V>>>> {
        self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn get_or_try_init<E, F, Fut>(&self, key: &str, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut cells = self.lock();
            Arc::clone(cells.entry(key.to_string()).or_default())
        };
        cell.get_or_try_init(init).await.cloned()
    }

    /// Stores `value` for `key` unless the key already holds one or is
    /// being initialized. Returns whether the value was stored.
    pub fn insert(&self, key: &str, value: V) -> bool {
        let cell = {
            let mut cells = self.lock();
            Arc::clone(cells.entry(key.to_string()).or_default())
        };
        cell.set(value).is_ok()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of keys holding a value.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
