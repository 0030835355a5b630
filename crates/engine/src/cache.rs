use lru::LruCache;
use sessionq_filter::Filter;
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Bounded LRU map from expression text to its compiled filter.
///
/// Lookups that change recency take the write lock; `len`, `contains` and
/// friends only read. A poisoned lock is recovered since every mutation
/// leaves the map consistent.
pub struct ExpressionCache {
    entries: RwLock<LruCache<String, Arc<Filter>>>,
}

impl ExpressionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LruCache<String, Arc<Filter>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LruCache<String, Arc<Filter>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the compiled filter and marks it most recently used.
    pub fn get(&self, expression: &str) -> Option<Arc<Filter>> {
        self.write().get(expression).cloned()
    }

    /// Inserts or refreshes an entry, evicting the least recently used one
    /// when full.
    pub fn put(&self, expression: impl Into<String>, compiled: Arc<Filter>) {
        let expression = expression.into();
        if let Some((evicted, _)) = self.write().push(expression.clone(), compiled) {
            if evicted != expression {
                log::debug!("expression cache evicted {evicted:?}");
            }
        }
    }

    pub fn contains(&self, expression: &str) -> bool {
        self.read().contains(expression)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.read().cap().get()
    }
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
