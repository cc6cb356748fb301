//! Cleanup sentinels
//!
//! One sentinel is registered for every row inserted into either cache. It
//! tracks the object whose lifetime governs the row through a weak reference
//! and removes the row once that reference no longer upgrades. A row that has
//! since been overwritten for a newer object is left alone.

use crate::finalizer::{FinalizeOutcome, Finalizer};
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::{BuildHasherDefault, Hash};
use std::sync::Weak;

/// Pointer-keyed map shared by both caches
pub(crate) type RowCache<K, V> = DashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Cache whose rows are plain weak references
pub(crate) type WeakCache<K, T> = RowCache<K, Weak<T>>;

/// A cache row whose lifetime follows one tracked object
pub(crate) trait TrackedRow<T: ?Sized> {
    /// True if this row was inserted for `tracked`
    fn tracks(&self, tracked: &Weak<T>) -> bool;
}

impl<T: ?Sized> TrackedRow<T> for Weak<T> {
    fn tracks(&self, tracked: &Weak<T>) -> bool {
        Weak::ptr_eq(self, tracked)
    }
}

pub(crate) struct CleanupSentinel<K, T: ?Sized, V = Weak<T>> {
    key: K,
    tracked: Weak<T>,
    cache: Weak<RowCache<K, V>>,
}

impl<K, T: ?Sized, V> CleanupSentinel<K, T, V> {
    pub(crate) fn new(key: K, tracked: Weak<T>, cache: Weak<RowCache<K, V>>) -> Self {
        Self {
            key,
            tracked,
            cache,
        }
    }
}

impl<K, T, V> Finalizer for CleanupSentinel<K, T, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug,
    T: ?Sized + Send + Sync,
    V: TrackedRow<T> + Send + Sync,
{
    fn finalize(&mut self) -> FinalizeOutcome {
        let Some(cache) = self.cache.upgrade() else {
            return FinalizeOutcome::Done;
        };
        if self.tracked.strong_count() > 0 {
            return FinalizeOutcome::Rearm;
        }

        // The removed row is dropped after the shard lock is released.
        let removed = cache.remove_if(&self.key, |_, stored| stored.tracks(&self.tracked));
        if removed.is_some() {
            tracing::debug!(key = ?self.key, "evicted stale cache entry");
        }
        FinalizeOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache_with(key: u32, target: &Arc<String>) -> Arc<WeakCache<u32, String>> {
        let cache = Arc::new(WeakCache::default());
        cache.insert(key, Arc::downgrade(target));
        cache
    }

    #[test]
    fn test_rearms_while_alive() {
        let target = Arc::new(String::from("proxy"));
        let cache = cache_with(1, &target);
        let mut sentinel = CleanupSentinel::new(1, Arc::downgrade(&target), Arc::downgrade(&cache));

        assert_eq!(sentinel.finalize(), FinalizeOutcome::Rearm);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_once_dead() {
        let target = Arc::new(String::from("proxy"));
        let cache = cache_with(1, &target);
        let mut sentinel = CleanupSentinel::new(1, Arc::downgrade(&target), Arc::downgrade(&cache));

        drop(target);
        assert_eq!(sentinel.finalize(), FinalizeOutcome::Done);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_leaves_overwritten_row() {
        let old = Arc::new(String::from("old"));
        let cache = cache_with(1, &old);
        let mut sentinel = CleanupSentinel::new(1, Arc::downgrade(&old), Arc::downgrade(&cache));

        drop(old);
        let newer = Arc::new(String::from("new"));
        cache.insert(1, Arc::downgrade(&newer));

        assert_eq!(sentinel.finalize(), FinalizeOutcome::Done);
        let stored = cache.get(&1).and_then(|weak| weak.upgrade());
        assert_eq!(stored.as_deref().map(String::as_str), Some("new"));
    }

    #[test]
    fn test_done_when_cache_dropped() {
        let target = Arc::new(String::from("proxy"));
        let cache = cache_with(1, &target);
        let mut sentinel = CleanupSentinel::new(1, Arc::downgrade(&target), Arc::downgrade(&cache));

        drop(cache);
        assert_eq!(sentinel.finalize(), FinalizeOutcome::Done);
    }
}
