use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use super::Path;

/// Default number of cached resolutions.
pub const DEFAULT_CACHE_CAPACITY: usize = 8192;

/// Identity of one resolution: the resolving path, its sandbox root, its scheme map and the
/// exact relative string as the caller wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub base: String,
    pub root: Arc<str>,
    pub schemes: u64,
    pub user_path: String,
}

/// Counters reported by [`PathCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

/// Shared lookup cache. Values go in and come out as copies, so callers never share a
/// cached [`Path`].
pub struct PathCache {
    capacity: usize,
    /// `None` when the capacity is zero and caching is off.
    entries: Option<Mutex<LruCache<CacheKey, Path>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PathCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: NonZeroUsize::new(capacity)
                .map(|capacity| Mutex::new(LruCache::new(capacity))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<Path> {
        let found = self
            .entries
            .as_ref()
            .and_then(|entries| entries.lock().get(key).cloned());
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Inserts or refreshes `key`, evicting the least recently used entry when full.
    pub(crate) fn put(&self, key: CacheKey, path: Path) {
        if let Some(entries) = &self.entries {
            entries.lock().put(key, path);
        }
    }

    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.entries.as_ref().map_or(0, |entries| entries.lock().len()),
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for PathCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VfsRuntime;

    fn key(user_path: &str) -> CacheKey {
        CacheKey {
            base: "file:/".to_string(),
            root: Arc::from("file:/"),
            schemes: 0,
            user_path: user_path.to_string(),
        }
    }

    #[test]
    fn test_capacity_plus_one_evicts_least_recently_used() {
        let runtime = VfsRuntime::default();
        let cache = PathCache::new(3);
        for name in ["a", "b", "c"] {
            cache.put(key(name), runtime.root().child(name));
        }
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("d"), runtime.root().child("d"));
        assert_eq!(cache.stats().len, 3);
        assert!(cache.get(&key("b")).is_none());
        for name in ["a", "c", "d"] {
            assert_eq!(cache.get(&key(name)).unwrap().tail(), name);
        }
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.capacity), (4, 1, 3));
    }

    #[test]
    fn test_replacing_a_key_refreshes_it() {
        let runtime = VfsRuntime::default();
        let cache = PathCache::new(2);
        cache.put(key("1"), runtime.root().child("one"));
        cache.put(key("2"), runtime.root().child("two"));
        cache.put(key("1"), runtime.root().child("uno"));
        cache.put(key("3"), runtime.root().child("three"));
        assert!(cache.get(&key("2")).is_none());
        assert_eq!(cache.get(&key("1")).unwrap().tail(), "uno");

        cache.clear();
        assert_eq!(cache.stats().len, 0);
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let runtime = VfsRuntime::default();
        let cache = PathCache::new(0);
        cache.put(key("a"), runtime.root().child("a"));
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.stats().len, 0);
        assert_eq!(cache.stats().misses, 1);
    }
}
