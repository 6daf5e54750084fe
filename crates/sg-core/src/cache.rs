//! Bounded caches used by the decision pipeline
//!
//! [`RecentlyUsedCache`] is a fixed-capacity key/value cache with ring-slot
//! eviction: every insertion claims the slot under the ring cursor, evicting
//! whatever key held it, then advances the cursor. Lookups never alter the
//! eviction order: this is insertion-order eviction, not access-order LRU.
//! Re-inserting a live key therefore refreshes it (it claims a new slot),
//! while merely reading it does not.
//!
//! [`ThirdPartyHostCache`] wraps the same structure behind a mutex for the
//! tracking-protection lookups that run against shared state from multiple
//! in-flight requests.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

// =============================================================================
// RecentlyUsedCache
// =============================================================================

/// Fixed-capacity cache with ring-slot eviction. Single-owner; callers that
/// share one across threads must wrap it themselves.
pub struct RecentlyUsedCache<K, V> {
    slots: Vec<Option<K>>,
    cursor: usize,
    map: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> RecentlyUsedCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            slots: vec![None; capacity],
            cursor: 0,
            map: HashMap::with_capacity(capacity),
        }
    }

    /// Insert an entry, evicting the key in the current ring slot if one is
    /// there.
    pub fn add(&mut self, key: K, value: V) {
        if let Some(old_key) = self.slots[self.cursor].take() {
            self.map.remove(&old_key);
        }
        self.slots[self.cursor] = Some(key.clone());
        self.map.insert(key, value);
        self.cursor = (self.cursor + 1) % self.slots.len();
        debug_assert!(self.map.len() <= self.slots.len());
    }

    /// O(1) lookup. Does not affect eviction order.
    pub fn find(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Remove an entry and release any ring slots it occupies.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        for slot in self.slots.iter_mut() {
            if slot.as_ref() == Some(key) {
                *slot = None;
            }
        }
        self.map.remove(key)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.cursor = 0;
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<K: Eq + Hash + Clone, V> Default for RecentlyUsedCache<K, V> {
    /// The default capacity matches the rewrite-memoization use.
    fn default() -> Self {
        Self::new(100)
    }
}

// =============================================================================
// ThirdPartyHostCache
// =============================================================================

/// Default entry bound for the third-party host cache.
pub const THIRD_PARTY_HOSTS_CACHE_SIZE: usize = 20;

/// Bounded cache mapping a base host to the third-party hosts that are
/// first-party-linked to it. Shared between concurrent lookups, so all
/// access goes through one internal lock.
pub struct ThirdPartyHostCache {
    inner: Mutex<RecentlyUsedCache<String, Vec<String>>>,
}

impl ThirdPartyHostCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RecentlyUsedCache::new(capacity)),
        }
    }

    /// Look up the cached host list for a base host.
    pub fn find(&self, base_host: &str) -> Option<Vec<String>> {
        let guard = self.inner.lock().unwrap();
        guard.find(&base_host.to_string()).cloned()
    }

    /// Fetch the host list for a base host, computing and caching it on a
    /// miss.
    pub fn get_or_insert_with<F>(&self, base_host: &str, compute: F) -> Vec<String>
    where
        F: FnOnce() -> Vec<String>,
    {
        let mut guard = self.inner.lock().unwrap();
        if let Some(hosts) = guard.find(&base_host.to_string()) {
            return hosts.clone();
        }
        let hosts = compute();
        guard.add(base_host.to_string(), hosts.clone());
        hosts
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for ThirdPartyHostCache {
    fn default() -> Self {
        Self::new(THIRD_PARTY_HOSTS_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut cache = RecentlyUsedCache::new(3);
        cache.add("kA".to_string(), 1);
        cache.add("kB".to_string(), 2);
        cache.add("kC".to_string(), 3);
        cache.add("kD".to_string(), 4);

        assert_eq!(cache.len(), 3);
        assert!(cache.find(&"kA".to_string()).is_none());
        assert_eq!(cache.find(&"kB".to_string()), Some(&2));
        assert_eq!(cache.find(&"kC".to_string()), Some(&3));
        assert_eq!(cache.find(&"kD".to_string()), Some(&4));
    }

    #[test]
    fn test_reads_do_not_promote() {
        let mut cache = RecentlyUsedCache::new(3);
        cache.add("kA".to_string(), 1);
        cache.add("kB".to_string(), 2);
        cache.add("kC".to_string(), 3);

        // Reading kA does not save it from eviction.
        assert_eq!(cache.find(&"kA".to_string()), Some(&1));
        cache.add("kD".to_string(), 4);
        assert!(cache.find(&"kA".to_string()).is_none());
    }

    #[test]
    fn test_reinsert_refreshes_slot() {
        let mut cache = RecentlyUsedCache::new(3);
        cache.add("kA".to_string(), 1);
        cache.add("kB".to_string(), 2);
        cache.add("kC".to_string(), 3);

        // Re-inserting kA claims the wrapped slot (kA's own), so the next
        // insertion evicts kB instead.
        cache.add("kA".to_string(), 10);
        cache.add("kD".to_string(), 4);

        assert_eq!(cache.find(&"kA".to_string()), Some(&10));
        assert!(cache.find(&"kB".to_string()).is_none());
        assert_eq!(cache.find(&"kC".to_string()), Some(&3));
        assert_eq!(cache.find(&"kD".to_string()), Some(&4));
    }

    #[test]
    fn test_remove() {
        let mut cache = RecentlyUsedCache::new(3);
        cache.add("kA".to_string(), 1);
        cache.add("kB".to_string(), 2);
        assert_eq!(cache.remove(&"kA".to_string()), Some(1));
        assert!(cache.find(&"kA".to_string()).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(&"kA".to_string()), None);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut cache = RecentlyUsedCache::new(4);
        for i in 0..100 {
            cache.add(format!("k{}", i), i);
            assert!(cache.len() <= cache.capacity());
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_third_party_cache_computes_once() {
        let cache = ThirdPartyHostCache::new(2);
        let mut calls = 0;
        let hosts = cache.get_or_insert_with("a.com", || {
            calls += 1;
            vec!["cdn.a.net".to_string()]
        });
        assert_eq!(hosts, vec!["cdn.a.net".to_string()]);

        let hosts = cache.get_or_insert_with("a.com", || {
            calls += 1;
            vec![]
        });
        assert_eq!(hosts, vec!["cdn.a.net".to_string()]);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_third_party_cache_bounded() {
        let cache = ThirdPartyHostCache::new(2);
        for i in 0..10 {
            cache.get_or_insert_with(&format!("base{}.com", i), Vec::new);
        }
        assert_eq!(cache.len(), 2);
    }
}
