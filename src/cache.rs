//! TTL-bounded local entity cache
//!
//! Expiration is explicit: an entry is valid iff `now - stored_at <= ttl`,
//! with `now` read from the injected clock. Expired entries are treated as
//! misses and evicted lazily on access or by `evict_expired`. Every mutation
//! is persisted to the durable store; persistence failures degrade
//! durability but never fail the caller — a later re-fetch from the source
//! of truth is the recovery path.

use crate::clock::Clock;
use crate::store::{StateStore, CACHE_RECORD};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A cached entity snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entity snapshot
    pub data: serde_json::Value,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
    /// Time-to-live from `stored_at`
    pub ttl: Duration,
}

impl CacheEntry {
    /// Whether the entry is still valid at `now`
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age <= ttl,
            // TTL too large for chrono arithmetic: effectively no expiry
            Err(_) => true,
        }
    }
}

/// TTL key-value cache over entity snapshots
pub struct LocalCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
}

impl LocalCache {
    /// Create an empty cache
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn StateStore>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            store,
        }
    }

    /// Restore entries from the durable record, dropping any that already
    /// expired while the process was down
    pub fn load(&self) {
        let bytes = match self.store.read_record(CACHE_RECORD) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Cache record unreadable, starting empty: {}", e);
                return;
            }
        };

        match serde_json::from_slice::<HashMap<String, CacheEntry>>(&bytes) {
            Ok(loaded) => {
                let now = self.clock.now();
                let mut entries = self.entries.lock();
                *entries = loaded
                    .into_iter()
                    .filter(|(_, entry)| entry.is_valid(now))
                    .collect();
                tracing::debug!("Cache restored: {} entries", entries.len());
            }
            Err(e) => {
                tracing::warn!("Cache record corrupt, starting empty: {}", e);
            }
        }
    }

    /// Insert or overwrite an entry
    pub fn put(&self, key: impl Into<String>, data: serde_json::Value, ttl: Duration) {
        let entry = CacheEntry {
            data,
            stored_at: self.clock.now(),
            ttl,
        };
        {
            let mut entries = self.entries.lock();
            entries.insert(key.into(), entry);
            self.persist(&entries);
        }
    }

    /// Get a value; absent and expired both return `None`
    ///
    /// An expired entry found here is evicted in place.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_valid(now) => Some(entry.data.clone()),
            Some(_) => {
                entries.remove(key);
                self.persist(&entries);
                None
            }
            None => None,
        }
    }

    /// Remove a single entry
    pub fn evict(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries.remove(key).is_some();
        if removed {
            self.persist(&entries);
        }
        removed
    }

    /// Sweep all expired entries, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries);
            tracing::debug!("Cache sweep evicted {} entries", removed);
        }
        removed
    }

    /// Empty the cache (logout/reset)
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.persist(&entries);
    }

    /// Number of entries, including any not yet swept
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Best-effort durable write; a failure here degrades durability only
    fn persist(&self, entries: &HashMap<String, CacheEntry>) {
        let bytes = match serde_json::to_vec(entries) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Cache serialize failed, skipping persist: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.write_record(CACHE_RECORD, &bytes) {
            tracing::warn!("Cache persist failed, continuing in-memory: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStateStore;
    use serde_json::json;

    fn test_cache() -> (LocalCache, ManualClock, Arc<MemoryStateStore>) {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStateStore::new());
        let cache = LocalCache::new(Arc::new(clock.clone()), store.clone());
        (cache, clock, store)
    }

    #[test]
    fn test_get_before_and_after_expiry() {
        let (cache, clock, _) = test_cache();
        cache.put("task:t-1", json!({"status": "open"}), Duration::from_secs(60));

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(cache.get("task:t-1"), Some(json!({"status": "open"})));

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(cache.get("task:t-1"), None);
        // Lazy eviction removed the entry
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let (cache, _, _) = test_cache();
        cache.put("task:t-1", json!({"v": 1}), Duration::from_secs(60));
        cache.put("task:t-1", json!({"v": 2}), Duration::from_secs(60));

        assert_eq!(cache.get("task:t-1"), Some(json!({"v": 2})));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_expired_sweep() {
        let (cache, clock, _) = test_cache();
        cache.put("a", json!(1), Duration::from_secs(10));
        cache.put("b", json!(2), Duration::from_secs(100));

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[test]
    fn test_clear_makes_everything_miss() {
        let (cache, _, _) = test_cache();
        cache.put("a", json!(1), Duration::from_secs(60));
        cache.put("b", json!(2), Duration::from_secs(60));

        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_restores_unexpired_entries() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStateStore::new());

        {
            let cache = LocalCache::new(Arc::new(clock.clone()), store.clone());
            cache.put("keep", json!(1), Duration::from_secs(100));
            cache.put("lose", json!(2), Duration::from_secs(5));
        }

        // "Restart" after the short TTL lapsed
        clock.advance(chrono::Duration::seconds(10));
        let cache = LocalCache::new(Arc::new(clock.clone()), store);
        cache.load();

        assert_eq!(cache.get("keep"), Some(json!(1)));
        assert_eq!(cache.get("lose"), None);
    }

    #[test]
    fn test_load_tolerates_corrupt_record() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStateStore::new());
        store.write_record(CACHE_RECORD, b"not json").unwrap();

        let cache = LocalCache::new(Arc::new(clock), store);
        cache.load();
        assert!(cache.is_empty());
    }
}
