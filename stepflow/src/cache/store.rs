//! Storage backends for cached values.

use super::{CacheConfig, CacheKey};
use crate::errors::CacheStoreError;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Storage for cached step outputs.
///
/// Calls happen while the cache holds its in-flight lock, so implementations
/// must not block for long. An `Err` means the store itself misbehaved and is
/// never treated as a miss.
pub trait CacheStore<V>: Send + Sync {
    /// Returns the live value for `key`.
    fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheStoreError>;

    /// Stores `value` under `key`, returning the keys evicted to make room.
    fn insert(&self, key: CacheKey, value: V) -> Result<Vec<CacheKey>, CacheStoreError>;

    /// Removes `key`, returning whether it was present.
    fn remove(&self, key: &CacheKey) -> Result<bool, CacheStoreError>;

    /// Returns the number of stored entries, expired ones included.
    fn len(&self) -> usize;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries, returning how many were removed.
    fn purge_expired(&self) -> usize;

    /// Removes every entry.
    fn clear(&self);
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// In-process store with insertion-order eviction and lazy expiry.
///
/// When full, the oldest inserted key is evicted first; reads never reorder
/// entries. Expired entries read as absent and are removed on access or by
/// [`purge_expired`](CacheStore::purge_expired).
pub struct MemoryStore<V> {
    entries: Mutex<IndexMap<CacheKey, Entry<V>>>,
    max_size: Option<usize>,
    max_age: Option<Duration>,
}

impl<V> MemoryStore<V> {
    /// Creates a store bounded by `config`.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_size: config.max_size,
            max_age: config.max_age,
        }
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        self.max_age
            .is_some_and(|max_age| now.duration_since(entry.inserted_at) >= max_age)
    }
}

impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheStoreError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !self.is_expired(entry, now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }

        entries.shift_remove(key);
        Ok(None)
    }

    fn insert(&self, key: CacheKey, value: V) -> Result<Vec<CacheKey>, CacheStoreError> {
        let mut entries = self.entries.lock();

        // Re-inserting moves the key to the back of the eviction queue.
        entries.shift_remove(&key);
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );

        let mut evicted = Vec::new();
        if let Some(max_size) = self.max_size {
            while entries.len() > max_size {
                match entries.shift_remove_index(0) {
                    Some((old_key, _)) => evicted.push(old_key),
                    None => break,
                }
            }
        }
        Ok(evicted)
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, CacheStoreError> {
        Ok(self.entries.lock().shift_remove(key).is_some())
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw)
    }

    #[test]
    fn test_get_and_insert() {
        let store = MemoryStore::new(&CacheConfig::new());
        assert!(store.get(&key("a")).unwrap().is_none());

        store.insert(key("a"), 1).unwrap();
        assert_eq!(store.get(&key("a")).unwrap(), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_insertion() {
        let store = MemoryStore::new(&CacheConfig::new().with_max_size(2));

        store.insert(key("a"), 1).unwrap();
        store.insert(key("b"), 2).unwrap();
        // Reads do not refresh position.
        store.get(&key("a")).unwrap();
        let evicted = store.insert(key("c"), 3).unwrap();

        assert_eq!(evicted, vec![key("a")]);
        assert!(store.get(&key("a")).unwrap().is_none());
        assert_eq!(store.get(&key("b")).unwrap(), Some(2));
        assert_eq!(store.get(&key("c")).unwrap(), Some(3));
    }

    #[test]
    fn test_max_size_one_keeps_newest() {
        let store = MemoryStore::new(&CacheConfig::new().with_max_size(1));

        store.insert(key("a"), 1).unwrap();
        let evicted = store.insert(key("b"), 2).unwrap();

        assert_eq!(evicted, vec![key("a")]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("b")).unwrap(), Some(2));
    }

    #[test]
    fn test_reinsert_does_not_evict_itself() {
        let store = MemoryStore::new(&CacheConfig::new().with_max_size(2));

        store.insert(key("a"), 1).unwrap();
        store.insert(key("b"), 2).unwrap();
        let evicted = store.insert(key("a"), 10).unwrap();

        assert!(evicted.is_empty());
        assert_eq!(store.get(&key("a")).unwrap(), Some(10));

        // "b" is now the oldest insertion.
        let evicted = store.insert(key("c"), 3).unwrap();
        assert_eq!(evicted, vec![key("b")]);
    }

    #[test]
    fn test_lazy_expiry() {
        let store = MemoryStore::new(&CacheConfig::new().with_max_age(Duration::from_millis(20)));

        store.insert(key("a"), 1).unwrap();
        assert_eq!(store.get(&key("a")).unwrap(), Some(1));

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.len(), 1);
        assert!(store.get(&key("a")).unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let store = MemoryStore::new(&CacheConfig::new().with_max_age(Duration::from_millis(20)));

        store.insert(key("old"), 1).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        store.insert(key("new"), 2).unwrap();

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("new")).unwrap(), Some(2));
    }

    #[test]
    fn test_remove_and_clear() {
        let store = MemoryStore::new(&CacheConfig::new());
        store.insert(key("a"), 1).unwrap();
        store.insert(key("b"), 2).unwrap();

        assert!(store.remove(&key("a")).unwrap());
        assert!(!store.remove(&key("a")).unwrap());

        store.clear();
        assert!(store.is_empty());
    }
}
