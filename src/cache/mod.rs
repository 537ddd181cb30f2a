// Bounded in-process cache with per-entry expiry

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Concurrent cache whose entries expire after a fixed TTL.
///
/// Expired entries read as misses and are dropped lazily. Once `capacity`
/// is reached the oldest entry is evicted to make room.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    store: Arc<DashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let hit = self.store.get(key).map(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.value.clone())
            }
        })?;

        if hit.is_none() {
            self.store.remove_if(key, |_, entry| entry.is_expired());
        }
        hit
    }

    pub fn insert(&self, key: K, value: V) {
        if !self.store.contains_key(&key) && self.store.len() >= self.capacity {
            self.purge_expired();
            if self.store.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.store.insert(key, CacheEntry::new(value, self.ttl));
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn purge_expired(&self) {
        self.store.retain(|_, entry| !entry.is_expired());
    }

    fn evict_oldest(&self) {
        let oldest = self
            .store
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.store.remove(&key);
        }
    }
}
