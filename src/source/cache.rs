//! TTL cache for single-record lookups
//!
//! Entries expire `ttl` after insertion. Lookups treat expired entries as
//! missing; a background evictor removes them so the map does not grow with
//! dead entries between lookups. The evictor stops when its cancellation
//! token fires.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Cache with per-entry TTL and a size bound
///
/// Clones share the same entries.
#[derive(Debug)]
pub struct ResponseCache<K, V> {
    ttl: Duration,
    max_entries: usize,
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
}

impl<K, V> Clone for ResponseCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            max_entries: self.max_entries,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fresh value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            entries.remove(key);
        }
        fresh
    }

    /// Store `value`, evicting the oldest entry if the cache is full
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the background evictor
    ///
    /// Runs `evict_expired` every `interval` until `cancel` fires.
    pub fn spawn_evictor(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, remaining = cache.len(), "Evicted expired cache entries");
                        }
                    }
                }
            }

            debug!("Cache evictor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(10), 100);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_drops_oldest() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.insert(1, "one");
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.insert(2, "two");
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.insert(3, "three");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&3), Some("three"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evictor_removes_expired_and_stops_on_cancel() {
        let cache = ResponseCache::new(Duration::from_secs(5), 100);
        let cancel = CancellationToken::new();
        let handle = cache.spawn_evictor(Duration::from_secs(1), cancel.clone());

        cache.insert("k", 42);
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(cache.len(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
