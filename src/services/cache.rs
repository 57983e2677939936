use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// Process-local TTL cache keyed by string. Injected where needed instead of
/// living as a module-level singleton; every entry carries its own TTL.
#[derive(Clone)]
pub struct TtlCache<V: Clone> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_fresh(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Stale entry observed under the read lock; drop it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.is_fresh(Instant::now()) {
                return Some(entry.value.clone());
            }
            entries.remove(key);
        }
        None
    }

    pub async fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop every expired entry. Callers on hot paths do not need this; it
    /// exists to bound memory on long-lived caches.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            size: entries.len(),
            keys: entries.keys().cloned().collect(),
        }
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_live_until_their_ttl() {
        let cache: TtlCache<String> = TtlCache::new();
        cache
            .insert("so", "Somalia".to_string(), Duration::from_millis(40))
            .await;

        assert_eq!(cache.get("so").await, Some("Somalia".to_string()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("so").await, None);
    }

    #[tokio::test]
    async fn per_entry_ttls_are_independent() {
        let cache: TtlCache<i64> = TtlCache::new();
        cache.insert("short", 1, Duration::from_millis(30)).await;
        cache.insert("long", 2, Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("short").await, None);
        assert_eq!(cache.get("long").await, Some(2));
    }

    #[tokio::test]
    async fn invalidate_and_purge() {
        let cache: TtlCache<i64> = TtlCache::new();
        cache.insert("a", 1, Duration::from_millis(10)).await;
        cache.insert("b", 2, Duration::from_secs(60)).await;
        cache.invalidate("b").await;
        assert_eq!(cache.get("b").await, None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let purged = cache.purge_expired().await;
        assert_eq!(purged, 1);
        assert_eq!(cache.stats().await.size, 0);
    }
}
