use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::web::Bytes;
use dashmap::DashMap;
use tracing::debug;

/// A rendered response body kept for reuse.
#[derive(Clone, Debug)]
pub struct CachedPage {
    pub body: Bytes,
    pub content_type: String,
    stored_at: Instant,
}

/// Shared response cache keyed by request path plus query string.
///
/// Entries expire after `ttl`; expired entries are dropped lazily when read.
/// Writers call [`PageCache::clear`] when they change what a cached page shows.
#[derive(Clone)]
pub struct PageCache {
    store: Arc<DashMap<String, CachedPage>>,
    ttl: Duration,
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self { store: Arc::new(DashMap::new()), ttl }
    }

    pub fn key(path: &str, query: &str) -> String {
        if query.is_empty() { path.to_string() } else { format!("{path}?{query}") }
    }

    pub fn get(&self, key: &str) -> Option<CachedPage> {
        let hit = self.store.get(key).map(|e| e.value().clone())?;
        if hit.stored_at.elapsed() >= self.ttl {
            self.store.remove(key);
            debug!(key, "page cache expired");
            return None;
        }
        debug!(key, "page cache hit");
        Some(hit)
    }

    pub fn put(&self, key: String, body: Bytes, content_type: impl Into<String>) {
        if self.ttl.is_zero() { return; }
        self.store.insert(key, CachedPage { body, content_type: content_type.into(), stored_at: Instant::now() });
    }

    pub fn clear(&self) {
        let n = self.store.len();
        self.store.clear();
        debug!(entries = n, "page cache cleared");
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_expire() {
        let cache = PageCache::new(Duration::from_millis(30));
        cache.put(PageCache::key("/", ""), Bytes::from_static(b"one"), "application/json");
        assert_eq!(cache.get("/").unwrap().body, Bytes::from_static(b"one"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("/").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_include_query() {
        let cache = PageCache::new(Duration::from_secs(60));
        cache.put(PageCache::key("/", "page=2"), Bytes::from_static(b"two"), "application/json");
        assert!(cache.get("/").is_none());
        assert!(cache.get("/?page=2").is_some());
        cache.clear();
        assert!(cache.get("/?page=2").is_none());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = PageCache::new(Duration::ZERO);
        cache.put("/".into(), Bytes::from_static(b"x"), "text/plain");
        assert_eq!(cache.len(), 0);
    }
}
