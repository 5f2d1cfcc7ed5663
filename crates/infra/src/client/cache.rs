//! TTL cache of successful GET responses, keyed by absolute URL.
//!
//! Only 2xx bodies are stored; errors are never cached, so a transient
//! outage cannot be hidden behind a stale entry.

use std::sync::Arc;

use moka::sync::Cache;
use tracing::debug;

use super::options::CacheConfig;

pub struct ResponseCache {
    entries: Cache<String, Arc<CachedResponse>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        debug!(
            ttl_ms = config.ttl.as_millis() as u64,
            max_entries = config.max_entries,
            "response_cache_configured"
        );
        let entries =
            Cache::builder().max_capacity(config.max_entries).time_to_live(config.ttl).build();
        Self { entries }
    }

    pub fn get(&self, url: &str) -> Option<Arc<CachedResponse>> {
        let hit = self.entries.get(url);
        debug!(url, hit = hit.is_some(), "response_cache_lookup");
        hit
    }

    pub fn insert(&self, url: &str, status: u16, body: &[u8]) {
        self.entries
            .insert(url.to_string(), Arc::new(CachedResponse { status, body: body.to_vec() }));
    }

    pub fn invalidate(&self, url: &str) {
        self.entries.invalidate(url);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache").field("entries", &self.entries.entry_count()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn cache() -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            enabled: true,
            ttl: Duration::from_secs(60),
            max_entries: 10,
        })
    }

    #[test]
    fn test_insert_and_get() {
        let cache = cache();
        cache.insert("https://api/x", 200, b"{}");

        let hit = cache.get("https://api/x").expect("cached");
        assert_eq!(hit.status, 200);
        assert_eq!(hit.body, b"{}");
        assert!(cache.get("https://api/y").is_none());
    }

    #[test]
    fn test_invalidate() {
        let cache = cache();
        cache.insert("https://api/x", 200, b"1");
        cache.insert("https://api/y", 200, b"2");

        cache.invalidate("https://api/x");
        assert!(cache.get("https://api/x").is_none());

        cache.clear();
        assert!(cache.get("https://api/y").is_none());
    }

    // moka reads std::time::Instant directly, so expiry needs a real sleep
    #[test]
    fn test_entries_expire() {
        let cache = ResponseCache::new(&CacheConfig {
            enabled: true,
            ttl: Duration::from_millis(50),
            max_entries: 10,
        });
        cache.insert("https://api/x", 200, b"1");

        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.get("https://api/x").is_none());
    }
}
