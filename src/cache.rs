//! Bounded, time-expiring cache in front of the source retriever.
//!
//! Keys are derived from the normalized query text and the fully-resolved
//! search options, so two requests that resolve to the same retrieval hit
//! the same entry. Capacity overflow evicts least-recently-used entries;
//! expiry is lazy, applied on read.
//!
//! The cache is an explicit service constructed once at startup and passed
//! by reference to the retriever — there is no module-level global.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::SourceDocument;
use crate::websearch::SearchOptions;

struct Entry {
    stored_at: Instant,
    sources: Vec<SourceDocument>,
}

pub struct SourceCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl SourceCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Deterministic key over the normalized query and resolved options.
    pub fn key(query: &str, options: &SearchOptions) -> String {
        let normalized = query.trim().to_lowercase();
        let options_json = serde_json::to_string(options).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(options_json.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<SourceDocument>> {
        let mut cache = self.inner.lock().unwrap();

        let expired = match cache.get(key) {
            Some(entry) => entry.stored_at.elapsed() >= self.ttl,
            None => return None,
        };

        if expired {
            cache.pop(key);
            return None;
        }

        cache.get(key).map(|entry| entry.sources.clone())
    }

    pub fn set(&self, key: String, sources: Vec<SourceDocument>) {
        let mut cache = self.inner.lock().unwrap();
        cache.put(
            key,
            Entry {
                stored_at: Instant::now(),
                sources,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.inner.lock().unwrap().pop(key);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(title: &str) -> SourceDocument {
        SourceDocument {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            excerpt: "excerpt".to_string(),
            score: 0.5,
            published_at: None,
        }
    }

    fn options() -> SearchOptions {
        SearchOptions {
            max_results: 5,
            search_depth: "advanced".to_string(),
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
        }
    }

    #[test]
    fn test_set_then_get() {
        let cache = SourceCache::new(10, Duration::from_secs(60));
        let key = SourceCache::key("printer offline", &options());
        cache.set(key.clone(), vec![source("a")]);

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].title, "a");
    }

    #[test]
    fn test_key_normalizes_query_whitespace_and_case() {
        let opts = options();
        assert_eq!(
            SourceCache::key("  Printer Offline ", &opts),
            SourceCache::key("printer offline", &opts)
        );
    }

    #[test]
    fn test_key_varies_with_options() {
        let mut other = options();
        other.max_results = 3;
        assert_ne!(
            SourceCache::key("printer offline", &options()),
            SourceCache::key("printer offline", &other)
        );
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = SourceCache::new(10, Duration::from_millis(0));
        let key = SourceCache::key("printer offline", &options());
        cache.set(key.clone(), vec![source("a")]);

        assert!(cache.get(&key).is_none());
        // Expired entry is dropped, not just hidden.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = SourceCache::new(2, Duration::from_secs(60));
        cache.set("k1".to_string(), vec![source("a")]);
        cache.set("k2".to_string(), vec![source("b")]);

        // Touch k1 so k2 becomes the eviction candidate.
        assert!(cache.get("k1").is_some());
        cache.set("k3".to_string(), vec![source("c")]);

        assert!(cache.get("k1").is_some());
        assert!(cache.get("k2").is_none());
        assert!(cache.get("k3").is_some());
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = SourceCache::new(10, Duration::from_secs(60));
        cache.set("k1".to_string(), vec![source("a")]);
        cache.set("k2".to_string(), vec![source("b")]);

        cache.delete("k1");
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
