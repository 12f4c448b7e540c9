//! The response cache facade and its storage interface.
//!
//! The engine owns the caching *policy* (see the cache stage of the
//! pipeline); storage is behind the [`CacheStore`] trait so an on-disk
//! journaled store can be plugged in. The in-memory store here is complete
//! enough for tools and tests. Stores must be internally thread-safe and
//! guarantee single-writer-per-key semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use http::{StatusCode, Version};

use crate::headers::Headers;

/// A stored response snapshot: the status line, headers, body bytes, the
/// request headers nominated by `Vary`, and the original timing metadata.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub url: String,
    pub request_method: String,
    /// The request header values the stored response varies on.
    pub vary_headers: Headers,
    pub status: StatusCode,
    pub message: String,
    pub version: Version,
    pub headers: Headers,
    pub body: Arc<Vec<u8>>,
    pub sent_request_at_millis: u64,
    pub received_response_at_millis: u64,
}

/// Storage behind the cache. Keys are derived from the request url.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheRecord>;
    fn put(&self, key: &str, record: CacheRecord);
    /// Replace the metadata of an existing record (post-304 header merge).
    /// Stores may treat this as `put`.
    fn update(&self, key: &str, record: CacheRecord);
    fn remove(&self, key: &str);
}

/// In-memory store. Entries live until removed or the process exits.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheRecord>>,
}

impl MemoryCacheStore {
    pub fn new() -> MemoryCacheStore {
        MemoryCacheStore::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<CacheRecord> {
        self.entries.lock().expect("cache store lock").get(key).cloned()
    }

    fn put(&self, key: &str, record: CacheRecord) {
        self.entries
            .lock()
            .expect("cache store lock")
            .insert(key.to_string(), record);
    }

    fn update(&self, key: &str, record: CacheRecord) {
        self.put(key, record);
    }

    fn remove(&self, key: &str) {
        self.entries.lock().expect("cache store lock").remove(key);
    }
}

/// Counters describing how requests were satisfied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests that consulted the cache at all.
    pub request_count: u64,
    /// Requests that went to the network.
    pub network_count: u64,
    /// Requests answered from the store, including validated 304 reuses.
    pub hit_count: u64,
    /// Conditional requests the server answered with 304.
    pub conditional_hit_count: u64,
}

/// A response cache: a store plus statistics.
pub struct Cache {
    store: Box<dyn CacheStore>,
    stats: Mutex<CacheStats>,
}

impl Cache {
    pub fn new(store: impl CacheStore + 'static) -> Cache {
        Cache {
            store: Box::new(store),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// A cache over the built-in in-memory store.
    pub fn in_memory() -> Cache {
        Cache::new(MemoryCacheStore::new())
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().expect("cache stats lock")
    }

    pub(crate) fn key(url: &http::Uri) -> String {
        url.to_string()
    }

    pub(crate) fn get(&self, key: &str) -> Option<CacheRecord> {
        self.store.get(key)
    }

    pub(crate) fn put(&self, key: &str, record: CacheRecord) {
        self.store.put(key, record);
    }

    pub(crate) fn update(&self, key: &str, record: CacheRecord) {
        self.store.update(key, record);
    }

    pub(crate) fn remove(&self, key: &str) {
        self.store.remove(key);
    }

    pub(crate) fn track_response(&self, network: bool, hit: bool) {
        let mut stats = self.stats.lock().expect("cache stats lock");
        stats.request_count += 1;
        if network {
            stats.network_count += 1;
        }
        if hit {
            stats.hit_count += 1;
        }
    }

    pub(crate) fn track_conditional_hit(&self) {
        let mut stats = self.stats.lock().expect("cache stats lock");
        stats.conditional_hit_count += 1;
        stats.hit_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> CacheRecord {
        CacheRecord {
            url: url.to_string(),
            request_method: "GET".to_string(),
            vary_headers: Headers::default(),
            status: StatusCode::OK,
            message: "OK".to_string(),
            version: Version::HTTP_11,
            headers: Headers::of([("etag", "\"v1\"")]),
            body: Arc::new(b"cached".to_vec()),
            sent_request_at_millis: 1,
            received_response_at_millis: 2,
        }
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryCacheStore::new();
        assert!(store.get("k").is_none());
        store.put("k", record("http://x.test/"));
        assert_eq!(*store.get("k").unwrap().body, b"cached".to_vec());
        store.remove("k");
        assert!(store.get("k").is_none());
    }

    #[test]
    fn stats_accumulate() {
        let cache = Cache::in_memory();
        cache.track_response(true, false);
        cache.track_response(false, true);
        cache.track_conditional_hit();

        let stats = cache.stats();
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.network_count, 1);
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.conditional_hit_count, 1);
    }
}
