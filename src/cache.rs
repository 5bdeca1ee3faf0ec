/// Response caching for idempotent reads.
///
/// Entries carry a fixed TTL and expire lazily: staleness is checked on
/// every lookup and an expired entry is removed as a side effect of the
/// lookup that observes it. There is no background sweep and no capacity
/// bound; the TTL and the body-size cap keep growth in check.
use bytes::Bytes;
use dashmap::DashMap;
use log::debug;
use pingora_http::RequestHeader;
use std::time::Instant;

use crate::config::CacheConfig;

/// Cache status for responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Expired,
}

impl CacheStatus {
    /// Client-facing header value; expired lookups surface as misses
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss | CacheStatus::Expired => "MISS",
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheStatus::Hit)
    }
}

/// Cached response entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response body, served verbatim on a hit
    pub body: Bytes,
    /// Content type of the original upstream response
    pub content_type: Option<String>,
    /// Absolute expiry instant; the entry is dead once `now >= expires_at`
    pub expires_at: Instant,
}

/// Shared response cache with per-entry expiration
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Generate cache key from request headers
    pub fn cache_key(&self, req: &RequestHeader) -> String {
        let mut key = format!("{}:{}", req.method.as_str(), req.uri.path());

        if self.config.include_query {
            if let Some(query) = req.uri.query() {
                key.push('?');
                key.push_str(query);
            }
        }

        key
    }

    /// Look up a cached response.
    ///
    /// Returns the entry and `Hit` while it is still fresh. An expired entry
    /// is removed and reported as `Expired`; an absent key is a `Miss`.
    pub fn get(&self, key: &str) -> (Option<CacheEntry>, CacheStatus) {
        if let Some(entry) = self.entries.get(key) {
            if Instant::now() < entry.expires_at {
                return (Some(entry.value().clone()), CacheStatus::Hit);
            }
            drop(entry);
            self.entries.remove(key);
            return (None, CacheStatus::Expired);
        }
        (None, CacheStatus::Miss)
    }

    /// Store a response body, overwriting any existing entry for the key.
    ///
    /// Every entry gets the same fixed TTL; each write replaces the whole
    /// entry atomically.
    pub fn set(&self, key: String, body: Bytes, content_type: Option<String>) {
        debug!("Caching response for key: {} ({} bytes)", key, body.len());
        self.entries.insert(
            key,
            CacheEntry {
                body,
                content_type,
                expires_at: Instant::now() + self.config.ttl,
            },
        );
    }

    /// Whether a body of this size may be stored
    pub fn is_cacheable_size(&self, body_size: usize) -> bool {
        body_size <= self.config.max_body_size
    }

    /// Number of entries currently held, including not-yet-collected expired ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::time::Duration;

    fn create_test_cache(ttl: Duration) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            ttl,
            include_query: true,
            max_body_size: 1024,
        })
    }

    fn create_request(path: &str) -> RequestHeader {
        RequestHeader::build(Method::GET, path.as_bytes(), None).unwrap()
    }

    #[test]
    fn test_cache_key_includes_query() {
        let cache = create_test_cache(Duration::from_secs(300));
        assert_eq!(cache.cache_key(&create_request("/courses")), "GET:/courses");
        assert_eq!(
            cache.cache_key(&create_request("/courses?page=2")),
            "GET:/courses?page=2"
        );
    }

    #[test]
    fn test_cache_key_without_query() {
        let cache = ResponseCache::new(CacheConfig {
            ttl: Duration::from_secs(300),
            include_query: false,
            max_body_size: 1024,
        });
        assert_eq!(
            cache.cache_key(&create_request("/courses?page=2")),
            "GET:/courses"
        );
    }

    #[test]
    fn test_get_and_set() {
        let cache = create_test_cache(Duration::from_secs(300));
        let (entry, status) = cache.get("GET:/courses");
        assert!(entry.is_none());
        assert_eq!(status, CacheStatus::Miss);

        cache.set(
            "GET:/courses".to_string(),
            Bytes::from_static(b"[]"),
            Some("application/json".to_string()),
        );

        let (entry, status) = cache.get("GET:/courses");
        assert_eq!(status, CacheStatus::Hit);
        let entry = entry.unwrap();
        assert_eq!(entry.body, Bytes::from_static(b"[]"));
        assert_eq!(entry.content_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let cache = create_test_cache(Duration::from_secs(300));
        cache.set("k".to_string(), Bytes::from_static(b"A"), None);
        cache.set("k".to_string(), Bytes::from_static(b"B"), None);

        let (entry, status) = cache.get("k");
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(entry.unwrap().body, Bytes::from_static(b"B"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_removed_on_lookup() {
        let cache = create_test_cache(Duration::from_millis(50));
        cache.set("k".to_string(), Bytes::from_static(b"X"), None);

        let (entry, status) = cache.get("k");
        assert_eq!(status, CacheStatus::Hit);
        assert!(entry.is_some());

        std::thread::sleep(Duration::from_millis(80));

        let (entry, status) = cache.get("k");
        assert!(entry.is_none());
        assert_eq!(status, CacheStatus::Expired);
        // Removed as a side effect of the lookup
        assert!(cache.is_empty());

        // A later lookup of the now-absent key is a plain miss
        let (_, status) = cache.get("k");
        assert_eq!(status, CacheStatus::Miss);
    }

    #[test]
    fn test_status_header_values() {
        assert_eq!(CacheStatus::Hit.as_str(), "HIT");
        assert_eq!(CacheStatus::Miss.as_str(), "MISS");
        assert_eq!(CacheStatus::Expired.as_str(), "MISS");
        assert!(CacheStatus::Hit.is_hit());
        assert!(!CacheStatus::Expired.is_hit());
    }

    #[test]
    fn test_concurrent_writes_keep_entries_whole() {
        use std::sync::Arc;

        let cache = Arc::new(create_test_cache(Duration::from_secs(300)));
        let mut handles = Vec::new();

        for i in 0..8 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                let body = Bytes::from(vec![b'a' + i as u8; 64]);
                for _ in 0..100 {
                    cache.set("shared".to_string(), body.clone(), None);
                    let (entry, _) = cache.get("shared");
                    if let Some(entry) = entry {
                        // Whole-entry writes: the body is always one writer's value
                        assert_eq!(entry.body.len(), 64);
                        let first = entry.body[0];
                        assert!(entry.body.iter().all(|b| *b == first));
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
