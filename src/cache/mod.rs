//! Response Cache
//!
//! Syntactic cache from normalized question text to a finished `Response`.
//! The backend is an injected capability; when it misbehaves the cache
//! degrades to "always miss" and the pipeline carries on.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryCache;
pub use sqlite::SqliteCache;

use crate::error::Result;
use crate::response::Response;
use async_trait::async_trait;
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key/value store with per-entry expiry
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Drop every entry
    async fn clear(&self) -> Result<()>;
}

/// Backend that never stores anything
pub struct NoopCache;

#[async_trait]
impl CacheBackend for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// Lowercase, trim and collapse internal whitespace runs to one space.
pub fn normalize_key(question: &str) -> String {
    question.split_whitespace().map(str::to_lowercase).join(" ")
}

/// Typed, failure-tolerant view over a `CacheBackend`
#[derive(Clone)]
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    op_timeout: Duration,
}

impl ResponseCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, op_timeout: Duration) -> Self {
        Self {
            backend,
            ttl,
            op_timeout,
        }
    }

    /// Look up a response; any backend problem is reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Response> {
        let raw = match tokio::time::timeout(self.op_timeout, self.backend.get(key)).await {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!("Cache unavailable on read, treating as miss: {}", e);
                return None;
            }
            Err(_) => {
                warn!(
                    "Cache read timed out after {} ms, treating as miss",
                    self.op_timeout.as_millis()
                );
                return None;
            }
        };

        match serde_json::from_str::<Response>(&raw) {
            Ok(response) => {
                debug!("Cache hit for '{}'", key);
                Some(response)
            }
            Err(e) => {
                warn!("Discarding unreadable cache entry for '{}': {}", key, e);
                None
            }
        }
    }

    /// Store a response; failures are logged and swallowed.
    pub async fn put(&self, key: &str, response: &Response) {
        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize response for cache: {}", e);
                return;
            }
        };

        match tokio::time::timeout(self.op_timeout, self.backend.set(key, &payload, self.ttl)).await
        {
            Ok(Ok(())) => debug!("Cached response for '{}' ({}s TTL)", key, self.ttl.as_secs()),
            Ok(Err(e)) => warn!("Cache unavailable on write, skipping: {}", e),
            Err(_) => warn!(
                "Cache write timed out after {} ms, skipping",
                self.op_timeout.as_millis()
            ),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::response::Response;

    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(PipelineError::Cache("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(PipelineError::Cache("connection refused".to_string()))
        }

        async fn clear(&self) -> Result<()> {
            Err(PipelineError::Cache("connection refused".to_string()))
        }
    }

    fn sample() -> Response {
        Response::clarification("Which time period?".to_string(), String::new())
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Total Revenue"), "total revenue");
        assert_eq!(normalize_key("  total   revenue \n"), "total revenue");
        assert_eq!(normalize_key("\tTOTAL\trevenue"), "total revenue");
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_miss() {
        let cache = ResponseCache::new(
            Arc::new(BrokenCache),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        cache.put("q", &sample()).await;
        assert!(cache.get("q").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let backend = Arc::new(InMemoryCache::new());
        backend
            .set("q", "{not json", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = ResponseCache::new(backend, Duration::from_secs(60), Duration::from_secs(1));
        assert!(cache.get("q").await.is_none());
    }

    #[tokio::test]
    async fn test_round_trip_through_memory_backend() {
        let cache = ResponseCache::new(
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        cache.put("q", &sample()).await;
        assert_eq!(cache.get("q").await, Some(sample()));
    }

    #[tokio::test]
    async fn test_noop_never_hits() {
        let cache = ResponseCache::new(
            Arc::new(NoopCache),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        cache.put("q", &sample()).await;
        assert!(cache.get("q").await.is_none());
    }
}
