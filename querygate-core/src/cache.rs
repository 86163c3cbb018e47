//! Response caching (§1.1 ambient stack expansion): an optional layer in front of the query executor
//! keyed on entity + normalized request shape. Grounded on the donor's `prax-query/src/cache.rs`
//! `QueryCache` trait (get/put/invalidate over an opaque key), generalized to an async trait here since
//! every dialect executor is itself async.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

/// A cache of shaped Find results, keyed by whatever the caller derives from entity + normalized
/// request (typically entity name + filter/order/pagination signature).
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn put(&self, key: &str, value: Value);
    async fn invalidate(&self, key: &str);
    async fn invalidate_entity(&self, entity: &str);
}

/// Caching disabled — every `get` misses (the default when a data source sets no cache TTL).
#[derive(Debug, Default)]
pub struct NoopCache;

#[async_trait]
impl ResponseCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<Value> {
        None
    }
    async fn put(&self, _key: &str, _value: Value) {}
    async fn invalidate(&self, _key: &str) {}
    async fn invalidate_entity(&self, _entity: &str) {}
}

struct Entry {
    value: Value,
    expires_at: Instant,
    entity: String,
}

/// An in-process TTL cache. Entries are evicted lazily on `get`/`invalidate_entity` rather than by a
/// background sweep, matching how the donor's in-memory cache variant behaves.
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn shared(ttl: Duration) -> Arc<Self> {
        Arc::new(Self::new(ttl))
    }
}

#[async_trait]
impl ResponseCache for TtlCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: Value) {
        self.entries.lock().insert(
            key.to_string(),
            Entry { value, expires_at: Instant::now() + self.ttl, entity: entity_prefix(key).to_string() },
        );
    }

    async fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    async fn invalidate_entity(&self, entity: &str) {
        self.entries.lock().retain(|_, e| e.entity != entity);
    }
}

/// Cache keys are conventionally `"{entity}:{rest}"`; this extracts the entity prefix used for
/// `invalidate_entity`.
fn entity_prefix(key: &str) -> &str {
    key.split_once(':').map(|(entity, _)| entity).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_cache_never_returns_a_hit() {
        let cache = NoopCache;
        cache.put("Book:id=1", Value::Null).await;
        assert_eq!(cache.get("Book:id=1").await, None);
    }

    #[tokio::test]
    async fn ttl_cache_hits_then_expires() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.put("Book:id=1", Value::from(42)).await;
        assert_eq!(cache.get("Book:id=1").await, Some(Value::from(42)));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("Book:id=1").await, None);
    }

    #[tokio::test]
    async fn invalidate_entity_clears_only_that_entitys_keys() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.put("Book:id=1", Value::from(1)).await;
        cache.put("Review:id=1", Value::from(2)).await;
        cache.invalidate_entity("Book").await;
        assert_eq!(cache.get("Book:id=1").await, None);
        assert_eq!(cache.get("Review:id=1").await, Some(Value::from(2)));
    }
}
