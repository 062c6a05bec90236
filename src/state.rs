//! Shared application state / 共享应用状态

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use sqlx::MySqlPool;

use searchlight_backend::es::EsClient;
use searchlight_backend::sync::blocked::BlocklistSync;
use searchlight_backend::sync::claims::ClaimSync;
use searchlight_backend::sync::counters::CounterSync;

/// State shared by every request handler / 所有请求处理器共享的状态
pub struct AppState {
    pub db: MySqlPool,
    pub es: EsClient,
    pub search_cache: SearchCache,
    /// Searches served since startup / 启动以来服务的搜索次数
    pub total_searches: AtomicU64,
    pub claim_sync: Arc<ClaimSync>,
    pub counter_sync: Arc<CounterSync>,
    pub blocklist_sync: Arc<BlocklistSync>,
}

struct CacheEntry {
    stored_at: Instant,
    value: Arc<Value>,
}

/// Response cache keyed by full request URI / 以完整URI为键的响应缓存
///
/// Entries expire after the configured TTL; expired entries are swept
/// on every insert so the map never grows unbounded.
pub struct SearchCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, key: String, value: Arc<Value>) {
        let mut entries = self.entries.write();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                value,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_hit_within_ttl() {
        let cache = SearchCache::new(Duration::from_secs(60));
        cache.put("k".to_string(), Arc::new(json!([1, 2])));
        assert_eq!(*cache.get("k").unwrap(), json!([1, 2]));
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn test_cache_expires() {
        let cache = SearchCache::new(Duration::from_secs(0));
        cache.put("k".to_string(), Arc::new(json!([])));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_cache_sweeps_expired_on_insert() {
        let cache = SearchCache::new(Duration::from_secs(0));
        cache.put("a".to_string(), Arc::new(json!(1)));
        cache.put("b".to_string(), Arc::new(json!(2)));
        assert_eq!(cache.entries.read().len(), 1);
    }
}
