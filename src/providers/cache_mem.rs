//! In-memory `TaskCache` implementation, backed by a mutex-guarded map.

use crate::cache::{CacheEntry, Result, TaskCache};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.store.read().await.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        self.store.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.store.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn round_trips_and_invalidates() {
        let cache = InMemoryCache::new();
        assert!(cache.get("k").await.unwrap().is_none());
        cache
            .set(CacheEntry {
                key: "k".to_string(),
                output: serde_json::json!(1),
                cached_at: Utc::now(),
                ttl_ms: 1000,
                stale_ttl_ms: 1000,
            })
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        cache.invalidate("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
