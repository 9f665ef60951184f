//! 进程内 TTL 缓存
//!
//! 无容量上限、无后台清理；过期只在读取时检查，过期条目在读取时删除。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::Cache;

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// 进程内缓存，多任务共享，后写者覆盖
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存放的条目数（含尚未被读取清理的过期条目）
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
            }
        }

        // 已过期：升级为写锁后复查，避免删掉刚被其他任务覆盖的新值
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(key);
            } else {
                return Some(entry.value.clone());
            }
        }
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool {
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            tracing::warn!("Cache ttl overflow for key {}", key);
            return false;
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_before_expiry() {
        let cache = InMemoryCache::new();
        assert!(cache.set("k", Value::from("v"), Duration::from_secs(60)).await);
        assert_eq!(cache.get("k").await, Some(Value::from("v")));
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_on_read() {
        let cache = InMemoryCache::new();
        cache.set("k", Value::from("v"), Duration::from_millis(30)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        // 读取前条目仍在（无后台清理）
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites_and_refreshes_ttl() {
        let cache = InMemoryCache::new();
        cache.set("k", Value::from(1), Duration::from_millis(30)).await;
        cache.set("k", Value::from(2), Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await, Some(Value::from(2)));
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", Value::from(1), Duration::from_secs(60)).await;
        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
        assert!(cache.get("k").await.is_none());
    }
}
