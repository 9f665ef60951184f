//! TTL 缓存
//!
//! 统一接口 `Cache`（get / set / delete + 领域辅助方法），三种后端按配置选择：
//! - `InMemoryCache`：进程内 HashMap，读时惰性过期
//! - `RemoteCache`：网络缓存服务，服务端过期；连接失败时降级为禁用
//! - `DisabledCache`：永远未命中
//!
//! 缓存只是副本，任何故障都表现为未命中，错误不会传到调用方。

pub mod memory;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CacheSection;
use crate::core::CacheError;
use crate::store::{Customer, MessageRecord};

pub use memory::InMemoryCache;
pub use remote::RemoteCache;

pub fn customer_key(address: &str) -> String {
    format!("customer:{}", address)
}

pub fn history_key(conversation_id: &str) -> String {
    format!("conversation:history:{}", conversation_id)
}

/// 缓存的历史窗口：以 `limit` 查询得到的最近消息（升序）
///
/// 对任意 `n <= limit` 的请求，取其末尾 n 条即可。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryWindow {
    pub limit: usize,
    pub messages: Vec<MessageRecord>,
}

impl HistoryWindow {
    /// 能满足 `limit` 条请求时返回末尾切片
    pub fn tail(&self, limit: usize) -> Option<&[MessageRecord]> {
        if limit > self.limit {
            return None;
        }
        let skip = self.messages.len().saturating_sub(limit);
        Some(&self.messages[skip..])
    }
}

/// 缓存接口：值为 JSON，ttl 自调用时起算
#[async_trait]
pub trait Cache: Send + Sync {
    /// 未命中、已过期或后端故障均返回 None
    async fn get(&self, key: &str) -> Option<Value>;

    /// 写入成功返回 true；后端禁用或故障返回 false
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool;

    async fn delete(&self, key: &str) -> bool;

    /// 后端名称（日志 / 健康检查用）
    fn backend(&self) -> &'static str;

    async fn get_customer(&self, address: &str) -> Option<Customer> {
        decode(&customer_key(address), self.get(&customer_key(address)).await?)
    }

    async fn set_customer(&self, address: &str, customer: &Customer, ttl: Duration) -> bool {
        match encode(customer) {
            Some(v) => self.set(&customer_key(address), v, ttl).await,
            None => false,
        }
    }

    async fn get_history(&self, conversation_id: &str) -> Option<HistoryWindow> {
        decode(
            &history_key(conversation_id),
            self.get(&history_key(conversation_id)).await?,
        )
    }

    async fn set_history(
        &self,
        conversation_id: &str,
        window: &HistoryWindow,
        ttl: Duration,
    ) -> bool {
        match encode(window) {
            Some(v) => self.set(&history_key(conversation_id), v, ttl).await,
            None => false,
        }
    }

    async fn invalidate_history(&self, conversation_id: &str) -> bool {
        self.delete(&history_key(conversation_id)).await
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Option<Value> {
    serde_json::to_value(value)
        .map_err(|e| CacheError::Serialization(e.to_string()))
        .map_err(|e| tracing::warn!("Cache encode skipped: {}", e))
        .ok()
}

/// 结构不符的缓存值按未命中处理（例如升级后旧格式残留）
fn decode<T: serde::de::DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    serde_json::from_value(value)
        .map_err(|e| CacheError::Serialization(e.to_string()))
        .map_err(|e| tracing::warn!("Cache value for {} ignored: {}", key, e))
        .ok()
}

/// 禁用的缓存：所有读取未命中，所有写入返回 false
#[derive(Debug, Default)]
pub struct DisabledCache;

#[async_trait]
impl Cache for DisabledCache {
    async fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> bool {
        false
    }

    async fn delete(&self, _key: &str) -> bool {
        false
    }

    fn backend(&self) -> &'static str {
        "disabled"
    }
}

/// 按配置创建缓存；远程后端探测失败时自身降级为禁用，不影响启动
pub async fn create_cache(section: &CacheSection) -> Arc<dyn Cache> {
    match section.backend.as_str() {
        "remote" => match section.remote_url.as_deref() {
            Some(url) => {
                let cache = RemoteCache::connect(url, section.remote_token.as_deref()).await;
                tracing::info!("Using remote cache at {} (enabled: {})", url, cache.is_enabled());
                Arc::new(cache)
            }
            None => {
                tracing::warn!("Remote cache selected without remote_url, cache disabled");
                Arc::new(DisabledCache)
            }
        },
        "disabled" => {
            tracing::info!("Cache disabled by configuration");
            Arc::new(DisabledCache)
        }
        _ => {
            tracing::info!("Using in-memory cache");
            Arc::new(InMemoryCache::new())
        }
    }
}
