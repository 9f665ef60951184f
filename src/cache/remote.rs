//! 网络缓存（Redis 命令 over HTTP，兼容 Upstash REST 协议）
//!
//! 请求：`POST <url>`，body 为 JSON 命令数组，如 `["SET", key, value, "EX", "300"]`，Bearer 鉴权。
//! 响应：`{"result": ...}` 或 `{"error": "..."}`。过期由服务端 `EX` 负责。
//!
//! 启动探测失败或请求遇到连接错误时切换为禁用：get 返回未命中，set/delete 返回 false。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::Cache;
use crate::core::CacheError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Value,
    error: Option<String>,
}

/// 网络缓存客户端
pub struct RemoteCache {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    enabled: AtomicBool,
}

impl RemoteCache {
    /// 创建并探测（PING）；探测失败则以禁用状态返回
    pub async fn connect(url: &str, token: Option<&str>) -> Self {
        let cache = Self::new(url, token);
        if let Err(e) = cache.command(json!(["PING"])).await {
            tracing::error!("Remote cache probe failed, cache disabled: {}", e);
            cache.disable();
        }
        cache
    }

    /// 仅创建，不探测
    pub fn new(url: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    async fn command(&self, cmd: Value) -> Result<Value, CacheError> {
        let mut req = self.client.post(&self.url).json(&cmd);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                self.disable();
            }
            CacheError::Unavailable(e.to_string())
        })?;

        if !resp.status().is_success() {
            return Err(CacheError::Unavailable(format!("HTTP {}", resp.status())));
        }

        let body: CommandResponse = resp
            .json()
            .await
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        match body.error {
            Some(err) => Err(CacheError::Unavailable(err)),
            None => Ok(body.result),
        }
    }
}

/// 服务端 EX 以秒计，不足 1 秒按 1 秒
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

#[async_trait]
impl Cache for RemoteCache {
    async fn get(&self, key: &str) -> Option<Value> {
        if !self.is_enabled() {
            return None;
        }
        match self.command(json!(["GET", key])).await {
            Ok(Value::String(raw)) => match serde_json::from_str(&raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Remote cache value for {} is not JSON: {}", key, e);
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                tracing::error!("Remote cache get error for key {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let cmd = json!(["SET", key, value.to_string(), "EX", ttl_secs(ttl).to_string()]);
        match self.command(cmd).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Remote cache set error for key {}: {}", key, e);
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.command(json!(["DEL", key])).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Remote cache delete error for key {}: {}", key, e);
                false
            }
        }
    }

    fn backend(&self) -> &'static str {
        "remote"
    }
}
