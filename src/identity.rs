//! 客户身份解析
//!
//! 渠道地址（`whatsapp:+254712345678`）→ 去前缀 → 缓存 → 数据库 → 新建。
//! 多实例并发首条消息时可能同时走到「新建」，唯一约束冲突按「重新读取已有行」处理。

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::core::StoreError;
use crate::store::{Customer, Store};

/// WhatsApp 渠道地址前缀
pub const CHANNEL_PREFIX: &str = "whatsapp:";

/// 去掉渠道前缀与首尾空白
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix(CHANNEL_PREFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// 解析结果来自哪里；未找到即创建，不视为错误
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Cached,
    Found,
    Created,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub resolution: Resolution,
}

impl<T> Resolved<T> {
    pub fn new(value: T, resolution: Resolution) -> Self {
        Self { value, resolution }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// 身份解析器（缓存优先）
pub struct IdentityResolver {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    customer_ttl: Duration,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache>, customer_ttl: Duration) -> Self {
        Self {
            store,
            cache,
            customer_ttl,
        }
    }

    pub async fn resolve_customer(&self, address: &str) -> Result<Resolved<Customer>, StoreError> {
        let address = normalize_address(address);
        if address.is_empty() {
            return Err(StoreError::InvalidInput("empty channel address".to_string()));
        }

        if let Some(customer) = self.cache.get_customer(&address).await {
            tracing::debug!(customer_id = %customer.id, "Cache hit for customer {}", address);
            return Ok(Resolved::new(customer, Resolution::Cached));
        }

        if let Some(customer) = self.store.find_customer_by_address(&address).await? {
            tracing::info!(customer_id = %customer.id, "Found existing customer");
            self.remember(&address, &customer).await;
            return Ok(Resolved::new(customer, Resolution::Found));
        }

        match self.store.insert_customer(&address).await {
            Ok(customer) => {
                tracing::info!(customer_id = %customer.id, "Created new customer");
                self.remember(&address, &customer).await;
                Ok(Resolved::new(customer, Resolution::Created))
            }
            Err(StoreError::Conflict(reason)) => {
                // 另一个任务抢先创建了同一号码
                tracing::info!("Customer insert raced ({}), re-reading", reason);
                let customer = self
                    .store
                    .find_customer_by_address(&address)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("customer '{}'", address)))?;
                self.remember(&address, &customer).await;
                Ok(Resolved::new(customer, Resolution::Found))
            }
            Err(e) => Err(e),
        }
    }

    async fn remember(&self, address: &str, customer: &Customer) {
        if !self.cache.set_customer(address, customer, self.customer_ttl).await {
            tracing::debug!("Customer not cached (backend: {})", self.cache.backend());
        }
    }
}
