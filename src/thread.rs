//! 会话线程解析
//!
//! 每次都读数据库（不走缓存），保证「一个客户至多一个活跃会话」以存储为准。
//! 并发创建由存储层的部分唯一索引兜底：插入冲突时重新读取已存在的活跃会话。

use std::sync::Arc;

use crate::core::StoreError;
use crate::identity::{Resolution, Resolved};
use crate::store::{Conversation, Store};

pub struct ThreadResolver {
    store: Arc<dyn Store>,
}

impl ThreadResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// 返回该客户的活跃会话；没有则新建
    pub async fn resolve_active_conversation(
        &self,
        customer_id: &str,
        address: &str,
    ) -> Result<Resolved<Conversation>, StoreError> {
        if let Some(conv) = self.store.find_active_conversation(customer_id).await? {
            tracing::info!(conversation_id = %conv.id, "Found active conversation");
            return Ok(Resolved::new(conv, Resolution::Found));
        }

        match self.store.insert_conversation(customer_id, address).await {
            Ok(conv) => {
                tracing::info!(conversation_id = %conv.id, "Created new conversation");
                Ok(Resolved::new(conv, Resolution::Created))
            }
            Err(StoreError::Conflict(reason)) => {
                tracing::info!("Conversation insert raced ({}), re-reading", reason);
                let conv = self
                    .store
                    .find_active_conversation(customer_id)
                    .await?
                    .ok_or_else(|| {
                        StoreError::NotFound(format!(
                            "active conversation for customer '{}'",
                            customer_id
                        ))
                    })?;
                Ok(Resolved::new(conv, Resolution::Found))
            }
            Err(e) => Err(e),
        }
    }
}
