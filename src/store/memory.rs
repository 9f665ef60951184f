//! 进程内存储
//!
//! 所有表放在同一把锁下，「查重 + 插入」在锁内完成，等价于数据库的唯一约束。

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    new_id, Conversation, ConversationStatus, Customer, MessageRecord, NewMessage, NewOrder,
    Order, OrderStatus, Store,
};
use crate::core::StoreError;

#[derive(Default)]
struct Tables {
    customers: Vec<Customer>,
    conversations: Vec<Conversation>,
    /// 按插入顺序排列，时间戳相同时以插入顺序为准
    messages: Vec<MessageRecord>,
    orders: Vec<Order>,
}

/// 内存存储，重启即丢失
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试辅助：各表行数 (customers, conversations, messages, orders)
    pub async fn counts(&self) -> (usize, usize, usize, usize) {
        let t = self.tables.read().await;
        (
            t.customers.len(),
            t.conversations.len(),
            t.messages.len(),
            t.orders.len(),
        )
    }

    /// 测试辅助：全部消息（插入顺序）
    pub async fn all_messages(&self) -> Vec<MessageRecord> {
        self.tables.read().await.messages.clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_customer_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.customers.iter().find(|c| c.whatsapp_number == address).cloned())
    }

    async fn insert_customer(&self, address: &str) -> Result<Customer, StoreError> {
        let mut t = self.tables.write().await;
        if t.customers.iter().any(|c| c.whatsapp_number == address) {
            return Err(StoreError::Conflict(format!(
                "customers.whatsapp_number '{}'",
                address
            )));
        }
        let customer = Customer {
            id: new_id(),
            whatsapp_number: address.to_string(),
            created_at: Utc::now(),
        };
        t.customers.push(customer.clone());
        Ok(customer)
    }

    async fn find_active_conversation(
        &self,
        customer_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.conversations
            .iter()
            .filter(|c| c.customer_id == customer_id && c.status == ConversationStatus::Active)
            .max_by_key(|c| c.started_at)
            .cloned())
    }

    async fn insert_conversation(
        &self,
        customer_id: &str,
        address: &str,
    ) -> Result<Conversation, StoreError> {
        let mut t = self.tables.write().await;
        if t
            .conversations
            .iter()
            .any(|c| c.customer_id == customer_id && c.status == ConversationStatus::Active)
        {
            return Err(StoreError::Conflict(format!(
                "active conversation for customer '{}'",
                customer_id
            )));
        }
        let conversation = Conversation {
            id: new_id(),
            customer_id: customer_id.to_string(),
            whatsapp_number: address.to_string(),
            status: ConversationStatus::Active,
            started_at: Utc::now(),
        };
        t.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn close_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let conv = t
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation '{}'", conversation_id)))?;
        conv.status = ConversationStatus::Closed;
        Ok(())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
        let mut t = self.tables.write().await;
        let record = MessageRecord {
            id: new_id(),
            is_automated: message.is_automated(),
            conversation_id: message.conversation_id,
            direction: message.direction,
            message_text: message.message_text,
            sender_type: message.sender_type,
            whatsapp_message_id: message.whatsapp_message_id,
            created_at: Utc::now(),
        };
        t.messages.push(record.clone());
        Ok(record)
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let t = self.tables.read().await;
        let mut messages: Vec<MessageRecord> = t
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        // sort_by_key 为稳定排序，同一时间戳保持插入顺序
        messages.sort_by_key(|m| m.created_at);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.recent_messages(conversation_id, usize::MAX).await
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut t = self.tables.write().await;
        if let Some(source) = order.source_message_id.as_deref() {
            if t.orders.iter().any(|o| o.source_message_id.as_deref() == Some(source)) {
                return Err(StoreError::Conflict(format!(
                    "orders.source_message_id '{}'",
                    source
                )));
            }
        }
        let record = Order {
            id: new_id(),
            customer_id: order.customer_id,
            conversation_id: order.conversation_id,
            status: OrderStatus::PendingPayment,
            total: order.total,
            items: order.items,
            order_number: order.order_number,
            source_message_id: order.source_message_id,
            created_at: Utc::now(),
        };
        t.orders.push(record.clone());
        Ok(record)
    }

    async fn find_order_by_source_message(
        &self,
        message_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.orders
            .iter()
            .find(|o| o.source_message_id.as_deref() == Some(message_id))
            .cloned())
    }

    async fn list_customers(&self, limit: usize) -> Result<Vec<Customer>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.customers.iter().rev().take(limit).cloned().collect())
    }

    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.conversations.iter().rev().take(limit).cloned().collect())
    }

    async fn list_orders(&self, limit: usize) -> Result<Vec<Order>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.orders.iter().rev().take(limit).cloned().collect())
    }
}
