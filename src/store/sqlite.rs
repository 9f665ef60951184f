//! SQLite 持久化（sqlx，异步）
//!
//! 表结构与后台面板共用：customers / conversations / messages / orders。
//! 唯一性由索引保证：
//! - `customers.whatsapp_number` 唯一
//! - `conversations(customer_id) WHERE status = 'active'` 部分唯一索引，同一客户至多一个活跃会话
//! - `orders(source_message_id) WHERE source_message_id IS NOT NULL` 部分唯一索引，一条入站消息至多一个订单

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{
    format_ts, new_id, parse_ts, Conversation, ConversationStatus, Customer, Direction,
    MessageRecord, NewMessage, NewOrder, Order, OrderItem, OrderStatus, SenderType, Store,
};
use crate::core::StoreError;

/// 异步 SQLite 存储
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 打开（必要时创建）数据库文件并建表
    pub async fn open(db_path: impl AsRef<Path>, max_connections: u32) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("create db dir: {}", e)))?;
            }
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(&db_url)
            .await
            .map_err(map_sqlx)?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS customers (
                id TEXT PRIMARY KEY,
                whatsapp_number TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                whatsapp_number TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                FOREIGN KEY (customer_id) REFERENCES customers(id)
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_one_active
                ON conversations(customer_id) WHERE status = 'active'",
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                message_text TEXT NOT NULL,
                sender_type TEXT NOT NULL,
                is_automated INTEGER NOT NULL,
                whatsapp_message_id TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at)",
            "CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                conversation_id TEXT,
                status TEXT NOT NULL,
                total REAL NOT NULL,
                items TEXT NOT NULL,
                order_number TEXT NOT NULL,
                source_message_id TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (customer_id) REFERENCES customers(id)
            )",
            // 旧版本的非唯一索引
            "DROP INDEX IF EXISTS idx_orders_source_message",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_one_per_source_message
                ON orders(source_message_id) WHERE source_message_id IS NOT NULL",
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(map_sqlx)?;
        }
        Ok(())
    }
}

/// sqlx 错误映射：唯一约束 → Conflict，解码失败 → Corrupt，其余视为不可用
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
            StoreError::Corrupt(e.to_string())
        }
        e => StoreError::Unavailable(e.to_string()),
    }
}

fn customer_from_row(row: &SqliteRow) -> Result<Customer, StoreError> {
    Ok(Customer {
        id: row.try_get("id").map_err(map_sqlx)?,
        whatsapp_number: row.try_get("whatsapp_number").map_err(map_sqlx)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(map_sqlx)?)?,
    })
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, StoreError> {
    Ok(Conversation {
        id: row.try_get("id").map_err(map_sqlx)?,
        customer_id: row.try_get("customer_id").map_err(map_sqlx)?,
        whatsapp_number: row.try_get("whatsapp_number").map_err(map_sqlx)?,
        status: ConversationStatus::parse(&row.try_get::<String, _>("status").map_err(map_sqlx)?)?,
        started_at: parse_ts(&row.try_get::<String, _>("started_at").map_err(map_sqlx)?)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<MessageRecord, StoreError> {
    Ok(MessageRecord {
        id: row.try_get("id").map_err(map_sqlx)?,
        conversation_id: row.try_get("conversation_id").map_err(map_sqlx)?,
        direction: Direction::parse(&row.try_get::<String, _>("direction").map_err(map_sqlx)?)?,
        message_text: row.try_get("message_text").map_err(map_sqlx)?,
        sender_type: SenderType::parse(
            &row.try_get::<String, _>("sender_type").map_err(map_sqlx)?,
        )?,
        is_automated: row.try_get("is_automated").map_err(map_sqlx)?,
        whatsapp_message_id: row.try_get("whatsapp_message_id").map_err(map_sqlx)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(map_sqlx)?)?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order, StoreError> {
    let items_json: String = row.try_get("items").map_err(map_sqlx)?;
    let items: Vec<OrderItem> = serde_json::from_str(&items_json)
        .map_err(|e| StoreError::Corrupt(format!("orders.items: {}", e)))?;
    Ok(Order {
        id: row.try_get("id").map_err(map_sqlx)?,
        customer_id: row.try_get("customer_id").map_err(map_sqlx)?,
        conversation_id: row.try_get("conversation_id").map_err(map_sqlx)?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status").map_err(map_sqlx)?)?,
        total: row.try_get("total").map_err(map_sqlx)?,
        items,
        order_number: row.try_get("order_number").map_err(map_sqlx)?,
        source_message_id: row.try_get("source_message_id").map_err(map_sqlx)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(map_sqlx)?)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_customer_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query(
            "SELECT id, whatsapp_number, created_at FROM customers WHERE whatsapp_number = ? LIMIT 1",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(customer_from_row).transpose()
    }

    async fn insert_customer(&self, address: &str) -> Result<Customer, StoreError> {
        let customer = Customer {
            id: new_id(),
            whatsapp_number: address.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO customers (id, whatsapp_number, created_at) VALUES (?, ?, ?)")
            .bind(&customer.id)
            .bind(&customer.whatsapp_number)
            .bind(format_ts(&customer.created_at))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(customer)
    }

    async fn find_active_conversation(
        &self,
        customer_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, customer_id, whatsapp_number, status, started_at
             FROM conversations
             WHERE customer_id = ? AND status = 'active'
             ORDER BY started_at DESC
             LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn insert_conversation(
        &self,
        customer_id: &str,
        address: &str,
    ) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: new_id(),
            customer_id: customer_id.to_string(),
            whatsapp_number: address.to_string(),
            status: ConversationStatus::Active,
            started_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO conversations (id, customer_id, whatsapp_number, status, started_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.customer_id)
        .bind(&conversation.whatsapp_number)
        .bind(conversation.status.as_str())
        .bind(format_ts(&conversation.started_at))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(conversation)
    }

    async fn close_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE conversations SET status = 'closed' WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("conversation '{}'", conversation_id)));
        }
        Ok(())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
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
        sqlx::query(
            "INSERT INTO messages
                (id, conversation_id, direction, message_text, sender_type, is_automated, whatsapp_message_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.conversation_id)
        .bind(record.direction.as_str())
        .bind(&record.message_text)
        .bind(record.sender_type.as_str())
        .bind(record.is_automated)
        .bind(&record.whatsapp_message_id)
        .bind(format_ts(&record.created_at))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(record)
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        // 取最新 N 条（倒序）后在内存中翻转为升序
        let rows = sqlx::query(
            "SELECT id, conversation_id, direction, message_text, sender_type, is_automated,
                    whatsapp_message_id, created_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, direction, message_text, sender_type, is_automated,
                    whatsapp_message_id, created_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(message_from_row).collect()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let items_json = serde_json::to_string(&order.items)
            .map_err(|e| StoreError::Corrupt(format!("orders.items: {}", e)))?;
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
        sqlx::query(
            "INSERT INTO orders
                (id, customer_id, conversation_id, status, total, items, order_number, source_message_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.customer_id)
        .bind(&record.conversation_id)
        .bind(record.status.as_str())
        .bind(record.total)
        .bind(&items_json)
        .bind(&record.order_number)
        .bind(&record.source_message_id)
        .bind(format_ts(&record.created_at))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(record)
    }

    async fn find_order_by_source_message(
        &self,
        message_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            "SELECT id, customer_id, conversation_id, status, total, items, order_number,
                    source_message_id, created_at
             FROM orders WHERE source_message_id = ? LIMIT 1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_customers(&self, limit: usize) -> Result<Vec<Customer>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, whatsapp_number, created_at FROM customers ORDER BY created_at DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(customer_from_row).collect()
    }

    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, customer_id, whatsapp_number, status, started_at
             FROM conversations ORDER BY started_at DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn list_orders(&self, limit: usize) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, customer_id, conversation_id, status, total, items, order_number,
                    source_message_id, created_at
             FROM orders ORDER BY created_at DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(order_from_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
