//! 持久化层：客户、会话、消息、订单
//!
//! `Store` 是唯一的事实来源；缓存只持有副本。两种实现：
//! - `SqliteStore`：sqlx + SQLite，唯一索引保证「一个号码一个客户」「一个客户至多一个活跃会话」
//! - `InMemoryStore`：进程内实现，规则相同，用于开发与测试

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::StoreError;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// 消息方向
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(StoreError::Corrupt(format!("unknown direction '{}'", other))),
        }
    }
}

/// 发送方类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Customer,
    Agent,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Customer => "customer",
            SenderType::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "customer" => Ok(SenderType::Customer),
            "agent" => Ok(SenderType::Agent),
            other => Err(StoreError::Corrupt(format!("unknown sender_type '{}'", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "closed" => Ok(ConversationStatus::Closed),
            other => Err(StoreError::Corrupt(format!("unknown status '{}'", other))),
        }
    }
}

/// 订单状态；本系统不处理支付，新订单一律为待付款
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            other => Err(StoreError::Corrupt(format!("unknown order status '{}'", other))),
        }
    }
}

/// 客户：以去掉渠道前缀后的号码为唯一键
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub whatsapp_number: String,
    pub created_at: DateTime<Utc>,
}

/// 会话线程
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub customer_id: String,
    /// 冗余存储，便于直接投递
    pub whatsapp_number: String,
    pub status: ConversationStatus,
    pub started_at: DateTime<Utc>,
}

/// 一条入站或出站消息（只追加）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub direction: Direction,
    pub message_text: String,
    pub sender_type: SenderType,
    pub is_automated: bool,
    pub whatsapp_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 待写入的消息；`is_automated` 由 sender_type 推导
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub conversation_id: String,
    pub direction: Direction,
    pub message_text: String,
    pub sender_type: SenderType,
    pub whatsapp_message_id: Option<String>,
}

impl NewMessage {
    pub fn is_automated(&self) -> bool {
        self.sender_type == SenderType::Agent
    }
}

/// 订单行项目
///
/// 反序列化是宽松的：模型常把数量写成 `2.0`、把单价写成 `"12.50"` 或 `null`。
/// 读不出的数量按 1、读不出的单价按 0 处理，由店主确认。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value")]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    /// 单价估计；未知时为 0，由店主确认
    pub price: f64,
}

impl From<serde_json::Value> for OrderItem {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Object(map) => Self {
                name: map.get("name").map(lenient_text).unwrap_or_default(),
                quantity: map.get("quantity").and_then(lenient_quantity).unwrap_or(1),
                price: map.get("price").and_then(lenient_number).unwrap_or(0.0),
            },
            // 只写了商品名
            other => Self {
                name: lenient_text(&other),
                quantity: 1,
                price: 0.0,
            },
        }
    }
}

fn lenient_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 数字或数字字符串（允许货币符号前缀）
fn lenient_number(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s
            .trim()
            .trim_start_matches(['$', '€', '£'])
            .replace(',', "")
            .parse::<f64>()
            .ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn lenient_quantity(value: &serde_json::Value) -> Option<u32> {
    let q = lenient_number(value)?;
    (q >= 0.0 && q <= f64::from(u32::MAX)).then(|| q.round() as u32)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub conversation_id: Option<String>,
    pub status: OrderStatus,
    pub total: f64,
    pub items: Vec<OrderItem>,
    pub order_number: String,
    /// 触发建单的入站渠道消息 ID（幂等键）
    pub source_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub customer_id: String,
    pub conversation_id: Option<String>,
    pub items: Vec<OrderItem>,
    pub total: f64,
    pub order_number: String,
    pub source_message_id: Option<String>,
}

/// 持久化接口
///
/// 唯一性冲突返回 `StoreError::Conflict`，由调用方决定是否改为读取已有行。
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_customer_by_address(&self, address: &str)
        -> Result<Option<Customer>, StoreError>;

    /// 号码已存在时返回 Conflict
    async fn insert_customer(&self, address: &str) -> Result<Customer, StoreError>;

    /// 该客户最近开始的活跃会话
    async fn find_active_conversation(
        &self,
        customer_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// 该客户已有活跃会话时返回 Conflict
    async fn insert_conversation(
        &self,
        customer_id: &str,
        address: &str,
    ) -> Result<Conversation, StoreError>;

    async fn close_conversation(&self, conversation_id: &str) -> Result<(), StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError>;

    /// 最近 `limit` 条消息，按创建时间升序（最旧在前）
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    /// 会话全部消息，升序
    async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn find_order_by_source_message(
        &self,
        message_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    /// 以下为后台只读查询，均按时间倒序
    async fn list_customers(&self, limit: usize) -> Result<Vec<Customer>, StoreError>;

    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, StoreError>;

    async fn list_orders(&self, limit: usize) -> Result<Vec<Order>, StoreError>;

    /// 关闭连接等清理工作
    async fn close(&self) {}
}

/// 统一的时间戳文本格式：定长、UTC、微秒，字典序即时间序
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
