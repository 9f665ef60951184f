//! 订单：从模型回复中提取 `<ORDER_DETAILS>` 结构化块并建单
//!
//! 块内须是含 `items` 数组与数值 `total` 的 JSON；缺失或格式错误一律视为「没有订单」。
//! 行项目字段宽松读取，见 [`OrderItem`]。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;

use crate::core::StoreError;
use crate::store::{NewOrder, Order, OrderItem, Store};

/// 结构块被剥离后回复为空时发送的确认语
pub const ORDER_ACK: &str = "Thanks! Your order has been noted. The store owner will contact you shortly to arrange payment and delivery.";

static ORDER_BLOCK_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn order_block_re() -> Option<&'static Regex> {
    ORDER_BLOCK_RE
        .get_or_init(|| Regex::new(r"(?s)<ORDER_DETAILS>(.*?)</ORDER_DETAILS>").ok())
        .as_ref()
}

/// 模型给出的订单内容
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct OrderPayload {
    pub items: Vec<OrderItem>,
    pub total: f64,
}

/// 回复拆分结果：发给客户的文本 + 可选订单
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedReply {
    pub text: String,
    pub order: Option<OrderPayload>,
}

/// 解析第一个订单块（若有）
pub fn extract_order(reply: &str) -> Option<OrderPayload> {
    let caps = order_block_re()?.captures(reply)?;
    let raw = caps.get(1)?.as_str().trim();
    match serde_json::from_str::<OrderPayload>(raw) {
        Ok(payload) if payload.total.is_finite() => Some(payload),
        Ok(_) => {
            tracing::warn!("Order payload has a non-finite total, ignoring");
            None
        }
        Err(e) => {
            tracing::warn!("Malformed order payload, ignoring: {}", e);
            None
        }
    }
}

/// 去掉所有订单块；剩余为空时用 ORDER_ACK
pub fn strip_order_block(reply: &str) -> String {
    let Some(re) = order_block_re() else {
        return reply.to_string();
    };
    let stripped = re.replace_all(reply, "");
    let stripped = stripped.trim();
    if stripped.is_empty() {
        ORDER_ACK.to_string()
    } else {
        stripped.to_string()
    }
}

/// 拆分模型回复；没有订单块时文本原样返回
pub fn parse_reply(reply: &str) -> ParsedReply {
    let has_block = order_block_re().is_some_and(|re| re.is_match(reply));
    if !has_block {
        return ParsedReply {
            text: reply.to_string(),
            order: None,
        };
    }
    ParsedReply {
        text: strip_order_block(reply),
        order: extract_order(reply),
    }
}

/// 订单号：`ORD-<unix 秒>-<6 位十六进制>`
pub fn generate_order_number() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!("ORD-{}-{}", chrono::Utc::now().timestamp(), suffix)
}

/// 建单（可选按入站消息 ID 去重）
pub struct OrderDesk {
    store: Arc<dyn Store>,
    dedupe_by_message_id: bool,
}

impl OrderDesk {
    pub fn new(store: Arc<dyn Store>, dedupe_by_message_id: bool) -> Self {
        Self {
            store,
            dedupe_by_message_id,
        }
    }

    /// 返回新建或已存在的订单
    ///
    /// 去重开启时入站消息 ID 作为幂等键写入订单；并发重试撞上唯一索引时改为读取已有订单。
    /// 去重关闭时不记录该键。
    pub async fn place(
        &self,
        customer_id: &str,
        conversation_id: &str,
        payload: OrderPayload,
        source_message_id: Option<&str>,
    ) -> Result<Order, StoreError> {
        let dedupe_key = source_message_id
            .filter(|id| !id.is_empty())
            .filter(|_| self.dedupe_by_message_id);

        if let Some(id) = dedupe_key {
            if let Some(existing) = self.store.find_order_by_source_message(id).await? {
                tracing::info!(
                    order_number = %existing.order_number,
                    message_sid = %id,
                    "Order already created for this message, skipping"
                );
                return Ok(existing);
            }
        }

        let inserted = self
            .store
            .insert_order(NewOrder {
                customer_id: customer_id.to_string(),
                conversation_id: Some(conversation_id.to_string()),
                items: payload.items,
                total: payload.total,
                order_number: generate_order_number(),
                source_message_id: dedupe_key.map(String::from),
            })
            .await;

        let order = match (inserted, dedupe_key) {
            (Ok(order), _) => order,
            (Err(StoreError::Conflict(_)), Some(id)) => {
                tracing::debug!(message_sid = %id, "Concurrent order insert, re-reading");
                return self
                    .store
                    .find_order_by_source_message(id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("order for message {}", id)));
            }
            (Err(e), _) => return Err(e),
        };
        tracing::info!(
            customer_id = %customer_id,
            "Created order {} (total {:.2})",
            order.order_number,
            order.total
        );
        Ok(order)
    }
}
