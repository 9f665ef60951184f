//! 消息记录：追加入站/出站消息，读取最近历史
//!
//! 可选的历史窗口缓存（`cache.history_enabled`）：按会话 ID 缓存最近消息，
//! 任何一次成功追加都会立即失效该会话的缓存，避免把过期上下文送给模型。
//!
//! 读库与写回缓存之间可能有并发追加。每个会话维护一个代数，追加时递增；
//! 读库前后代数不一致时不写回，写回后若代数已变则再次失效。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{Cache, HistoryWindow};
use crate::core::StoreError;
use crate::store::{Direction, MessageRecord, NewMessage, SenderType, Store};

pub struct MessageLog {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    /// None 表示不缓存历史
    history_ttl: Option<Duration>,
    /// 会话 ID → 追加代数
    generations: Mutex<HashMap<String, u64>>,
}

impl MessageLog {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache>, history_ttl: Option<Duration>) -> Self {
        Self {
            store,
            cache,
            history_ttl,
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// 锁中毒时返回 None，调用方按「已变化」处理
    fn generation(&self, conversation_id: &str) -> Option<u64> {
        let generations = self.generations.lock().ok()?;
        Some(generations.get(conversation_id).copied().unwrap_or(0))
    }

    fn bump_generation(&self, conversation_id: &str) {
        if let Ok(mut generations) = self.generations.lock() {
            *generations.entry(conversation_id.to_string()).or_insert(0) += 1;
        }
    }

    pub async fn append(
        &self,
        conversation_id: &str,
        direction: Direction,
        text: &str,
        sender_type: SenderType,
        channel_message_id: Option<&str>,
    ) -> Result<MessageRecord, StoreError> {
        let record = self
            .store
            .insert_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                direction,
                message_text: text.to_string(),
                sender_type,
                whatsapp_message_id: channel_message_id.map(String::from),
            })
            .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %record.id,
            "Stored {} message",
            direction.as_str()
        );

        if self.history_ttl.is_some() {
            self.bump_generation(conversation_id);
            self.cache.invalidate_history(conversation_id).await;
        }
        Ok(record)
    }

    /// 最近 `limit` 条消息，最旧在前
    pub async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let Some(ttl) = self.history_ttl else {
            return self.store.recent_messages(conversation_id, limit).await;
        };

        if let Some(window) = self.cache.get_history(conversation_id).await {
            if let Some(tail) = window.tail(limit) {
                tracing::debug!(conversation_id = %conversation_id, "History cache hit");
                return Ok(tail.to_vec());
            }
        }

        let before = self.generation(conversation_id);
        let messages = self.store.recent_messages(conversation_id, limit).await?;
        let window = HistoryWindow {
            limit,
            messages,
        };

        let unchanged = |now: Option<u64>| before.is_some() && now == before;
        if unchanged(self.generation(conversation_id)) {
            self.cache.set_history(conversation_id, &window, ttl).await;
            if !unchanged(self.generation(conversation_id)) {
                tracing::debug!(conversation_id = %conversation_id, "History changed during refill, dropping window");
                self.cache.invalidate_history(conversation_id).await;
            }
        }
        Ok(window.messages)
    }
}
