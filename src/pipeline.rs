//! 会话编排流水线
//!
//! 一条入站消息依次经过：
//! `Received → Identified → Threaded → LoggedIn → Generated → LoggedOut → Delivered`
//!
//! - 身份 / 会话 / 入站写入 / 出站写入失败：转入 `FailedReplySent`，向原地址发送致歉
//! - 致歉也发不出去：`FailedSilent`，只留日志
//! - 生成失败：在 responder 中已吸收为兜底文本，不中止
//! - 投递失败：出站记录已落库，`FailedSilent`，不重试、不回滚
//!
//! 出站消息总是先写库再投递。同一会话的并发消息之间没有互斥。

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::channel::Channel;
use crate::core::StoreError;
use crate::history::MessageLog;
use crate::identity::{normalize_address, IdentityResolver};
use crate::llm::LlmClient;
use crate::order::{parse_reply, OrderDesk};
use crate::responder::{Outcome, Responder};
use crate::store::{Direction, Order, SenderType, Store};
use crate::thread::ThreadResolver;

/// 流程内部出错时发给客户的致歉
pub const APOLOGY_REPLY: &str = "Sorry, I'm having trouble right now. Please try again in a moment.";

/// 流水线状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Identified,
    Threaded,
    LoggedIn,
    Generated,
    LoggedOut,
    Delivered,
    FailedReplySent,
    FailedSilent,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Identified => "identified",
            Stage::Threaded => "threaded",
            Stage::LoggedIn => "logged_in",
            Stage::Generated => "generated",
            Stage::LoggedOut => "logged_out",
            Stage::Delivered => "delivered",
            Stage::FailedReplySent => "failed_reply_sent",
            Stage::FailedSilent => "failed_silent",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Delivered | Stage::FailedReplySent | Stage::FailedSilent
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 渠道推送的一条入站消息
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// 渠道地址，可能带 `whatsapp:` 前缀
    pub from: String,
    pub body: String,
    /// 渠道消息 ID；为空表示未知
    pub message_sid: String,
}

impl InboundMessage {
    pub fn new(from: impl Into<String>, body: impl Into<String>, message_sid: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            body: body.into(),
            message_sid: message_sid.into(),
        }
    }

    fn sid(&self) -> Option<&str> {
        Some(self.message_sid.as_str()).filter(|s| !s.is_empty())
    }
}

/// 单次处理的结果与经过的全部状态
#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    pub trace: Vec<Stage>,
    pub customer_id: Option<String>,
    pub conversation_id: Option<String>,
    /// 实际发给客户的文本（回复或致歉）
    pub reply: Option<String>,
    pub used_fallback: bool,
    pub order: Option<Order>,
    pub delivery_id: Option<String>,
}

impl PipelineReport {
    pub fn final_stage(&self) -> Stage {
        self.trace.last().copied().unwrap_or(Stage::Received)
    }

    pub fn reached(&self, stage: Stage) -> bool {
        self.trace.contains(&stage)
    }

    fn advance(&mut self, stage: Stage) {
        self.trace.push(stage);
    }
}

/// 流水线参数
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub history_limit: usize,
    pub customer_ttl: Duration,
    /// None 表示不缓存历史窗口
    pub history_ttl: Option<Duration>,
    pub dedupe_orders: bool,
    pub system_prompt: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            history_limit: 10,
            customer_ttl: Duration::from_secs(1800),
            history_ttl: None,
            dedupe_orders: true,
            system_prompt: crate::responder::DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

pub struct Pipeline {
    identity: IdentityResolver,
    threads: ThreadResolver,
    log: MessageLog,
    responder: Responder,
    orders: OrderDesk,
    channel: Arc<dyn Channel>,
    history_limit: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        llm: Arc<dyn LlmClient>,
        channel: Arc<dyn Channel>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(store.clone(), cache.clone(), settings.customer_ttl),
            threads: ThreadResolver::new(store.clone()),
            log: MessageLog::new(store.clone(), cache, settings.history_ttl),
            responder: Responder::new(llm, settings.system_prompt),
            orders: OrderDesk::new(store, settings.dedupe_orders),
            channel,
            history_limit: settings.history_limit,
        }
    }

    /// 处理一条入站消息直到终态；不返回错误
    pub async fn handle(&self, inbound: &InboundMessage) -> PipelineReport {
        let mut report = PipelineReport::default();
        report.advance(Stage::Received);
        tracing::info!(
            message_sid = %inbound.message_sid,
            "Processing message from {}",
            inbound.from
        );

        if let Err(e) = self.run(inbound, &mut report).await {
            tracing::error!(
                message_sid = %inbound.message_sid,
                stage = %report.final_stage(),
                "Error processing message: {}",
                e
            );
            self.apologize(inbound, &mut report).await;
        }

        let (_, _, tokens_total) = self.responder.token_usage();
        tracing::info!(
            message_sid = %inbound.message_sid,
            customer_id = report.customer_id.as_deref().unwrap_or("-"),
            conversation_id = report.conversation_id.as_deref().unwrap_or("-"),
            tokens_total,
            "Message finished in state {}",
            report.final_stage()
        );
        report
    }

    /// 存储错误向上返回，由 handle 转入致歉路径；投递失败在此处终结
    async fn run(&self, inbound: &InboundMessage, report: &mut PipelineReport) -> Result<(), StoreError> {
        let customer = self.identity.resolve_customer(&inbound.from).await?.into_inner();
        report.customer_id = Some(customer.id.clone());
        report.advance(Stage::Identified);

        let conversation = self
            .threads
            .resolve_active_conversation(&customer.id, &customer.whatsapp_number)
            .await?
            .into_inner();
        report.conversation_id = Some(conversation.id.clone());
        report.advance(Stage::Threaded);

        self.log
            .append(
                &conversation.id,
                Direction::Inbound,
                &inbound.body,
                SenderType::Customer,
                inbound.sid(),
            )
            .await?;
        report.advance(Stage::LoggedIn);

        let history = match self.log.recent(&conversation.id, self.history_limit).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    "History unavailable, generating without context: {}",
                    e
                );
                Vec::new()
            }
        };
        let generated = self.responder.generate(&inbound.body, &history).await;
        report.used_fallback = generated.outcome != Outcome::Model;
        let parsed = parse_reply(&generated.text);
        report.advance(Stage::Generated);

        self.log
            .append(
                &conversation.id,
                Direction::Outbound,
                &parsed.text,
                SenderType::Agent,
                None,
            )
            .await?;
        report.reply = Some(parsed.text.clone());
        report.advance(Stage::LoggedOut);

        if let Some(payload) = parsed.order {
            match self
                .orders
                .place(&customer.id, &conversation.id, payload, inbound.sid())
                .await
            {
                Ok(order) => report.order = Some(order),
                Err(e) => tracing::error!(
                    customer_id = %customer.id,
                    conversation_id = %conversation.id,
                    "Failed to create order: {}",
                    e
                ),
            }
        }

        match self
            .channel
            .send_text(&conversation.whatsapp_number, &parsed.text)
            .await
        {
            Ok(delivery_id) => {
                report.delivery_id = Some(delivery_id);
                report.advance(Stage::Delivered);
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation.id,
                    "Delivery failed, reply is stored but not sent: {}",
                    e
                );
                report.advance(Stage::FailedSilent);
            }
        }
        Ok(())
    }

    async fn apologize(&self, inbound: &InboundMessage, report: &mut PipelineReport) {
        report.advance(Stage::FailedReplySent);
        report.reply = Some(APOLOGY_REPLY.to_string());

        let to = normalize_address(&inbound.from);
        match self.channel.send_text(&to, APOLOGY_REPLY).await {
            Ok(delivery_id) => report.delivery_id = Some(delivery_id),
            Err(e) => {
                tracing::error!(
                    message_sid = %inbound.message_sid,
                    "Failed to send error message to user: {}",
                    e
                );
                report.advance(Stage::FailedSilent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_and_terminals() {
        assert_eq!(Stage::LoggedOut.to_string(), "logged_out");
        assert!(Stage::Delivered.is_terminal());
        assert!(Stage::FailedSilent.is_terminal());
        assert!(!Stage::Generated.is_terminal());
    }

    #[test]
    fn test_report_tracks_final_stage() {
        let mut report = PipelineReport::default();
        assert_eq!(report.final_stage(), Stage::Received);
        report.advance(Stage::Received);
        report.advance(Stage::Identified);
        assert_eq!(report.final_stage(), Stage::Identified);
        assert!(report.reached(Stage::Received));
        assert!(!report.reached(Stage::Threaded));
    }

    #[test]
    fn test_inbound_sid_empty_is_none() {
        assert_eq!(InboundMessage::new("a", "b", "").sid(), None);
        assert_eq!(InboundMessage::new("a", "b", "SM1").sid(), Some("SM1"));
    }
}
