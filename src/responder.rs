//! 回复生成适配器
//!
//! 组装提示词（系统指令 + 有界历史 + 当前消息），调用 LlmClient；
//! 任何 GeneratorError 都在这里吸收为固定兜底文本，调用方总能拿到一段可发送的回复。

use std::path::Path;
use std::sync::Arc;

use crate::core::GeneratorError;
use crate::llm::{LlmClient, Message};
use crate::store::{MessageRecord, SenderType};

/// 生成失败时发给客户的兜底文本
pub const FALLBACK_REPLY: &str = "I'm having a little trouble right now. Could you try again? 😊";

/// 未配置提示词文件时使用的系统指令
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are \"SalesBot\", a friendly sales assistant for a boutique e-commerce store. \
Help customers find products and take their orders; you never process payments. \
When a customer confirms an order, append it as \
<ORDER_DETAILS>{\"items\":[{\"name\":\"Product Name\",\"quantity\":1,\"price\":0}],\"total\":0}</ORDER_DETAILS> \
and tell them the store owner will contact them about payment and delivery. Keep replies short.";

/// 读取系统提示词文件；不存在或为空时回退到内置指令
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
        Ok(_) => {
            tracing::warn!("System prompt file {} is empty, using built-in prompt", path.display());
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            tracing::warn!("Cannot read system prompt {}: {}, using built-in prompt", path.display(), e);
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// 回复来源：模型正常返回，或吸收错误后的兜底
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Model,
    Fallback(GeneratorError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Generated {
    pub text: String,
    pub outcome: Outcome,
}

impl Generated {
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, Outcome::Fallback(_))
    }
}

pub struct Responder {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Responder {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// 组装发给模型的消息列表
    ///
    /// 客户 → user，坐席 → assistant；历史最后一条与当前文本完全相同时不再追加当前文本
    /// （入站消息在生成前已写入历史）。
    pub fn build_prompt(&self, current_text: &str, history: &[MessageRecord]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.system_prompt.clone()));

        for record in history {
            messages.push(match record.sender_type {
                SenderType::Customer => Message::user(record.message_text.clone()),
                SenderType::Agent => Message::assistant(record.message_text.clone()),
            });
        }

        let already_last = history
            .last()
            .is_some_and(|last| last.message_text == current_text);
        if !already_last {
            messages.push(Message::user(current_text));
        }
        messages
    }

    /// 模型客户端累计 token：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn generate(&self, current_text: &str, history: &[MessageRecord]) -> Generated {
        let prompt = self.build_prompt(current_text, history);
        tracing::debug!(
            model = %self.llm.model(),
            "Generating reply with {} context messages",
            prompt.len()
        );

        match self.llm.complete(&prompt).await {
            Ok(text) => {
                tracing::info!("Generated reply ({} chars)", text.chars().count());
                Generated {
                    text,
                    outcome: Outcome::Model,
                }
            }
            Err(e) => {
                tracing::error!("Generator failed, sending fallback: {}", e);
                Generated {
                    text: FALLBACK_REPLY.to_string(),
                    outcome: Outcome::Fallback(e),
                }
            }
        }
    }
}
