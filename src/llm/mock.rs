//! Mock LLM 客户端（用于测试与本地联调，无需 API）
//!
//! 默认回显最后一条 User 消息；也可预置回复脚本或固定错误，并记录每次收到的完整消息列表。
//! token 用量按空白分词近似统计。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::GeneratorError;
use crate::llm::{LlmClient, Message, Role, TokenUsage};

enum Behavior {
    Echo,
    Script(Mutex<VecDeque<Result<String, GeneratorError>>>),
}

/// Mock 客户端
pub struct MockLlmClient {
    behavior: Behavior,
    calls: Mutex<Vec<Vec<Message>>>,
    usage: TokenUsage,
}

impl MockLlmClient {
    /// 回显最后一条 User 消息
    pub fn echo() -> Self {
        Self {
            behavior: Behavior::Echo,
            calls: Mutex::new(Vec::new()),
            usage: TokenUsage::new(),
        }
    }

    /// 依次返回预置结果；脚本耗尽后回显
    pub fn scripted(replies: Vec<Result<String, GeneratorError>>) -> Self {
        Self {
            behavior: Behavior::Script(Mutex::new(replies.into())),
            calls: Mutex::new(Vec::new()),
            usage: TokenUsage::new(),
        }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(text.into())])
    }

    pub fn failing(err: GeneratorError) -> Self {
        Self::scripted(vec![Err(err)])
    }

    /// 每次 complete 收到的消息列表
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn echo_reply(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        format!("Echo from Mock: {}", last_user)
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::echo()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, GeneratorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let scripted = match &self.behavior {
            Behavior::Echo => None,
            Behavior::Script(queue) => queue.lock().ok().and_then(|mut q| q.pop_front()),
        };
        let result = scripted.unwrap_or_else(|| Ok(Self::echo_reply(messages)));
        if let Ok(reply) = &result {
            let prompt: usize = messages.iter().map(|m| word_count(&m.content)).sum();
            self.usage.add(prompt as u64, word_count(reply) as u64);
        }
        result
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
