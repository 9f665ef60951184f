//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / OpenRouter / Mock）实现 LlmClient。错误类型为 GeneratorError，
//! 由 responder 统一吸收为兜底文本。

use async_trait::async_trait;

use crate::core::GeneratorError;
use crate::llm::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, GeneratorError>;

    /// 模型名（日志用）
    fn model(&self) -> &str;

    /// 进程启动以来累计的 token：(prompt_tokens, completion_tokens, total_tokens)
    ///
    /// 用于 `/health` 与每条消息的完成日志；不统计的实现返回 (0, 0, 0)。
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
