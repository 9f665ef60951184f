//! LLM 层：客户端抽象与实现（OpenAI 兼容 / OpenRouter / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod openrouter;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{CompletionParams, OpenAiClient, TokenUsage};
pub use openrouter::{create_llm_from_config, OPENROUTER_BASE_URL};
pub use traits::LlmClient;
