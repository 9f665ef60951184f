//! OpenRouter 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://openrouter.ai/api/v1
//! - 模型名带厂商前缀，如 `openai/gpt-3.5-turbo`

use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmSection;
use crate::core::ConfigError;
use crate::llm::{CompletionParams, LlmClient, MockLlmClient, OpenAiClient};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

/// 按 [llm] 配置创建客户端：openrouter / openai / mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, ConfigError> {
    let params = CompletionParams {
        max_tokens: cfg.max_tokens,
        temperature: cfg.temperature,
        timeout: Duration::from_secs(cfg.timeouts.request),
    };
    let api_key = || {
        cfg.api_key
            .clone()
            .ok_or_else(|| ConfigError::Missing(vec!["llm.api_key".to_string()]))
    };

    let client: Arc<dyn LlmClient> = match cfg.provider.as_str() {
        "openrouter" => {
            let base = cfg.base_url.as_deref().unwrap_or(OPENROUTER_BASE_URL);
            Arc::new(OpenAiClient::new(Some(base), &cfg.model, &api_key()?, params))
        }
        "openai" => Arc::new(OpenAiClient::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            &api_key()?,
            params,
        )),
        "mock" => Arc::new(MockLlmClient::echo()),
        other => {
            return Err(ConfigError::Invalid {
                key: "llm.provider".into(),
                reason: format!("unknown provider '{}'", other),
            })
        }
    };
    tracing::info!("Using LLM provider {} (model: {})", cfg.provider, client.model());
    Ok(client)
}
