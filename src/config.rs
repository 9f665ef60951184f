//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SALESBEE__*` 覆盖（双下划线表示嵌套，如 `SALESBEE__LLM__MODEL=openai/gpt-4o`）。
//! 最后用常见的无前缀变量（`OPENROUTER_API_KEY`、`TWILIO_*`、`PORT`）补齐仍为空的字段。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::ConfigError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub channel: ChannelSection,
    pub store: StoreSection,
    pub cache: CacheSection,
    pub orders: OrdersSection,
}

/// [app] 段：服务名、环境标签、监听端口、日志级别
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub environment: String,
    pub port: u16,
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "WhatsApp AI Sales Agent".to_string(),
            environment: "development".to_string(),
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

/// [llm] 段：后端、模型、采样参数与上下文窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openrouter / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// 送入模型的历史消息条数上限
    pub history_limit: usize,
    /// 系统提示词文件；未设置时按 config/prompts/system.md 查找
    pub system_prompt_path: Option<PathBuf>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            model: crate::llm::openrouter::OPENROUTER_DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
            max_tokens: 300,
            temperature: 0.7,
            history_limit: 10,
            system_prompt_path: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [channel] 段：Twilio WhatsApp 凭据与发送参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// 发送方号码，格式 whatsapp:+14155238886
    pub from_number: Option<String>,
    pub api_base: String,
    /// 单条消息最大字符数，超出按字符切分
    pub max_body_chars: usize,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            from_number: None,
            api_base: "https://api.twilio.com/2010-04-01".to_string(),
            max_body_chars: 1600,
        }
    }
}

/// [store] 段：持久化后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// sqlite / memory
    pub backend: String,
    pub database_path: PathBuf,
    pub max_connections: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            database_path: PathBuf::from("data/salesbee.db"),
            max_connections: 5,
        }
    }
}

/// [cache] 段：缓存后端与各类条目的 TTL（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// memory / remote / disabled
    pub backend: String,
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub customer_ttl_secs: u64,
    pub history_ttl_secs: u64,
    /// 是否缓存会话历史窗口（写入成功后立即失效）
    pub history_enabled: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            remote_url: None,
            remote_token: None,
            customer_ttl_secs: 1800,
            history_ttl_secs: 300,
            history_enabled: false,
        }
    }
}

/// [orders] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrdersSection {
    /// 以渠道消息 ID 作为幂等键，避免 Webhook 重投时重复建单
    pub dedupe_by_message_id: bool,
}

impl Default for OrdersSection {
    fn default() -> Self {
        Self {
            dedupe_by_message_id: true,
        }
    }
}

impl AppConfig {
    /// 用无前缀环境变量补齐空字段（与 Twilio / OpenRouter 控制台给出的变量名一致）
    pub fn apply_env_fallbacks(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        if self.llm.api_key.is_none() {
            self.llm.api_key = env("OPENROUTER_API_KEY").or_else(|| env("OPENAI_API_KEY"));
        }
        if self.channel.account_sid.is_none() {
            self.channel.account_sid = env("TWILIO_ACCOUNT_SID");
        }
        if self.channel.auth_token.is_none() {
            self.channel.auth_token = env("TWILIO_AUTH_TOKEN");
        }
        if self.channel.from_number.is_none() {
            self.channel.from_number = env("TWILIO_WHATSAPP_NUMBER");
        }
        if let Some(port) = env("PORT").and_then(|p| p.parse().ok()) {
            self.app.port = port;
        }
    }

    /// 启动前校验：一次性列出所有缺失项，调用方据此以非零码退出
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());

        if self.llm.provider != "mock" && blank(&self.llm.api_key) {
            missing.push("llm.api_key".to_string());
        }
        if blank(&self.channel.account_sid) {
            missing.push("channel.account_sid".to_string());
        }
        if blank(&self.channel.auth_token) {
            missing.push("channel.auth_token".to_string());
        }
        if blank(&self.channel.from_number) {
            missing.push("channel.from_number".to_string());
        }
        if self.cache.backend == "remote" && blank(&self.cache.remote_url) {
            missing.push("cache.remote_url".to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        match self.store.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::Invalid {
                    key: "store.backend".into(),
                    reason: format!("unknown backend '{}'", other),
                })
            }
        }
        match self.cache.backend.as_str() {
            "memory" | "remote" | "disabled" => {}
            other => {
                return Err(ConfigError::Invalid {
                    key: "cache.backend".into(),
                    reason: format!("unknown backend '{}'", other),
                })
            }
        }
        if self.llm.history_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "llm.history_limit".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 SALESBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 SALESBEE__*（双下划线表示嵌套键）
/// 4. 用无前缀变量补齐空字段
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SALESBEE")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_env_fallbacks();
    Ok(cfg)
}
