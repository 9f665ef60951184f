//! 组件装配：按 AppConfig 构建存储、缓存、LLM、渠道与流水线
//!
//! 所有外部协作者都通过 trait 对象注入；测试可用 `with_*` 替换为假实现。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{create_cache, Cache};
use crate::channel::{Channel, TwilioChannel};
use crate::config::AppConfig;
use crate::core::{ConfigError, StartupError};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::responder::load_system_prompt;
use crate::store::{InMemoryStore, SqliteStore, Store};

/// 未显式配置时依次查找的提示词文件
const SYSTEM_PROMPT_CANDIDATES: [&str; 2] = ["config/prompts/system.md", "../config/prompts/system.md"];

/// 进程级组件
#[derive(Clone)]
pub struct AppComponents {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub llm: Arc<dyn LlmClient>,
    pub channel: Arc<dyn Channel>,
    pub pipeline: Arc<Pipeline>,
}

/// 组件构建器
pub struct AppBuilder {
    config: AppConfig,
    store: Option<Arc<dyn Store>>,
    cache: Option<Arc<dyn Cache>>,
    llm: Option<Arc<dyn LlmClient>>,
    channel: Option<Arc<dyn Channel>>,
    system_prompt: Option<String>,
}

impl AppBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            cache: None,
            llm: None,
            channel: None,
            system_prompt: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = Some(prompt.to_string());
        self
    }

    fn resolve_system_prompt(&self) -> String {
        if let Some(prompt) = &self.system_prompt {
            return prompt.clone();
        }
        let path = self.config.llm.system_prompt_path.clone().or_else(|| {
            SYSTEM_PROMPT_CANDIDATES
                .into_iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        });
        load_system_prompt(path.as_deref())
    }

    async fn build_store(&self) -> Result<Arc<dyn Store>, StartupError> {
        let section = &self.config.store;
        match section.backend.as_str() {
            "sqlite" => {
                let store = SqliteStore::open(&section.database_path, section.max_connections).await?;
                tracing::info!("Using SQLite store at {}", section.database_path.display());
                Ok(Arc::new(store))
            }
            "memory" => {
                tracing::warn!("Using in-memory store, data is lost on restart");
                Ok(Arc::new(InMemoryStore::new()))
            }
            other => Err(ConfigError::Invalid {
                key: "store.backend".into(),
                reason: format!("unknown backend '{}'", other),
            }
            .into()),
        }
    }

    pub async fn build(self) -> Result<AppComponents, StartupError> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => self.build_store().await?,
        };
        let cache = match &self.cache {
            Some(cache) => cache.clone(),
            None => create_cache(&self.config.cache).await,
        };
        let llm = match &self.llm {
            Some(llm) => llm.clone(),
            None => create_llm_from_config(&self.config.llm)?,
        };
        let channel: Arc<dyn Channel> = match &self.channel {
            Some(channel) => channel.clone(),
            None => Arc::new(TwilioChannel::from_config(&self.config.channel)?),
        };

        let cache_cfg = &self.config.cache;
        let settings = PipelineSettings {
            history_limit: self.config.llm.history_limit,
            customer_ttl: Duration::from_secs(cache_cfg.customer_ttl_secs),
            history_ttl: cache_cfg
                .history_enabled
                .then(|| Duration::from_secs(cache_cfg.history_ttl_secs)),
            dedupe_orders: self.config.orders.dedupe_by_message_id,
            system_prompt: self.resolve_system_prompt(),
        };

        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            cache.clone(),
            llm.clone(),
            channel.clone(),
            settings,
        ));

        tracing::info!(
            cache = cache.backend(),
            model = llm.model(),
            channel = channel.name(),
            "Components ready"
        );

        Ok(AppComponents {
            config: Arc::new(self.config),
            store,
            cache,
            llm,
            channel,
            pipeline,
        })
    }
}
