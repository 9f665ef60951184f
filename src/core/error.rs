//! 错误分类
//!
//! 每类错误都有固定的吸收点（见 pipeline）：
//! - StoreError：身份/会话/入站写入失败时中止并发送致歉
//! - GeneratorError：在 responder 中吸收为兜底文本，不向外传播
//! - DeliveryError：记录日志后终止，不重试
//! - CacheError：仅在 cache 模块内部出现，降级为未命中/空操作

use thiserror::Error;

/// 持久化层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// 网络或数据库不可用（不重试，走致歉路径）
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// 唯一约束冲突；解析器将其视为「重新读取已存在的行」
    #[error("Uniqueness conflict: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// 行数据无法还原为领域类型（时间戳、JSON 等）
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// 调用方传入的键不可用（如空号码），未触达存储
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// 回复生成错误（超时、上游异常、空响应）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("Generator timeout after {0}s")]
    Timeout(u64),

    #[error("Generator upstream error: {0}")]
    Upstream(String),

    #[error("Generator returned an empty response")]
    EmptyResponse,
}

/// 渠道投递错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("Delivery transport error: {0}")]
    Transport(String),

    #[error("Delivery rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// 缓存错误；不会离开 cache 模块
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// 配置错误：加载失败或缺少必填项
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required config: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// 启动失败：配置或存储初始化出错
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open store: {0}")]
    Store(#[from] StoreError),
}
