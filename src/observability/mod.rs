//! 可观测性：日志初始化
//!
//! 默认使用配置中的 `app.log_level`，设置了 RUST_LOG 时以其为准。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 构造日志过滤器；非法级别回退到 info
pub fn env_filter(level: &str) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::try_new(level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(true))
        .init();
}
