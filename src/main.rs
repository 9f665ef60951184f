//! SalesBee WhatsApp 服务
//!
//! 配置：config/default.toml + SALESBEE__* 环境变量（或 OPENROUTER_API_KEY、TWILIO_* 等）。
//! 启动：cargo run
//! Webhook URL：http://YOUR_HOST:8000/webhooks/whatsapp

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use salesbee::config::load_config;
use salesbee::core::{drain_in_flight, ShutdownManager};
use salesbee::integrations::whatsapp::{create_router, WhatsappState};
use salesbee::{observability, AppBuilder};
use tokio_util::task::TaskTracker;

/// 关闭时等待在途消息的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    observability::init(&config.app.log_level);

    let port = config.app.port;
    tracing::info!(
        environment = %config.app.environment,
        "Starting {} v{}",
        config.app.name,
        env!("CARGO_PKG_VERSION")
    );

    let components = AppBuilder::new(config)
        .build()
        .await
        .context("Failed to build components")?;
    let store = components.store.clone();

    let tracker = TaskTracker::new();
    let state = Arc::new(WhatsappState::new(components, tracker.clone()));
    let app = create_router(state);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Webhook URL: http://YOUR_HOST:{}/webhooks/whatsapp", port);

    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("Server error")?;

    drain_in_flight(&tracker, DRAIN_TIMEOUT).await;
    store.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
