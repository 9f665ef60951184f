//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM 后：停止接收新的 Webhook，等待已在处理中的消息跑完流水线
//! （出站消息已落库后再退出，避免重启后重复回复），最后关闭数据库连接池。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
}

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取关闭 token（传给 axum 的 graceful shutdown）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭；重复调用只记录第一次
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        tracing::info!(?reason, "Shutdown requested");
        self.shutdown_token.cancel();
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 等待仍在处理中的流水线任务；超时返回 false（剩余任务随进程退出被丢弃）
pub async fn drain_in_flight(tracker: &TaskTracker, timeout: Duration) -> bool {
    tracker.close();
    let pending = tracker.len();
    if pending > 0 {
        tracing::info!("Waiting for {} in-flight message(s) to finish", pending);
    }
    match tokio::time::timeout(timeout, tracker.wait()).await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(
                "Shutdown drain timed out after {}s with {} task(s) still running",
                timeout.as_secs(),
                tracker.len()
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_every_token_clone() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        let later = manager.clone().token();
        assert!(!token.is_cancelled());

        manager.shutdown(ShutdownReason::Signal);
        assert!(token.is_cancelled());
        assert!(later.is_cancelled());

        // 第二个信号无副作用
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_waits_for_tasks() {
        let tracker = TaskTracker::new();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = done.clone();
        tracker.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        assert!(drain_in_flight(&tracker, Duration::from_secs(5)).await);
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let tracker = TaskTracker::new();
        tracker.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        assert!(!drain_in_flight(&tracker, Duration::from_millis(10)).await);
    }
}
