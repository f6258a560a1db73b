//! 关闭信号
//!
//! 三个循环共用一个 CancellationToken；第一次触发的原因被记下，入口据此决定退出码：
//! - 用户 Ctrl+C / SIGTERM：正常退出；
//! - 谜题失败超过硬上限：熔断退出。

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    /// 第一次触发的原因（后续触发不覆盖）
    first_reason: Arc<Mutex<Option<ShutdownReason>>>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户发起的退出 (Ctrl+C 或 Quit 命令)
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 连续失败超过硬上限，主动终止
    FailSafe(u32),
}

/// 熔断退出码
pub const FAIL_SAFE_EXIT_CODE: i32 = 3;

impl ShutdownReason {
    /// 进程退出码：熔断为 3，其余为 0
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FailSafe(_) => FAIL_SAFE_EXIT_CODE,
            Self::UserInitiated | Self::Signal => 0,
        }
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            first_reason: Arc::new(Mutex::new(None)),
        }
    }

    /// 获取关闭 token（用于取消正在进行的循环）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut first = self.first_reason.lock();
            if first.is_none() {
                *first = Some(reason);
            }
        }
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.first_reason.lock().clone()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, shutting down...");
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
                    tracing::info!("Received SIGTERM, shutting down...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_manager_new() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());
        assert!(manager.reason().is_none());
    }

    #[test]
    fn test_shutdown_cancels_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        manager.shutdown(ShutdownReason::FailSafe(21));
        manager.shutdown(ShutdownReason::UserInitiated);
        assert_eq!(manager.reason(), Some(ShutdownReason::FailSafe(21)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownReason::UserInitiated.exit_code(), 0);
        assert_eq!(ShutdownReason::Signal.exit_code(), 0);
        assert_eq!(ShutdownReason::FailSafe(21).exit_code(), FAIL_SAFE_EXIT_CODE);
    }
}
