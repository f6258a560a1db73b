//! 三循环运行时
//!
//! 把感知（OS 线程）、决策、风险监控（tokio 任务）接到同一个 SharedContext 与关闭 token 上。
//! 决策循环结束即整体关闭：正常退出记为 UserInitiated；谜题熔断时先通过 ProcessControl
//! 结束被控进程，再以 ShutdownReason::FailSafe 关闭，入口据此返回专用退出码。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as ProcessCommand;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agent::decision::{Command, DecisionLoop};
use crate::agent::hazard::HazardMonitor;
use crate::core::{
    AgentError, ControlEffect, RoutineStatus, SharedContext, ShutdownManager, ShutdownReason,
};
use crate::perception::PerceptionLoop;

/// 被控进程的生命周期控制（熔断时使用）
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn terminate_target(&self) -> anyhow::Result<()>;
}

/// 未配置结束命令：只记录日志
#[derive(Debug, Default)]
pub struct NoProcessControl;

#[async_trait]
impl ProcessControl for NoProcessControl {
    async fn terminate_target(&self) -> anyhow::Result<()> {
        warn!("No kill command configured, controlled process left running");
        Ok(())
    }
}

/// 通过系统 shell 执行配置的结束命令
#[derive(Debug, Clone)]
pub struct CommandProcessControl {
    command: String,
    timeout: Duration,
}

impl CommandProcessControl {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProcessControl for CommandProcessControl {
    async fn terminate_target(&self) -> anyhow::Result<()> {
        info!(command = %self.command, "Terminating controlled process");
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = ProcessCommand::new("cmd");
            c.args(["/C", self.command.as_str()]);
            c
        } else {
            let mut c = ProcessCommand::new("sh");
            c.args(["-c", self.command.as_str()]);
            c
        };
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("kill command timed out after {:?}", self.timeout))??;
        if !output.status.success() {
            anyhow::bail!(
                "kill command exited with {:?}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// 运行中的三循环
pub struct RuntimeHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<RoutineStatus>,
    ctx: Arc<SharedContext>,
    shutdown: ShutdownManager,
    decision: JoinHandle<()>,
    hazard: JoinHandle<()>,
    perception: Option<std::thread::JoinHandle<()>>,
}

impl RuntimeHandle {
    /// 命令发送端（编辑器 / 控制端）
    pub fn commands(&self) -> mpsc::UnboundedSender<Command> {
        self.commands.clone()
    }

    /// 发送命令；决策循环已退出时返回 false
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn status(&self) -> watch::Receiver<RoutineStatus> {
        self.status.clone()
    }

    pub fn context(&self) -> &Arc<SharedContext> {
        &self.ctx
    }

    /// 启停控制；告警期间作为确认
    pub fn toggle(&self) -> ControlEffect {
        let effect = self.ctx.toggle();
        info!(?effect, "Start/stop control");
        effect
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        self.shutdown.shutdown(reason);
    }

    /// 等待三个循环全部结束，返回关闭原因
    pub async fn join(self) -> Option<ShutdownReason> {
        if let Err(e) = self.decision.await {
            error!("Decision task panicked: {}", e);
            self.shutdown.shutdown(ShutdownReason::UserInitiated);
        }
        if let Err(e) = self.hazard.await {
            error!("Hazard task panicked: {}", e);
        }
        if let Some(handle) = self.perception {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("Perception thread panicked");
            }
        }
        info!(reason = ?self.shutdown.reason(), "Runtime stopped");
        self.shutdown.reason()
    }
}

/// 启动三个循环
pub fn spawn_runtime(
    ctx: Arc<SharedContext>,
    decision: DecisionLoop,
    hazard: HazardMonitor,
    perception: Option<PerceptionLoop>,
    process: Arc<dyn ProcessControl>,
    shutdown: ShutdownManager,
) -> std::io::Result<RuntimeHandle> {
    let token = shutdown.token();
    let (commands, command_rx) = mpsc::unbounded_channel();
    let status = decision.status();

    let perception = perception.map(|p| p.spawn(token.clone())).transpose()?;
    let hazard = tokio::spawn(hazard.run(token.clone()));
    let decision = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let reason = match decision.run(command_rx, token).await {
                Ok(()) => ShutdownReason::UserInitiated,
                Err(AgentError::FailSafe(failures)) => {
                    error!(failures, "Fail-safe ceiling reached, stopping controlled process");
                    if let Err(e) = process.terminate_target().await {
                        error!("Failed to terminate controlled process: {:#}", e);
                    }
                    ShutdownReason::FailSafe(failures)
                }
                Err(e) => {
                    error!("Decision loop aborted: {}", e);
                    ShutdownReason::UserInitiated
                }
            };
            shutdown.shutdown(reason);
        })
    };

    info!("Runtime started");
    Ok(RuntimeHandle {
        commands,
        status,
        ctx,
        shutdown,
        decision,
        hazard,
        perception,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::actuation::RecordingInput;
    use crate::agent::decision::{Collaborators, DecisionOptions};
    use crate::agent::hazard::{HazardSettings, LogAlerter};
    use crate::agent::puzzle::PuzzleLimits;
    use crate::core::Snapshot;
    use crate::perception::{Frame, Point};
    use crate::routine::RoutineProgram;
    use crate::skills::CommandBook;

    #[derive(Default)]
    struct CountingControl {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProcessControl for CountingControl {
        async fn terminate_target(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn start(
        limits: PuzzleLimits,
        dir: &std::path::Path,
    ) -> (RuntimeHandle, Arc<CountingControl>) {
        let ctx = Arc::new(SharedContext::default());
        ctx.publish_snapshot(Snapshot {
            frame: Some(Frame::blank(800, 600)),
            position: Some(Point::new(0.5, 0.5)),
            ..Snapshot::empty()
        });
        let input = Arc::new(RecordingInput::new());
        let mut decision = DecisionLoop::new(
            Arc::clone(&ctx),
            Collaborators {
                input: input.clone(),
                ..Collaborators::dry_run()
            },
            DecisionOptions {
                puzzle: limits,
                artifacts_dir: dir.join("failed"),
                command_books: Some(dir.to_path_buf()),
                seed: Some(11),
                ..DecisionOptions::default()
            },
        );
        decision.set_command_book(CommandBook::from_toml("test", "").unwrap());
        decision.set_program(RoutineProgram::from_waypoints(&[Point::new(0.5, 0.5)]).unwrap());
        let hazard = HazardMonitor::new(
            Arc::clone(&ctx),
            input,
            Arc::new(LogAlerter),
            HazardSettings::default(),
        );
        let control = Arc::new(CountingControl::default());
        let handle = spawn_runtime(
            ctx,
            decision,
            hazard,
            None,
            control.clone(),
            ShutdownManager::new(),
        )
        .unwrap();
        (handle, control)
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_command_stops_all_loops() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, control) = start(PuzzleLimits::default(), dir.path());
        let mut status = handle.status();
        assert_eq!(handle.toggle(), ControlEffect::Enabled);
        status.wait_for(|s| s.enabled).await.unwrap();

        assert!(handle.send(Command::Quit));
        assert_eq!(handle.join().await, Some(ShutdownReason::UserInitiated));
        assert_eq!(control.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_safe_terminates_target() {
        let dir = tempfile::tempdir().unwrap();
        let limits = PuzzleLimits {
            abort_above: 0,
            ..PuzzleLimits::default()
        };
        let (handle, control) = start(limits, dir.path());
        handle.context().report_puzzle(Point::new(0.5, 0.5));
        handle.toggle();

        let reason = handle.join().await;
        assert_eq!(reason, Some(ShutdownReason::FailSafe(1)));
        assert_eq!(control.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_shutdown_is_user_initiated() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _control) = start(PuzzleLimits::default(), dir.path());
        handle.shutdown(ShutdownReason::Signal);
        assert_eq!(handle.join().await, Some(ShutdownReason::Signal));
    }

    #[tokio::test]
    async fn test_command_process_control_reports_failure() {
        let ok = CommandProcessControl::new("exit 0", Duration::from_secs(5));
        assert!(ok.terminate_target().await.is_ok());
        let failing = CommandProcessControl::new("exit 3", Duration::from_secs(5));
        assert!(failing.terminate_target().await.is_err());
    }
}
