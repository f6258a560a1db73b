//! Autopilot 入口
//!
//! 加载配置、恢复会话，启动感知 / 决策 / 风险监控三循环，并从标准输入读取控制指令。
//! 未接入截屏与输入后端时以演练模式运行：按键只记录不注入。
//!
//! 退出码：正常 0，谜题熔断 3。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use autopilot::agent::{
    Collaborators, CommandProcessControl, DecisionLoop, HazardMonitor, LogAlerter,
    NoProcessControl, ProcessControl,
};
use autopilot::core::{SharedContext, ShutdownManager, ShutdownReason};
use autopilot::perception::{FrameEncoder, ImageEncoder, MapCatalog};
use autopilot::session::SessionStore;
use autopilot::{console, load_config, observability, spawn_runtime};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    info!(name = ?cfg.app.name, "Configuration loaded");

    let ctx = Arc::new(SharedContext::new(cfg.settings.clone()));

    let mut collaborators = Collaborators::dry_run();
    collaborators.identifier = Some(Arc::new(MapCatalog::new(&cfg.catalog.minimap_dir, None)));
    let encoder: Arc<dyn FrameEncoder> = Arc::new(ImageEncoder::new());
    collaborators.encoder = Some(Arc::clone(&encoder));
    if let Some(solver) = cfg.puzzle.solver(encoder) {
        collaborators.solver = Arc::new(solver);
    }
    warn!("No capture or input backend attached, running in dry-run mode");

    let mut decision = DecisionLoop::new(
        Arc::clone(&ctx),
        collaborators.clone(),
        cfg.decision_options(),
    )
    .with_session(SessionStore::new(&cfg.app.session_file));
    decision.restore_session();

    let hazard = HazardMonitor::new(
        Arc::clone(&ctx),
        collaborators.input.clone(),
        Arc::new(LogAlerter),
        cfg.hazard_settings(),
    );

    let process: Arc<dyn ProcessControl> = match &cfg.app.kill_command {
        Some(command) => Arc::new(CommandProcessControl::new(
            command.clone(),
            Duration::from_secs(cfg.app.kill_timeout_secs),
        )),
        None => Arc::new(NoProcessControl),
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let handle = spawn_runtime(
        ctx,
        decision,
        hazard,
        None,
        process,
        (*shutdown).clone(),
    )
    .context("Failed to start runtime")?;

    console::run(&handle, shutdown.token()).await;
    if !shutdown.is_shutdown() {
        handle.send(autopilot::Command::Quit);
    }

    // 标准输入的阻塞读取会拖住运行时退出，这里直接结束进程
    let reason = handle.join().await;
    if let Some(ShutdownReason::FailSafe(failures)) = reason {
        warn!(failures, "Exiting after fail-safe");
    } else {
        info!(?reason, "Exiting");
    }
    std::process::exit(reason.map_or(0, |r| r.exit_code()));
}
