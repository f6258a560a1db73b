//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AUTOPILOT__*` 覆盖
//! （双下划线表示嵌套，如 `AUTOPILOT__HAZARD__SKULL_PRESSES=30`）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::actuation::secs;
use crate::agent::{DecisionOptions, HazardSettings, HttpPuzzleSolver, PuzzleLimits};
use crate::perception::FrameEncoder;
use crate::routine::LiveSettings;
use crate::skills::BuffSpec;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub perception: PerceptionSection,
    pub decision: DecisionSection,
    pub hazard: HazardSection,
    pub puzzle: PuzzleSection,
    pub buffs: BuffsSection,
    pub catalog: CatalogSection,
    /// 启动时的运行时设置（路线中的 `$` 元素可随时修改）
    pub settings: LiveSettings,
}

/// [app] 段：会话文件、指令书目录、熔断时结束被控进程的命令
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    pub session_file: PathBuf,
    pub command_books: Option<PathBuf>,
    /// 熔断时执行的结束命令（经系统 shell）；未设置时只记录日志
    pub kill_command: Option<String>,
    pub kill_timeout_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            session_file: PathBuf::from(crate::session::SESSION_FILE),
            command_books: None,
            kill_command: None,
            kill_timeout_secs: 10,
        }
    }
}

/// [perception] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerceptionSection {
    pub fps: u32,
    /// 截屏失败后的重试间隔（毫秒）
    pub retry_delay_ms: u64,
}

impl Default for PerceptionSection {
    fn default() -> Self {
        Self {
            fps: 60,
            retry_delay_ms: 500,
        }
    }
}

impl PerceptionSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

/// [decision] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionSection {
    pub idle_interval_ms: u64,
    pub retry_delay_ms: u64,
    /// 固定随机种子（复现问题时使用）
    pub seed: Option<u64>,
    /// 谜题失败帧目录
    pub artifacts_dir: PathBuf,
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            idle_interval_ms: 10,
            retry_delay_ms: 500,
            seed: None,
            artifacts_dir: PathBuf::from("failed_detections"),
        }
    }
}

/// [hazard] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HazardSection {
    pub interval_ms: u64,
    pub black_screen_grace_secs: u64,
    pub skull_presses: u32,
    pub resume_delay_secs: f64,
}

impl Default for HazardSection {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            black_screen_grace_secs: 40,
            skull_presses: 20,
            resume_delay_secs: 2.0,
        }
    }
}

/// [puzzle] 段：状态机阈值与求解服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PuzzleSection {
    pub rounds: u32,
    pub escalate_every: u32,
    pub give_up_at: u32,
    pub abort_above: u32,
    pub poll_attempts: u32,
    pub poll_interval: f64,
    /// 求解服务地址；未设置时读取 ARROW_API_URL
    pub solver_url: Option<String>,
    /// 求解服务密钥；未设置时读取 PROXY_SECRET
    pub solver_secret: Option<String>,
    pub solver_timeout_secs: u64,
}

impl Default for PuzzleSection {
    fn default() -> Self {
        let limits = PuzzleLimits::default();
        Self {
            rounds: limits.rounds,
            escalate_every: limits.escalate_every,
            give_up_at: limits.give_up_at,
            abort_above: limits.abort_above,
            poll_attempts: limits.poll_attempts,
            poll_interval: limits.poll_interval,
            solver_url: None,
            solver_secret: None,
            solver_timeout_secs: 15,
        }
    }
}

impl PuzzleSection {
    pub fn limits(&self) -> PuzzleLimits {
        PuzzleLimits {
            rounds: self.rounds,
            escalate_every: self.escalate_every,
            give_up_at: self.give_up_at,
            abort_above: self.abort_above,
            poll_attempts: self.poll_attempts,
            poll_interval: self.poll_interval,
        }
    }

    /// 配置优先，其次环境变量 ARROW_API_URL
    pub fn solver_url(&self) -> Option<String> {
        self.solver_url
            .clone()
            .or_else(|| std::env::var("ARROW_API_URL").ok())
            .filter(|u| !u.is_empty())
    }

    pub fn solver_secret(&self) -> String {
        self.solver_secret
            .clone()
            .or_else(|| std::env::var("PROXY_SECRET").ok())
            .unwrap_or_default()
    }

    /// 按配置构建远程求解器；未配置地址或地址无效时返回 None
    pub fn solver(&self, encoder: Arc<dyn FrameEncoder>) -> Option<HttpPuzzleSolver> {
        let url = self.solver_url()?;
        let timeout = Duration::from_secs(self.solver_timeout_secs);
        match HttpPuzzleSolver::new(&url, &self.solver_secret(), encoder, timeout) {
            Ok(solver) => {
                info!(url = %url, "Puzzle solver enabled");
                Some(solver)
            }
            Err(e) => {
                warn!("Puzzle solver disabled: {}", e);
                None
            }
        }
    }
}

/// [buffs] 段：道具增益与宠物喂食
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuffsSection {
    pub items: Vec<BuffSpec>,
    /// 开启自动喂食时的宠物数量
    pub pets: Option<u32>,
}

/// [catalog] 段：小地图素材目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    pub minimap_dir: PathBuf,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            minimap_dir: PathBuf::from("assets/minimaps"),
        }
    }
}

impl AppConfig {
    pub fn decision_options(&self) -> DecisionOptions {
        DecisionOptions {
            idle_interval: Duration::from_millis(self.decision.idle_interval_ms),
            retry_delay: Duration::from_millis(self.decision.retry_delay_ms),
            item_buffs: self.buffs.items.clone(),
            pets: self.buffs.pets,
            puzzle: self.puzzle.limits(),
            artifacts_dir: self.decision.artifacts_dir.clone(),
            command_books: self.app.command_books.clone(),
            seed: self.decision.seed,
        }
    }

    pub fn hazard_settings(&self) -> HazardSettings {
        HazardSettings {
            interval: Duration::from_millis(self.hazard.interval_ms),
            black_screen_grace: Duration::from_secs(self.hazard.black_screen_grace_secs),
            skull_presses: self.hazard.skull_presses,
            resume_delay: secs(self.hazard.resume_delay_secs),
        }
    }
}

/// 从 config 目录加载配置，环境变量 AUTOPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AUTOPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
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
        config::Environment::with_prefix("AUTOPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
