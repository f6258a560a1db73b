//! 智能体：决策循环、风险监控、谜题状态机及其协作方
//!
//! - **decision**: 决策循环（命令处理、定时增益、谜题、路线单步）
//! - **hazard**: 风险监控循环（黑屏告警、弹窗、诅咒、其他玩家、谜题标记）
//! - **puzzle**: 谜题处理状态机
//! - **solver**: 远程箭头谜题求解
//! - **artifacts**: 失败帧存档
//! - **buffs**: 职业 / 道具增益与宠物喂食
//! - **runtime**: 三循环装配与熔断退出

pub mod artifacts;
pub mod buffs;
pub mod decision;
pub mod hazard;
pub mod puzzle;
pub mod runtime;
pub mod solver;

pub use artifacts::FailedFrameStore;
pub use buffs::BuffRunner;
pub use decision::{Collaborators, Command, DecisionLoop, DecisionOptions, Edit};
pub use hazard::{Alerter, HazardMonitor, HazardSettings, LogAlerter};
pub use puzzle::{PuzzleLimits, PuzzlePhase, PuzzleResolver, PuzzleTools};
pub use runtime::{
    spawn_runtime, CommandProcessControl, NoProcessControl, ProcessControl, RuntimeHandle,
};
pub use solver::{HttpPuzzleSolver, NoSolver, PuzzleSolver};
