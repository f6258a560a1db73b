//! Autopilot - 游戏路线自动化代理
//!
//! 模块划分：
//! - **actuation**: 输入注入、路径规划、移动与微调
//! - **agent**: 决策循环、风险监控、谜题状态机、增益、三循环运行时
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **console**: 标准输入控制台
//! - **core**: 错误与恢复、共享上下文、状态快照、关闭信号
//! - **observability**: 日志初始化
//! - **perception**: 截屏循环、帧与区域、地图目录、路点文件
//! - **routine**: 路线元素、脚本编解码、执行游标
//! - **session**: 会话记忆（上次的指令书 / 路线 / 小地图）
//! - **skills**: 指令书、冷却调度、技能轮转

pub mod actuation;
pub mod agent;
pub mod config;
pub mod console;
pub mod core;
pub mod observability;
pub mod perception;
pub mod routine;
pub mod session;
pub mod skills;

pub use agent::{spawn_runtime, Command, DecisionLoop, RuntimeHandle};
pub use config::{load_config, AppConfig};
