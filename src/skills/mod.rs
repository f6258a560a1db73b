//! 技能系统
//!
//! 指令书（command book）声明技能 id、实际按键、冷却与连按次数；
//! 冷却调度器回答哪些技能可用，技能轮转在普攻与限频技能之间交替。
//!
//! 目录结构：
//! ```text
//! config/command_books/
//! ├── kanna.toml
//! └── ...
//! ```

mod cooldown;
mod registry;
mod rotation;

pub use cooldown::CooldownScheduler;
pub use registry::{
    BuffSpec, CommandBook, CommandBookLoader, KeyBindings, SkillRegistry, SkillSpec,
    DEFAULT_ACTION_KEY,
};
pub use rotation::{attack_hold_bounds, RotationPhase, RotationReport, SkillRotationController};
