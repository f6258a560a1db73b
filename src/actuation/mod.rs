//! 执行层：输入注入、路径规划、移动
//!
//! - **input**: InputInjector 抽象与按键组合（press / hold）
//! - **path**: PathPlanner 抽象与直线规划
//! - **movement**: Navigator（移动 / 微调 / 行走 / 下跳）
//! - **mock**: 记录型输入注入，测试与演练模式使用

pub mod input;
pub mod mock;
pub mod movement;
pub mod path;

pub use input::{deadline_after, hold, press, secs, sleep_secs, InputInjector, MouseButton};
pub use mock::{InputEvent, RecordingInput};
pub use movement::{MoveOutcome, Navigator};
pub use path::{DirectPlanner, PathPlanner};
