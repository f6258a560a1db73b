//! 路线执行引擎
//!
//! 路线（routine）是决策循环逐步执行的有序元素序列：
//! ```text
//! $, target=move_tolerance, value=0.08     # 设置修改
//!
//! @, label=loop                            # 标签
//! *, x=0.2, y=0.5, frequency=2             # 路点
//!     Press, key=f1                        # 路点附加行为
//! >, label=loop                            # 跳转
//! ```

pub mod behaviors;
pub mod codec;
pub mod components;
pub mod program;
pub mod settings;
pub mod value;

pub use behaviors::{Behavior, BehaviorKind};
pub use codec::{decode, decode_line, encode, load, save, ScriptLine};
pub use components::{
    Branch, ElementId, Label, ProgramElement, RepeatCounter, SettingChange, Waypoint,
};
pub use program::{ExecutionCursor, RoutineHost, RoutineProgram, StepOutcome};
pub use settings::LiveSettings;
pub use value::{Kwargs, Primitive, RawArgs};
