//! 核心层：错误与恢复、共享上下文、状态快照与投影、关闭信号

pub mod context;
pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use context::{ControlEffect, SharedContext};
pub use error::{AgentError, RecoveryAction, RoutineError};
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownManager, ShutdownReason, FAIL_SAFE_EXIT_CODE};
pub use state::{Detection, DetectionKind, RoutineStatus, SharedSnapshot, Snapshot};
