//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，各循环据此决定重试、跳过、暂停还是终止；
//! 错误不会跨越循环边界传播。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将运行期错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Capture(_) => RecoveryAction::Retry,
            AgentError::Input(_)
            | AgentError::PathPlanning(_)
            | AgentError::Solver(_)
            | AgentError::Encode(_)
            | AgentError::Artifact(_) => RecoveryAction::Skip,
            // 指令书缺失时继续执行只会空转，交由用户处理
            AgentError::NoCommandBook => RecoveryAction::Pause,
            AgentError::Cancelled | AgentError::FailSafe(_) => RecoveryAction::Abort,
        }
    }
}
