//! 错误类型与恢复动作
//!
//! - RoutineError：构造期错误（参数、重复标签、未知设置、脚本解析），只影响单次编辑；
//! - AgentError：运行期协作方失败（输入注入、截屏、求解器等），由各循环经 RecoveryEngine 降级处理。

use std::path::PathBuf;

use thiserror::Error;

/// 路线元素 / 行为构造与脚本解析错误
#[derive(Error, Debug)]
pub enum RoutineError {
    #[error("{symbol}: takes at most {max} positional arguments, got {got}")]
    TooManyArguments {
        symbol: String,
        max: usize,
        got: usize,
    },

    #[error("{symbol}: unexpected argument '{name}'")]
    UnknownArgument { symbol: String, name: String },

    #[error("{symbol}: argument '{name}' given more than once")]
    DuplicateArgument { symbol: String, name: String },

    #[error("{symbol}: missing required argument '{name}'")]
    MissingArgument { symbol: String, name: String },

    #[error("invalid value '{value}' for '{name}': {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("label '{0}' already exists")]
    DuplicateLabel(String),

    #[error("setting '{0}' does not exist")]
    UnknownSetting(String),

    #[error("unknown symbol or command '{0}'")]
    UnknownSymbol(String),

    #[error("element at index {index} is not a {expected}")]
    WrongElement { index: usize, expected: &'static str },

    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<RoutineError>,
    },

    #[error("behavior '{0}' appears before any waypoint")]
    OrphanBehavior(String),

    #[error("failed to access routine file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RoutineError {
    pub fn invalid(name: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// 为错误附上脚本行号（1 起始）
    pub fn at_line(self, line: usize) -> Self {
        Self::Line {
            line,
            source: Box::new(self),
        }
    }
}

/// 运行期错误：协作方失败、取消、熔断
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Input injection failed: {0}")]
    Input(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Path planning failed: {0}")]
    PathPlanning(String),

    #[error("Puzzle solver error: {0}")]
    Solver(String),

    #[error("Frame encoding failed: {0}")]
    Encode(String),

    #[error("Artifact write failed: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("No command book loaded")]
    NoCommandBook,

    #[error("Cancelled")]
    Cancelled,

    /// 连续失败次数超过硬上限，主动终止
    #[error("Fail-safe ceiling reached after {0} failures")]
    FailSafe(u32),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 稍后重试同一动作（截屏等瞬时失败）
    Retry,
    /// 记录后跳过，继续下一步
    Skip,
    /// 暂停决策循环，等待人工恢复
    Pause,
    /// 终止运行
    Abort,
}
