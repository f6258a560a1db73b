//! 状态定义：感知快照 Snapshot 与观察者投影 RoutineStatus
//!
//! 感知循环每帧发布一个新的 Arc<Snapshot>（整体替换，不原地修改），读者只会看到完整的旧快照或新快照；
//! 决策循环把内部状态投影为轻量的 RoutineStatus 供 UI / 叠加层读取。

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::agent::PuzzlePhase;
use crate::perception::{Frame, Point};

/// 检测到的环境事件类别
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionKind {
    /// 小地图上的谜题（符文）标记
    PuzzleMarker,
    /// 谜题解开后出现的增益图标（屏幕坐标）
    PuzzleSolvedBuff,
    /// 小地图上的其他玩家
    OtherPlayer,
    /// 画面大面积变黑（掉线 / 切图卡住）
    BlackScreen,
    /// 打断操作的弹窗消息，附消息名
    InterruptMessage(String),
    /// 骷髅诅咒（需左右连打解除）
    SkullCurse,
    /// 精英首领警告
    EliteWarning,
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: DetectionKind,
    pub position: Option<Point>,
}

impl Detection {
    pub fn new(kind: DetectionKind) -> Self {
        Self {
            kind,
            position: None,
        }
    }

    pub fn at(kind: DetectionKind, position: Point) -> Self {
        Self {
            kind,
            position: Some(position),
        }
    }
}

/// 感知循环发布的不可变快照
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// 单调递增的发布序号，0 表示尚未发布任何帧
    pub seq: u64,
    pub captured_at: Instant,
    pub frame: Option<Frame>,
    /// 角色位置；当前帧未匹配到时保留上一次已知位置
    pub position: Option<Point>,
    pub detections: Vec<Detection>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            seq: 0,
            captured_at: Instant::now(),
            frame: None,
            position: None,
            detections: Vec::new(),
        }
    }

    pub fn find(&self, kind: &DetectionKind) -> impl Iterator<Item = &Detection> + '_ {
        let kind = kind.clone();
        self.detections.iter().filter(move |d| d.kind == kind)
    }

    pub fn has(&self, kind: &DetectionKind) -> bool {
        self.detections.iter().any(|d| &d.kind == kind)
    }

    pub fn count(&self, kind: &DetectionKind) -> usize {
        self.detections.iter().filter(|d| &d.kind == kind).count()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

pub type SharedSnapshot = Arc<Snapshot>;

/// 观察者看到的「投影」状态，轻量且易于渲染
#[derive(Clone, Debug, Serialize)]
pub struct RoutineStatus {
    pub enabled: bool,
    pub index: usize,
    pub program_len: usize,
    /// 当前元素的单行描述
    pub current: Option<String>,
    pub command_book: Option<String>,
    pub puzzle_phase: PuzzlePhase,
    pub puzzle_attempts: u32,
    pub last_error: Option<String>,
}

impl Default for RoutineStatus {
    fn default() -> Self {
        Self {
            enabled: false,
            index: 0,
            program_len: 0,
            current: None,
            command_book: None,
            puzzle_phase: PuzzlePhase::Idle,
            puzzle_attempts: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_queries() {
        let mut snapshot = Snapshot::empty();
        snapshot.detections = vec![
            Detection::at(DetectionKind::OtherPlayer, Point::new(0.1, 0.2)),
            Detection::at(DetectionKind::OtherPlayer, Point::new(0.3, 0.2)),
            Detection::new(DetectionKind::EliteWarning),
        ];
        assert_eq!(snapshot.count(&DetectionKind::OtherPlayer), 2);
        assert!(snapshot.has(&DetectionKind::EliteWarning));
        assert!(!snapshot.has(&DetectionKind::PuzzleMarker));
        assert_eq!(snapshot.find(&DetectionKind::OtherPlayer).count(), 2);
    }
}
