//! 路径规划协作方
//!
//! 规划器把「当前位置 → 目标位置」转换为一串中间点（最后一个点为目标）。
//! 真实地形图由外部实现；没有地形信息时使用 DirectPlanner 直线前往。

use parking_lot::Mutex;

use crate::core::AgentError;
use crate::perception::Point;

pub trait PathPlanner: Send + Sync {
    fn plan(&self, from: Point, to: Point) -> Result<Vec<Point>, AgentError>;

    /// 记录走过的位置（record_layout 开启时由移动逻辑调用）
    fn record(&self, _position: Point) {}
}

/// 直线规划：路径只有目标点本身；同时保存记录下来的位置
#[derive(Debug, Default)]
pub struct DirectPlanner {
    recorded: Mutex<Vec<Point>>,
}

impl DirectPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Point> {
        self.recorded.lock().clone()
    }
}

impl PathPlanner for DirectPlanner {
    fn plan(&self, _from: Point, to: Point) -> Result<Vec<Point>, AgentError> {
        if !(to.x.is_finite() && to.y.is_finite()) {
            return Err(AgentError::PathPlanning(format!("invalid target {to}")));
        }
        Ok(vec![to])
    }

    fn record(&self, position: Point) {
        let mut recorded = self.recorded.lock();
        // 与上一个记录点相同则跳过
        if recorded.last() != Some(&position) {
            recorded.push(position);
        }
    }
}
