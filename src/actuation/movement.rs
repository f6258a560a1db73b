//! 移动：沿规划路径逼近目标、微调、行走、下跳
//!
//! 位置取自最新感知快照。每次按键前检查 enabled，暂停后立即停止并抬起方向键；
//! 移动途中每走一步尝试顺手放一个可用技能。

use std::f64::consts::SQRT_2;

use rand::Rng;
use tracing::debug;

use crate::actuation::input::{hold, press, sleep_secs};
use crate::actuation::path::PathPlanner;
use crate::core::AgentError;
use crate::perception::Point;
use crate::skills::SkillRotationController;

/// 单次移动的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Arrived,
    /// 步数预算耗尽仍未到达
    OutOfSteps,
    /// 被暂停打断
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    fn key(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }
}

pub struct Navigator<'a> {
    /// 按键、共享上下文、随机数与技能调度都经由技能控制器借用
    pub skills: SkillRotationController<'a>,
    pub planner: &'a dyn PathPlanner,
}

impl Navigator<'_> {
    fn position(&self) -> Result<Point, AgentError> {
        self.skills
            .ctx
            .snapshot()
            .position
            .ok_or_else(|| AgentError::Capture("player position unknown".to_string()))
    }

    fn enabled(&self) -> bool {
        self.skills.ctx.is_enabled()
    }

    /// 沿规划路径移动到目标，最多走 max_steps 步
    pub async fn move_to(&mut self, target: Point, max_steps: u32) -> Result<MoveOutcome, AgentError> {
        let tolerance = self.skills.ctx.settings().move_tolerance;
        let start = self.position()?;
        let path = self.planner.plan(start, target)?;
        debug!(%start, %target, waypoints = path.len(), "Moving");

        let mut budget = max_steps;
        for (i, point) in path.iter().enumerate() {
            let last_leg = i + 1 == path.len();
            let mut held: Option<Direction> = None;
            let mut horizontal_turn = true;
            let result = self
                .follow_leg(*point, target, tolerance, last_leg, &mut budget, &mut held, &mut horizontal_turn)
                .await;
            if let Some(direction) = held.take() {
                self.skills.input.key_up(direction.key()).await?;
            }
            result?;
            if !self.enabled() {
                return Ok(MoveOutcome::Interrupted);
            }
            if budget == 0 {
                break;
            }
        }

        let position = self.position()?;
        if position.distance(&target) <= tolerance {
            Ok(MoveOutcome::Arrived)
        } else if !self.enabled() {
            Ok(MoveOutcome::Interrupted)
        } else {
            Ok(MoveOutcome::OutOfSteps)
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn follow_leg(
        &mut self,
        point: Point,
        target: Point,
        tolerance: f64,
        last_leg: bool,
        budget: &mut u32,
        held: &mut Option<Direction>,
        horizontal_turn: &mut bool,
    ) -> Result<(), AgentError> {
        let threshold = tolerance / SQRT_2;
        loop {
            let position = self.position()?;
            if !self.enabled()
                || *budget == 0
                || position.distance(&point) <= tolerance
                || position.distance(&target) <= tolerance
            {
                return Ok(());
            }

            let direction = if *horizontal_turn {
                let dx = point.x - position.x;
                (dx.abs() > threshold).then(|| {
                    if dx < 0.0 {
                        Direction::Left
                    } else {
                        Direction::Right
                    }
                })
            } else {
                let dy = point.y - position.y;
                (dy.abs() > threshold).then(|| if dy < 0.0 { Direction::Up } else { Direction::Down })
            };
            *horizontal_turn = !*horizontal_turn;

            let Some(direction) = direction else {
                continue;
            };
            self.hold_direction(direction, held).await?;
            if direction.is_horizontal() && self.skills.rng.gen_bool(0.3) {
                // 水平移动中偶尔跳一下，避免卡在梯子 / 绳子上
                press(self.skills.input, self.skills.jump_key, 1, 0.05, 0.05).await?;
                let pause = self.skills.rng.gen_range(0.05..0.12);
                sleep_secs(pause).await;
            }
            self.step(direction).await?;
            *budget -= 1;

            if self.skills.ctx.settings().record_layout {
                if let Ok(position) = self.position() {
                    self.planner.record(position);
                }
            }
            self.skills.try_opportunistic().await?;
            if !last_leg {
                sleep_secs(if direction.is_horizontal() { 0.15 } else { 0.05 }).await;
            }
        }
    }

    /// 切换按住的方向键；向上从不按住（只靠跳跃 + 上爬绳）
    async fn hold_direction(
        &mut self,
        direction: Direction,
        held: &mut Option<Direction>,
    ) -> Result<(), AgentError> {
        if *held == Some(direction) {
            return Ok(());
        }
        if direction != Direction::Up {
            self.skills.input.key_down(direction.key()).await?;
        }
        if let Some(previous) = held.take() {
            self.skills.input.key_up(previous.key()).await?;
        }
        if direction != Direction::Up {
            *held = Some(direction);
        }
        Ok(())
    }

    /// 朝某方向迈一步：水平为跳跃，向下为下跳，向上为上跳
    async fn step(&mut self, direction: Direction) -> Result<(), AgentError> {
        if !self.enabled() {
            return Ok(());
        }
        let input = self.skills.input;
        let jump = self.skills.jump_key;
        match direction {
            Direction::Left | Direction::Right | Direction::Down => {
                press(input, jump, 1, 0.05, 0.05).await?;
            }
            Direction::Up => {
                input.key_down("up").await?;
                let result = press(input, jump, 1, 0.05, 0.05).await;
                input.key_up("up").await?;
                result?;
            }
        }
        sleep_secs(0.1).await;
        Ok(())
    }

    /// 小步微调到目标（使用 adjust_tolerance）
    pub async fn adjust(&mut self, target: Point, max_steps: u32) -> Result<MoveOutcome, AgentError> {
        let tolerance = self.skills.ctx.settings().adjust_tolerance;
        let input = self.skills.input;
        for _ in 0..max_steps {
            if !self.enabled() {
                return Ok(MoveOutcome::Interrupted);
            }
            let position = self.position()?;
            let dx = target.x - position.x;
            let dy = target.y - position.y;
            if dx.abs() > tolerance {
                let key = if dx < 0.0 { "left" } else { "right" };
                press(input, key, 1, 0.03, 0.05).await?;
            } else if dy.abs() > tolerance {
                let key = if dy < 0.0 { "up" } else { "down" };
                input.key_down(key).await?;
                let result = press(input, self.skills.jump_key, 1, 0.05, 0.05).await;
                input.key_up(key).await?;
                result?;
                sleep_secs(0.3).await;
            } else {
                return Ok(MoveOutcome::Arrived);
            }
        }
        let position = self.position()?;
        if position.distance(&target) <= tolerance * SQRT_2 {
            Ok(MoveOutcome::Arrived)
        } else {
            Ok(MoveOutcome::OutOfSteps)
        }
    }

    /// 按住方向键行走 seconds 秒
    pub async fn walk(&mut self, direction: &str, seconds: f64) -> Result<(), AgentError> {
        if !self.enabled() {
            return Ok(());
        }
        hold(self.skills.input, direction, seconds).await?;
        sleep_secs(0.05).await;
        Ok(())
    }

    /// 下跳后持续跳跃，直到离开起点 distance 或尝试 6 次
    pub async fn fall(&mut self, distance: f64) -> Result<(), AgentError> {
        if !self.enabled() {
            return Ok(());
        }
        let start = self.position()?;
        let input = self.skills.input;
        input.key_down("down").await?;
        sleep_secs(0.05).await;
        if self.skills.ctx.stage_fright() && self.skills.rng.gen_bool(0.5) {
            let pause = self.skills.rng.gen_range(0.2..0.4);
            sleep_secs(pause).await;
        }
        let mut result = Ok(());
        for _ in 0..6 {
            let moved = self.position().map(|p| p.distance(&start)).unwrap_or(0.0);
            if !self.enabled() || moved >= distance {
                break;
            }
            result = press(input, self.skills.jump_key, 1, 0.1, 0.05).await;
            if result.is_err() {
                break;
            }
        }
        input.key_up("down").await?;
        sleep_secs(0.05).await;
        result
    }
}
