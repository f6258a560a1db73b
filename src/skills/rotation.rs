//! 技能轮转
//!
//! 在给定时长内交替执行：
//! - Attack：按住默认动作 + 随机水平方向，时长随剩余预算收窄，绝不越过截止时间；
//! - Skill：从可用的限频技能中均匀随机挑一个，按配置次数按下并记录使用；
//! - WaitForAvailable：没有可用技能时用不超过 0.3 秒的短促攻击等待；
//! - Done：到期或被暂停，所有按住的键都已抬起。
//!
//! 移动途中的「顺手放一个技能」复用同一套选择规则，但不进入状态机。

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::actuation::{deadline_after, press, sleep_secs, InputInjector};
use crate::core::{AgentError, SharedContext};
use crate::skills::cooldown::CooldownScheduler;
use crate::skills::registry::SkillRegistry;

const HORIZONTAL: [&str; 2] = ["left", "right"];
const WAIT_BURST: f64 = 0.3;
const UNSTICK_PROBABILITY: f64 = 0.3;
const SKILL_KEY_TIME: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    Attack,
    Skill,
    WaitForAvailable,
    Done,
}

/// 一次轮转的统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotationReport {
    pub attack_phases: u32,
    pub skills_used: Vec<String>,
}

/// 默认动作按住时长的取值区间；剩余预算不足 0.05 秒时不再按住
pub fn attack_hold_bounds(remaining: f64) -> Option<(f64, f64)> {
    if remaining <= 0.05 {
        None
    } else if remaining >= 1.0 {
        Some((1.0, remaining.min(3.0)))
    } else if remaining > 0.2 {
        Some((0.2, remaining))
    } else {
        Some((0.05, remaining))
    }
}

/// 借用决策循环持有的状态驱动一次轮转
pub struct SkillRotationController<'a> {
    pub input: &'a dyn InputInjector,
    pub ctx: &'a SharedContext,
    pub registry: &'a SkillRegistry,
    pub scheduler: &'a mut CooldownScheduler,
    pub rng: &'a mut StdRng,
    pub jump_key: &'a str,
}

impl SkillRotationController<'_> {
    /// 运行 duration 秒（被暂停时提前结束）
    pub async fn run(&mut self, duration: f64) -> Result<RotationReport, AgentError> {
        let end = deadline_after(duration);
        let attack_key = self.registry.default_action_key().to_string();
        let mut report = RotationReport::default();
        let mut phase = RotationPhase::Attack;

        loop {
            if !self.ctx.is_enabled() || Instant::now() >= end {
                phase = RotationPhase::Done;
            }
            phase = match phase {
                RotationPhase::Attack => {
                    if self.attack(&attack_key, remaining(end)).await? {
                        report.attack_phases += 1;
                    }
                    RotationPhase::Skill
                }
                RotationPhase::Skill => match self.pick() {
                    None => RotationPhase::WaitForAvailable,
                    Some(skill) => {
                        self.fire(&skill).await?;
                        report.skills_used.push(skill);
                        RotationPhase::Attack
                    }
                },
                RotationPhase::WaitForAvailable => {
                    let burst = remaining(end).min(WAIT_BURST);
                    if self.attack(&attack_key, burst).await? {
                        report.attack_phases += 1;
                    }
                    if self.has_available() {
                        RotationPhase::Skill
                    } else {
                        RotationPhase::WaitForAvailable
                    }
                }
                RotationPhase::Done => break,
            };
        }

        debug!(
            attack_phases = report.attack_phases,
            skills = report.skills_used.len(),
            "Skill rotation finished"
        );
        Ok(report)
    }

    /// 顺手放一个可用的限频技能；没有可用技能时什么也不做
    pub async fn try_opportunistic(&mut self) -> Result<Option<String>, AgentError> {
        let Some(skill) = self.pick() else {
            return Ok(None);
        };
        self.fire(&skill).await?;
        Ok(Some(skill))
    }

    fn has_available(&self) -> bool {
        !available_limited(self.registry, &*self.scheduler).is_empty()
    }

    fn pick(&mut self) -> Option<String> {
        let available = available_limited(self.registry, &*self.scheduler);
        let choice = available.choose(&mut *self.rng)?;
        Some(choice.to_string())
    }

    async fn fire(&mut self, skill: &str) -> Result<(), AgentError> {
        let key = self.registry.key_for(skill);
        let presses = self.registry.presses_for(skill);
        debug!(skill, key, presses, "Using skill");
        press(self.input, key, presses, SKILL_KEY_TIME, SKILL_KEY_TIME).await?;
        self.scheduler.record_used(skill);
        sleep_secs(SKILL_KEY_TIME).await;
        Ok(())
    }

    /// 按住默认动作 + 随机水平方向；返回是否实际按住过
    async fn attack(&mut self, key: &str, budget: f64) -> Result<bool, AgentError> {
        let Some((lo, hi)) = attack_hold_bounds(budget) else {
            // 余量太小不值得按键，直接耗尽
            sleep_secs(budget).await;
            return Ok(false);
        };
        let hold = self.rng.gen_range(lo..=hi);
        let direction = HORIZONTAL[self.rng.gen_range(0..HORIZONTAL.len())];
        let unstick = self.rng.gen_bool(UNSTICK_PROBABILITY);

        self.input.key_down(direction).await?;
        let result = self.hold_attack(key, hold, unstick).await;
        let released = self.input.key_up(direction).await;
        result?;
        released?;
        sleep_secs(0.03).await;
        Ok(true)
    }

    async fn hold_attack(&mut self, key: &str, hold: f64, unstick: bool) -> Result<(), AgentError> {
        let until = deadline_after(hold);
        self.input.key_down(key).await?;
        let mut result = Ok(());
        if unstick {
            result = press(self.input, self.jump_key, 1, SKILL_KEY_TIME, SKILL_KEY_TIME).await;
        }
        while result.is_ok() && self.ctx.is_enabled() {
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            tokio::time::sleep(left.min(Duration::from_millis(50))).await;
        }
        let released = self.input.key_up(key).await;
        result.and(released)
    }
}

/// 可用 ∩ 限频
fn available_limited<'r>(
    registry: &'r SkillRegistry,
    scheduler: &'r CooldownScheduler,
) -> Vec<&'r str> {
    let limited = registry.rate_limited();
    scheduler
        .available()
        .into_iter()
        .filter(|key| limited.contains(key))
        .collect()
}

fn remaining(end: Instant) -> f64 {
    end.saturating_duration_since(Instant::now()).as_secs_f64()
}
