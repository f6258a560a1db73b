//! 路点附加行为
//!
//! 行为挂在路点之下按顺序执行（路点计数为 0 时），与路线元素共享 kwargs / 文本编码约定。
//! 脚本中行为行缩进写在所属路点下方，名称大小写不敏感。

use std::fmt;

use crate::core::RoutineError;
use crate::perception::Point;
use crate::routine::settings::{validate_horizontal_arrows, validate_nonnegative_int};
use crate::routine::value::{
    bind, encode_line, optional, required, BoundArgs, Kwargs, Param, Primitive, RawArgs,
};

/// 行为种类及其已校验参数
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorKind {
    /// 沿规划路径移动到目标
    Move { target: Point, max_steps: u32 },
    /// 小步微调到目标
    Adjust { target: Point, max_steps: u32 },
    Wait { seconds: f64 },
    /// 按住方向键行走一段时间
    Walk { direction: String, seconds: f64 },
    /// 下跳后自由落体，直到离开起点指定距离
    Fall { distance: f64 },
    /// 普攻与冷却技能交替，持续指定秒数
    SkillRotation { seconds: f64 },
    /// 使用指令书中的技能（按技能 id 解析按键与次数）
    UseSkill { skill: String },
    /// 直接按键
    Press {
        key: String,
        count: u32,
        down_time: f64,
    },
}

/// 行为定义表：规范名称 + 参数
const BEHAVIORS: &[(&str, &[Param])] = &[
    ("Move", &[required("x"), required("y"), optional("max_steps", "15")]),
    ("Adjust", &[required("x"), required("y"), optional("max_steps", "5")]),
    ("Wait", &[required("duration")]),
    ("Walk", &[required("direction"), required("duration")]),
    ("Fall", &[optional("distance", "0.05")]),
    ("SkillRotation", &[optional("duration", "5")]),
    ("UseSkill", &[required("skill")]),
    (
        "Press",
        &[required("key"), optional("count", "1"), optional("down_time", "0.05")],
    ),
];

/// 路点附加行为
#[derive(Debug, Clone, PartialEq)]
pub struct Behavior {
    name: &'static str,
    kind: BehaviorKind,
    kwargs: Kwargs,
}

impl Behavior {
    /// 是否是已知行为名（大小写不敏感）
    pub fn is_known(name: &str) -> bool {
        lookup(name).is_some()
    }

    pub fn build(name: &str, args: &RawArgs) -> Result<Self, RoutineError> {
        let (canonical, params) =
            lookup(name).ok_or_else(|| RoutineError::UnknownSymbol(name.to_string()))?;
        let bound = bind(canonical, params, args)?;
        let (kind, kwargs) = match canonical {
            "Move" | "Adjust" => {
                let x = bound.float("x")?;
                let y = bound.float("y")?;
                let max_steps = steps(&bound)?;
                let kwargs = Kwargs::new()
                    .with("x", Primitive::Float(x))
                    .with("y", Primitive::Float(y))
                    .with("max_steps", Primitive::Int(max_steps as i64));
                let target = Point::new(x, y);
                let kind = if canonical == "Move" {
                    BehaviorKind::Move { target, max_steps }
                } else {
                    BehaviorKind::Adjust { target, max_steps }
                };
                (kind, kwargs)
            }
            "Wait" => {
                let seconds = nonnegative(&bound, "duration")?;
                (
                    BehaviorKind::Wait { seconds },
                    Kwargs::new().with("duration", Primitive::Float(seconds)),
                )
            }
            "Walk" => {
                let direction = bound.with("direction", validate_horizontal_arrows)?;
                let seconds = nonnegative(&bound, "duration")?;
                let kwargs = Kwargs::new()
                    .with("direction", Primitive::Str(direction.clone()))
                    .with("duration", Primitive::Float(seconds));
                (BehaviorKind::Walk { direction, seconds }, kwargs)
            }
            "Fall" => {
                let distance = nonnegative(&bound, "distance")?;
                (
                    BehaviorKind::Fall { distance },
                    Kwargs::new().with("distance", Primitive::Float(distance)),
                )
            }
            "SkillRotation" => {
                let seconds = nonnegative(&bound, "duration")?;
                (
                    BehaviorKind::SkillRotation { seconds },
                    Kwargs::new().with("duration", Primitive::Float(seconds)),
                )
            }
            "UseSkill" => {
                let skill = bound.string("skill")?;
                (
                    BehaviorKind::UseSkill {
                        skill: skill.clone(),
                    },
                    Kwargs::new().with("skill", Primitive::Str(skill)),
                )
            }
            _ => {
                let key = bound.string("key")?;
                let raw = bound.with("count", validate_nonnegative_int)?;
                let count = u32::try_from(raw)
                    .map_err(|_| RoutineError::invalid("count", raw, "too large"))?;
                let down_time = nonnegative(&bound, "down_time")?;
                let kwargs = Kwargs::new()
                    .with("key", Primitive::Str(key.clone()))
                    .with("count", Primitive::Int(count as i64))
                    .with("down_time", Primitive::Float(down_time));
                (
                    BehaviorKind::Press {
                        key,
                        count,
                        down_time,
                    },
                    kwargs,
                )
            }
        };
        Ok(Self {
            name: canonical,
            kind,
            kwargs,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> &BehaviorKind {
        &self.kind
    }

    pub fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    pub fn encode(&self) -> String {
        encode_line(self.name, &self.kwargs)
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for (k, v) in self.kwargs.iter() {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

fn lookup(name: &str) -> Option<(&'static str, &'static [Param])> {
    BEHAVIORS
        .iter()
        .find(|(canonical, _)| canonical.eq_ignore_ascii_case(name.trim()))
        .copied()
}

fn steps(bound: &BoundArgs) -> Result<u32, RoutineError> {
    let raw = bound.with("max_steps", validate_nonnegative_int)?;
    u32::try_from(raw).map_err(|_| RoutineError::invalid("max_steps", raw, "too large"))
}

fn nonnegative(bound: &BoundArgs, name: &str) -> Result<f64, RoutineError> {
    let value = bound.float(name)?;
    if value < 0.0 {
        return Err(RoutineError::invalid(name, value, "must not be negative"));
    }
    Ok(value)
}
