//! 路线元素：路点 `*`、标签 `@`、跳转 `>`、设置修改 `$`
//!
//! 每个元素只保存原始类型构造参数（kwargs），文本序列化与实时改参都以它为准；
//! 跳转的 link、标签的反向引用集合等结构字段不进入 kwargs。

use std::collections::BTreeSet;
use std::fmt;

use crate::core::RoutineError;
use crate::perception::Point;
use crate::routine::behaviors::Behavior;
use crate::routine::settings::{validate_boolean, validate_nonnegative_int, validator_for};
use crate::routine::value::{
    bind, encode_line, optional, required, BoundArgs, Kwargs, Param, Primitive, RawArgs,
};

/// 元素在所属程序内的稳定标识（插入 / 删除不变）
pub type ElementId = u64;

pub const WAYPOINT: &str = "*";
pub const LABEL: &str = "@";
pub const BRANCH: &str = ">";
pub const SETTING: &str = "$";

const WAYPOINT_PARAMS: &[Param] = &[
    required("x"),
    required("y"),
    optional("frequency", "1"),
    optional("skip", "False"),
    optional("adjust", "False"),
];
const LABEL_PARAMS: &[Param] = &[required("label")];
const BRANCH_PARAMS: &[Param] = &[
    required("label"),
    optional("frequency", "1"),
    optional("skip", "False"),
];
const SETTING_PARAMS: &[Param] = &[required("target"), required("value")];

/// 按周期执行的访问计数
///
/// 计数为 0 的访问才执行动作；每次访问后 `counter = (counter + 1) % max(period, 1)`，
/// 因此 period 为 0 或 1 都表示每次访问都执行。`skip_first` 让计数从 1 开始，
/// 首次执行推迟一次访问。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatCounter {
    period: u32,
    counter: u32,
}

impl RepeatCounter {
    pub fn new(period: u32, skip_first: bool) -> Self {
        Self {
            period,
            counter: u32::from(skip_first),
        }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn is_due(&self) -> bool {
        self.counter == 0
    }

    pub fn advance(&mut self) {
        self.counter = (self.counter + 1) % self.period.max(1);
    }
}

/// 路点：导航到位置，按周期执行附加行为
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub location: Point,
    pub repeat: RepeatCounter,
    pub skip_first: bool,
    pub fine_adjust: bool,
    pub behaviors: Vec<Behavior>,
    kwargs: Kwargs,
}

impl Waypoint {
    /// 默认参数的路点（每次访问都执行）
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            location: Point::new(x, y),
            repeat: RepeatCounter::new(1, false),
            skip_first: false,
            fine_adjust: false,
            behaviors: Vec::new(),
            kwargs: Kwargs::new()
                .with("x", Primitive::Float(x))
                .with("y", Primitive::Float(y))
                .with("frequency", Primitive::Int(1))
                .with("skip", Primitive::Bool(false))
                .with("adjust", Primitive::Bool(false)),
        }
    }

    pub fn build(args: &RawArgs) -> Result<Self, RoutineError> {
        let bound = bind(WAYPOINT, WAYPOINT_PARAMS, args)?;
        let x = bound.float("x")?;
        let y = bound.float("y")?;
        let frequency = frequency(&bound)?;
        let skip_first = bound.with("skip", validate_boolean)?;
        let fine_adjust = bound.with("adjust", validate_boolean)?;
        let kwargs = Kwargs::new()
            .with("x", Primitive::Float(x))
            .with("y", Primitive::Float(y))
            .with("frequency", Primitive::Int(frequency as i64))
            .with("skip", Primitive::Bool(skip_first))
            .with("adjust", Primitive::Bool(fine_adjust));
        Ok(Self {
            location: Point::new(x, y),
            repeat: RepeatCounter::new(frequency, skip_first),
            skip_first,
            fine_adjust,
            behaviors: Vec::new(),
            kwargs,
        })
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behaviors.push(behavior);
        self
    }
}

/// 跳转目标标签
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub name: String,
    /// 在程序中的位置，由程序在每次结构修改后重新推导
    pub index: usize,
    /// 当前绑定到此标签的跳转
    pub links: BTreeSet<ElementId>,
    kwargs: Kwargs,
}

impl Label {
    pub fn new(name: &str) -> Result<Self, RoutineError> {
        Self::build(&RawArgs::new().arg(name))
    }

    pub fn build(args: &RawArgs) -> Result<Self, RoutineError> {
        let bound = bind(LABEL, LABEL_PARAMS, args)?;
        let name = bound.string("label")?;
        Ok(Self {
            kwargs: Kwargs::new().with("label", Primitive::Str(name.clone())),
            name,
            index: 0,
            links: BTreeSet::new(),
        })
    }
}

/// 无条件跳转到标签，与路点一样受周期计数限制
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub target_label: String,
    pub repeat: RepeatCounter,
    pub skip_first: bool,
    /// 已绑定的标签；绑定前或标签不存在时为 None
    pub link: Option<ElementId>,
    kwargs: Kwargs,
}

impl Branch {
    pub fn new(target: &str) -> Result<Self, RoutineError> {
        Self::build(&RawArgs::new().arg(target))
    }

    pub fn build(args: &RawArgs) -> Result<Self, RoutineError> {
        let bound = bind(BRANCH, BRANCH_PARAMS, args)?;
        let target_label = bound.string("label")?;
        let frequency = frequency(&bound)?;
        let skip_first = bound.with("skip", validate_boolean)?;
        Ok(Self {
            kwargs: Kwargs::new()
                .with("label", Primitive::Str(target_label.clone()))
                .with("frequency", Primitive::Int(frequency as i64))
                .with("skip", Primitive::Bool(skip_first)),
            target_label,
            repeat: RepeatCounter::new(frequency, skip_first),
            skip_first,
            link: None,
        })
    }
}

/// 修改一项运行时设置，每次访问都生效
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub key: String,
    pub value: Primitive,
    kwargs: Kwargs,
}

impl SettingChange {
    pub fn new(key: &str, value: &str) -> Result<Self, RoutineError> {
        Self::build(&RawArgs::new().arg(key).arg(value))
    }

    pub fn build(args: &RawArgs) -> Result<Self, RoutineError> {
        let bound = bind(SETTING, SETTING_PARAMS, args)?;
        let key = bound.string("target")?;
        let validator =
            validator_for(&key).ok_or_else(|| RoutineError::UnknownSetting(key.clone()))?;
        let value = bound.with("value", validator)?;
        Ok(Self {
            kwargs: Kwargs::new()
                .with("target", Primitive::Str(key.clone()))
                .with("value", value.clone()),
            key,
            value,
        })
    }
}

/// 路线元素
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramElement {
    Waypoint(Waypoint),
    Label(Label),
    Branch(Branch),
    SettingChange(SettingChange),
}

impl ProgramElement {
    /// 按符号构造元素；符号未知、参数不合法都是构造错误
    pub fn build(symbol: &str, args: &RawArgs) -> Result<Self, RoutineError> {
        match symbol.trim() {
            WAYPOINT => Waypoint::build(args).map(Self::Waypoint),
            LABEL => Label::build(args).map(Self::Label),
            BRANCH => Branch::build(args).map(Self::Branch),
            SETTING => SettingChange::build(args).map(Self::SettingChange),
            other => Err(RoutineError::UnknownSymbol(other.to_string())),
        }
    }

    pub fn is_symbol(text: &str) -> bool {
        matches!(text.trim(), WAYPOINT | LABEL | BRANCH | SETTING)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Waypoint(_) => WAYPOINT,
            Self::Label(_) => LABEL,
            Self::Branch(_) => BRANCH,
            Self::SettingChange(_) => SETTING,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Waypoint(_) => "waypoint",
            Self::Label(_) => "label",
            Self::Branch(_) => "branch",
            Self::SettingChange(_) => "setting",
        }
    }

    pub fn kwargs(&self) -> &Kwargs {
        match self {
            Self::Waypoint(w) => &w.kwargs,
            Self::Label(l) => &l.kwargs,
            Self::Branch(b) => &b.kwargs,
            Self::SettingChange(s) => &s.kwargs,
        }
    }

    /// 文本形式。标签前带一个空行；路点的附加行为逐行缩进跟在后面。
    pub fn encode(&self) -> String {
        let line = encode_line(self.symbol(), self.kwargs());
        match self {
            Self::Label(_) => format!("\n{line}"),
            Self::Waypoint(w) => {
                let mut text = line;
                for behavior in &w.behaviors {
                    text.push_str("\n    ");
                    text.push_str(&behavior.encode());
                }
                text
            }
            _ => line,
        }
    }
}

impl fmt::Display for ProgramElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waypoint(w) => write!(f, "  * ({}, {})", w.location.x, w.location.y),
            Self::Label(l) => write!(f, "{}:", l.name),
            Self::Branch(b) => write!(f, "  > {}", b.target_label),
            Self::SettingChange(s) => write!(f, "  $ {} = {}", s.key, s.value),
        }
    }
}

fn frequency(bound: &BoundArgs) -> Result<u32, RoutineError> {
    let raw = bound.with("frequency", validate_nonnegative_int)?;
    u32::try_from(raw).map_err(|_| RoutineError::invalid("frequency", raw, "too large"))
}
