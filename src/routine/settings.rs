//! 可调设置注册表与校验器
//!
//! 路线脚本中的 `$` 元素只能修改注册表里存在的设置，取值经对应校验器转换；
//! 校验器同时供路线元素 / 行为的参数转换复用。

use serde::{Deserialize, Serialize};

use crate::routine::value::Primitive;

/// 校验器：文本 → 原始值，失败返回原因
pub type Validator = fn(&str) -> Result<Primitive, String>;

/// 已知设置及其校验器
pub const SETTING_VALIDATORS: &[(&str, Validator)] = &[
    ("move_tolerance", |v| validate_nonnegative_float(v).map(Primitive::Float)),
    ("adjust_tolerance", |v| validate_nonnegative_float(v).map(Primitive::Float)),
    ("record_layout", |v| validate_boolean(v).map(Primitive::Bool)),
    ("buff_cooldown", |v| validate_nonnegative_int(v).map(Primitive::Int)),
    ("skill_rotation_mode", |v| validate_boolean(v).map(Primitive::Bool)),
    ("skill_rotation_duration", |v| {
        validate_nonnegative_float(v).map(Primitive::Float)
    }),
];

pub fn validator_for(key: &str) -> Option<Validator> {
    SETTING_VALIDATORS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, validator)| *validator)
}

pub fn validate_nonnegative_int(value: &str) -> Result<i64, String> {
    let parsed: i64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not an integer"))?;
    if parsed < 0 {
        return Err(format!("'{value}' is negative"));
    }
    Ok(parsed)
}

pub fn validate_nonnegative_float(value: &str) -> Result<f64, String> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(format!("'{value}' is not a non-negative number"));
    }
    Ok(parsed)
}

pub fn validate_boolean(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("'{value}' is not a boolean")),
    }
}

pub fn validate_horizontal_arrows(value: &str) -> Result<String, String> {
    let lower = value.trim().to_ascii_lowercase();
    match lower.as_str() {
        "left" | "right" => Ok(lower),
        _ => Err(format!("'{value}' is not a horizontal arrow key")),
    }
}

pub fn validate_arrows(value: &str) -> Result<String, String> {
    let lower = value.trim().to_ascii_lowercase();
    match lower.as_str() {
        "up" | "down" | "left" | "right" => Ok(lower),
        _ => Err(format!("'{value}' is not an arrow key")),
    }
}

/// 运行时设置当前值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    /// 判定到达目标点的距离阈值（相对坐标）
    pub move_tolerance: f64,
    /// 微调阶段的距离阈值
    pub adjust_tolerance: f64,
    /// 是否记录行走过的位置
    pub record_layout: bool,
    /// 职业增益技能的最小间隔（秒）
    pub buff_cooldown: i64,
    /// 到达路点后用技能轮转代替附加行为
    pub skill_rotation_mode: bool,
    /// 技能轮转时长（秒）
    pub skill_rotation_duration: f64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            move_tolerance: 0.1,
            adjust_tolerance: 0.01,
            record_layout: false,
            buff_cooldown: 180,
            skill_rotation_mode: false,
            skill_rotation_duration: 5.0,
        }
    }
}

impl LiveSettings {
    /// 写入已校验的值；键未知或类型不符时返回 false
    pub fn apply(&mut self, key: &str, value: &Primitive) -> bool {
        match (key, value) {
            ("move_tolerance", Primitive::Float(v)) => self.move_tolerance = *v,
            ("adjust_tolerance", Primitive::Float(v)) => self.adjust_tolerance = *v,
            ("record_layout", Primitive::Bool(v)) => self.record_layout = *v,
            ("buff_cooldown", Primitive::Int(v)) => self.buff_cooldown = *v,
            ("skill_rotation_mode", Primitive::Bool(v)) => self.skill_rotation_mode = *v,
            ("skill_rotation_duration", Primitive::Float(v)) => self.skill_rotation_duration = *v,
            _ => return false,
        }
        true
    }
}
