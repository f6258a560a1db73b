//! 构造参数：原始值、有序 kwargs 与参数绑定
//!
//! 每个路线元素 / 行为都保留一份按定义顺序排列、只含原始类型的构造参数（kwargs），
//! 它是文本序列化与实时改参的唯一来源。脚本中的参数既可按位置给出也可用 key=value 给出，
//! 绑定规则与函数调用一致：多余位置参数、未知键、重复键、缺少必填参数都属于构造错误。

use std::fmt;

use crate::core::RoutineError;

/// 原始类型值
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Primitive {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Primitive::Float(v) => Some(*v),
            Primitive::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Primitive::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Primitive::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Int(v) => write!(f, "{v}"),
            Primitive::Float(v) => write!(f, "{v}"),
            Primitive::Bool(true) => f.write_str("True"),
            Primitive::Bool(false) => f.write_str("False"),
            Primitive::Str(v) => f.write_str(v),
        }
    }
}

/// 按定义顺序排列的构造参数
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Kwargs(Vec<(String, Primitive)>);

impl Kwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: Primitive) {
        self.0.push((name.to_string(), value));
    }

    pub fn with(mut self, name: &str, value: Primitive) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Primitive> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Primitive)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 参数定义：名称 + 可选默认值（文本形式，与脚本中的写法一致）
#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub default: Option<&'static str>,
}

pub const fn required(name: &'static str) -> Param {
    Param {
        name,
        default: None,
    }
}

pub const fn optional(name: &'static str, default: &'static str) -> Param {
    Param {
        name,
        default: Some(default),
    }
}

/// 未绑定的原始参数：位置参数 + key=value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawArgs {
    pub positional: Vec<String>,
    pub keyword: Vec<(String, String)>,
}

impl RawArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把逗号分隔后的各段拆成位置参数与关键字参数
    pub fn parse<'a>(parts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut args = Self::default();
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.find('=') {
                Some(i) => args
                    .keyword
                    .push((part[..i].trim().to_string(), part[i + 1..].trim().to_string())),
                None => args.positional.push(part.to_string()),
            }
        }
        args
    }

    pub fn arg(mut self, value: impl ToString) -> Self {
        self.positional.push(value.to_string());
        self
    }

    pub fn kw(mut self, name: &str, value: impl ToString) -> Self {
        self.keyword.push((name.to_string(), value.to_string()));
        self
    }
}

impl From<&Kwargs> for RawArgs {
    fn from(kwargs: &Kwargs) -> Self {
        Self {
            positional: Vec::new(),
            keyword: kwargs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// 绑定完成的参数（每个定义参数恰好一个文本值）
#[derive(Debug)]
pub struct BoundArgs {
    values: Vec<(&'static str, String)>,
}

impl BoundArgs {
    pub fn raw(&self, name: &str) -> &str {
        self.values
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    pub fn float(&self, name: &str) -> Result<f64, RoutineError> {
        parse_float(name, self.raw(name))
    }

    pub fn string(&self, name: &str) -> Result<String, RoutineError> {
        parse_string(name, self.raw(name))
    }

    /// 使用自定义校验器转换
    pub fn with<T>(
        &self,
        name: &str,
        validator: impl Fn(&str) -> Result<T, String>,
    ) -> Result<T, RoutineError> {
        let raw = self.raw(name);
        validator(raw).map_err(|reason| RoutineError::invalid(name, raw, reason))
    }
}

/// 按参数定义绑定原始参数
pub fn bind(symbol: &str, params: &[Param], args: &RawArgs) -> Result<BoundArgs, RoutineError> {
    if args.positional.len() > params.len() {
        return Err(RoutineError::TooManyArguments {
            symbol: symbol.to_string(),
            max: params.len(),
            got: args.positional.len(),
        });
    }

    let mut slots: Vec<Option<String>> = vec![None; params.len()];
    for (slot, value) in slots.iter_mut().zip(&args.positional) {
        *slot = Some(value.clone());
    }

    for (name, value) in &args.keyword {
        let i = params
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| RoutineError::UnknownArgument {
                symbol: symbol.to_string(),
                name: name.clone(),
            })?;
        if slots[i].is_some() {
            return Err(RoutineError::DuplicateArgument {
                symbol: symbol.to_string(),
                name: name.clone(),
            });
        }
        slots[i] = Some(value.clone());
    }

    let values = params
        .iter()
        .zip(slots)
        .map(|(param, slot)| match (slot, param.default) {
            (Some(v), _) => Ok((param.name, v)),
            (None, Some(default)) => Ok((param.name, default.to_string())),
            (None, None) => Err(RoutineError::MissingArgument {
                symbol: symbol.to_string(),
                name: param.name.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BoundArgs { values })
}

pub fn parse_float(name: &str, raw: &str) -> Result<f64, RoutineError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| RoutineError::invalid(name, raw, "expected a number"))?;
    if !value.is_finite() {
        return Err(RoutineError::invalid(name, raw, "expected a finite number"));
    }
    Ok(value)
}

/// 文本参数：去除首尾空白，且不得包含会破坏脚本语法的字符
pub fn parse_string(name: &str, raw: &str) -> Result<String, RoutineError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(RoutineError::invalid(name, raw, "must not be empty"));
    }
    if value.contains([',', '=', '\n', '\r']) {
        return Err(RoutineError::invalid(
            name,
            raw,
            "must not contain ',', '=' or line breaks",
        ));
    }
    Ok(value.to_string())
}

/// 单行文本形式：`symbol, k=v, k=v`
pub fn encode_line(symbol: &str, kwargs: &Kwargs) -> String {
    let mut parts = vec![symbol.to_string()];
    parts.extend(kwargs.iter().map(|(k, v)| format!("{k}={v}")));
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &[Param] = &[required("x"), required("y"), optional("frequency", "1")];

    #[test]
    fn test_parse_separates_positional_and_keyword() {
        let args = RawArgs::parse([" 0.5", "y = 0.25 ", "", "frequency=3"]);
        assert_eq!(args.positional, vec!["0.5"]);
        assert_eq!(
            args.keyword,
            vec![
                ("y".to_string(), "0.25".to_string()),
                ("frequency".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn test_bind_fills_defaults() {
        let bound = bind("*", PARAMS, &RawArgs::new().arg(1).arg(2)).unwrap();
        assert_eq!(bound.raw("x"), "1");
        assert_eq!(bound.raw("frequency"), "1");
    }

    #[test]
    fn test_bind_rejects_too_many_positionals() {
        let args = RawArgs::new().arg(1).arg(2).arg(3).arg(4);
        assert!(matches!(
            bind("*", PARAMS, &args),
            Err(RoutineError::TooManyArguments { max: 3, got: 4, .. })
        ));
    }

    #[test]
    fn test_bind_rejects_unknown_duplicate_and_missing() {
        let unknown = RawArgs::new().arg(1).arg(2).kw("speed", 3);
        assert!(matches!(
            bind("*", PARAMS, &unknown),
            Err(RoutineError::UnknownArgument { .. })
        ));

        let duplicate = RawArgs::new().arg(1).kw("x", 2).kw("y", 3);
        assert!(matches!(
            bind("*", PARAMS, &duplicate),
            Err(RoutineError::DuplicateArgument { .. })
        ));

        let missing = RawArgs::new().arg(1);
        assert!(matches!(
            bind("*", PARAMS, &missing),
            Err(RoutineError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_primitive_display_is_script_compatible() {
        assert_eq!(Primitive::Bool(true).to_string(), "True");
        assert_eq!(Primitive::Float(0.25).to_string(), "0.25");
        assert_eq!(Primitive::Float(1.0).to_string(), "1");
        assert_eq!(Primitive::Int(-3).to_string(), "-3");
    }

    #[test]
    fn test_parse_string_rejects_separators() {
        assert!(parse_string("label", "a,b").is_err());
        assert!(parse_string("label", "a=b").is_err());
        assert!(parse_string("label", "   ").is_err());
        assert_eq!(parse_string("label", "  loop ").unwrap(), "loop");
    }

    #[test]
    fn test_encode_line() {
        let kwargs = Kwargs::new()
            .with("x", Primitive::Float(0.5))
            .with("skip", Primitive::Bool(false));
        assert_eq!(encode_line("*", &kwargs), "*, x=0.5, skip=False");
    }
}
