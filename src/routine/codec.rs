//! 路线脚本文本格式
//!
//! 每行一个元素或行为：`<符号或行为名>, 参数, key=value, ...`。
//! 行为属于紧邻的上一个路点（习惯上缩进书写）；空行与 `#` 注释行忽略。
//! 任意一行出错则整个脚本加载失败，错误带 1 起始的行号。

use std::path::Path;

use tracing::info;

use crate::core::RoutineError;
use crate::routine::behaviors::Behavior;
use crate::routine::components::ProgramElement;
use crate::routine::program::RoutineProgram;
use crate::routine::value::RawArgs;

/// 单行解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptLine {
    Element(ProgramElement),
    Behavior(Behavior),
}

/// 解码一行；空行和注释返回 None
pub fn decode_line(line: &str) -> Result<Option<ScriptLine>, RoutineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut parts = trimmed.split(',');
    let head = parts.next().unwrap_or_default().trim();
    let args = RawArgs::parse(parts);

    if ProgramElement::is_symbol(head) {
        ProgramElement::build(head, &args).map(|e| Some(ScriptLine::Element(e)))
    } else if Behavior::is_known(head) {
        Behavior::build(head, &args).map(|b| Some(ScriptLine::Behavior(b)))
    } else {
        Err(RoutineError::UnknownSymbol(head.to_string()))
    }
}

/// 解码整份脚本为新程序（含标签表与绑定）
pub fn decode(text: &str) -> Result<RoutineProgram, RoutineError> {
    let mut program = RoutineProgram::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let decoded = decode_line(line).map_err(|e| e.at_line(line_no))?;
        match decoded {
            None => {}
            Some(ScriptLine::Element(element)) => {
                program.push(element).map_err(|e| e.at_line(line_no))?;
            }
            Some(ScriptLine::Behavior(behavior)) => {
                let last = program.len().checked_sub(1);
                let attached = match last {
                    Some(index) => program.add_behavior(index, behavior.clone()).is_ok(),
                    None => false,
                };
                if !attached {
                    return Err(RoutineError::OrphanBehavior(behavior.name().to_string())
                        .at_line(line_no));
                }
            }
        }
    }
    Ok(program)
}

pub fn encode(program: &RoutineProgram) -> String {
    let mut text = program
        .elements()
        .map(ProgramElement::encode)
        .collect::<Vec<_>>()
        .join("\n");
    text.push('\n');
    text
}

pub fn load(path: impl AsRef<Path>) -> Result<RoutineProgram, RoutineError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| RoutineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let program = decode(&text)?;
    info!(path = %path.display(), elements = program.len(), "Routine loaded");
    Ok(program)
}

pub fn save(program: &RoutineProgram, path: impl AsRef<Path>) -> Result<(), RoutineError> {
    let path = path.as_ref();
    std::fs::write(path, encode(program)).map_err(|source| RoutineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Routine saved");
    Ok(())
}
