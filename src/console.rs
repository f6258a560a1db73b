//! 行式控制台：从标准输入读取控制指令
//!
//! ```text
//! toggle                 启停（告警期间作为确认）
//! status                 打印状态投影
//! load <path>            载入路线脚本
//! save <path>            保存当前路线
//! book <name>            载入指令书
//! map <path>             载入小地图路点，生成自动路线
//! detect                 识别当前地图
//! cursor <n>             移动执行游标
//! insert <n> <line>      在 n 处插入一行脚本（如 `insert 0 *, x=0.2, y=0.5`）
//! remove <n>             删除第 n 个元素
//! quit                   退出
//! ```

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{Command, Edit, RuntimeHandle};
use crate::routine::RawArgs;

/// 一行输入对应的动作
#[derive(Debug, Clone)]
pub enum ConsoleInput {
    Toggle,
    Status,
    Command(Command),
}

/// 解析一行控制台输入；空行返回 Ok(None)
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let input = match verb.to_lowercase().as_str() {
        "toggle" | "t" => ConsoleInput::Toggle,
        "status" | "s" => ConsoleInput::Status,
        "quit" | "exit" | "/quit" | "/exit" => ConsoleInput::Command(Command::Quit),
        "detect" => ConsoleInput::Command(Command::DetectMap),
        "load" => ConsoleInput::Command(Command::LoadRoutine(path_arg(rest)?)),
        "save" => ConsoleInput::Command(Command::SaveRoutine(path_arg(rest)?)),
        "map" => ConsoleInput::Command(Command::LoadMap(path_arg(rest)?)),
        "book" => {
            if rest.is_empty() {
                return Err("usage: book <name>".to_string());
            }
            ConsoleInput::Command(Command::LoadCommandBook(rest.to_string()))
        }
        "cursor" => ConsoleInput::Command(Command::Edit(Edit::MoveCursor {
            index: index_arg(rest)?,
        })),
        "remove" => ConsoleInput::Command(Command::Edit(Edit::Remove {
            index: index_arg(rest)?,
        })),
        "insert" => {
            let (index, script) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: insert <n> <symbol>, <args>".to_string())?;
            let index = index_arg(index)?;
            let mut parts = script.split(',');
            let symbol = parts.next().unwrap_or_default().trim().to_string();
            if symbol.is_empty() {
                return Err("usage: insert <n> <symbol>, <args>".to_string());
            }
            ConsoleInput::Command(Command::Edit(Edit::Insert {
                index,
                symbol,
                args: RawArgs::parse(parts),
            }))
        }
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(input))
}

fn path_arg(rest: &str) -> Result<PathBuf, String> {
    if rest.is_empty() {
        return Err("missing path".to_string());
    }
    Ok(PathBuf::from(rest))
}

fn index_arg(rest: &str) -> Result<usize, String> {
    rest.trim()
        .parse()
        .map_err(|_| format!("invalid index '{}'", rest.trim()))
}

/// 读取标准输入直到 EOF、quit 或关闭
pub async fn run(handle: &RuntimeHandle, token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Console read failed: {}", e);
                break;
            }
        };
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleInput::Toggle)) => {
                handle.toggle();
            }
            Ok(Some(ConsoleInput::Status)) => {
                let status = handle.status().borrow().clone();
                match serde_json::to_string(&status) {
                    Ok(text) => println!("{text}"),
                    Err(e) => warn!("Failed to render status: {}", e),
                }
            }
            Ok(Some(ConsoleInput::Command(command))) => {
                let quit = matches!(command, Command::Quit);
                if !handle.send(command) || quit {
                    break;
                }
            }
            Err(e) => warn!("{}", e),
        }
    }
    info!("Console closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_verbs() {
        assert!(matches!(parse_line("toggle"), Ok(Some(ConsoleInput::Toggle))));
        assert!(matches!(parse_line("  "), Ok(None)));
        assert!(matches!(
            parse_line("QUIT"),
            Ok(Some(ConsoleInput::Command(Command::Quit)))
        ));
        match parse_line("book kanna") {
            Ok(Some(ConsoleInput::Command(Command::LoadCommandBook(name)))) => {
                assert_eq!(name, "kanna")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_insert_uses_script_syntax() {
        match parse_line("insert 2 *, x=0.2, y=0.5, adjust=true") {
            Ok(Some(ConsoleInput::Command(Command::Edit(Edit::Insert { index, symbol, args })))) => {
                assert_eq!(index, 2);
                assert_eq!(symbol, "*");
                assert_eq!(args.keyword.len(), 3);
                assert_eq!(args.keyword[0], ("x".to_string(), "0.2".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("load").is_err());
        assert!(parse_line("cursor abc").is_err());
        assert!(parse_line("insert 1").is_err());
        assert!(parse_line("fly away").is_err());
    }
}
