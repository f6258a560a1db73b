//! 会话记忆：上次使用的指令书、路线与小地图
//!
//! 保存在 `.settings/session.json`。部分更新只覆盖传入的键，其余键（包括未知键）原样保留；
//! 文件缺失或无法解析时按空会话处理。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const SESSION_FILE: &str = ".settings/session.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_book: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimap: Option<String>,
    /// 最近一次写入时间（RFC 3339），由 update 维护
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Session {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    /// 只写入 update 中为 Some 的字段
    pub fn update(&self, update: &Session) -> anyhow::Result<()> {
        let mut data: serde_json::Map<String, serde_json::Value> = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        for (key, value) in [
            ("command_book", &update.command_book),
            ("routine", &update.routine),
            ("minimap", &update.minimap),
        ] {
            if let Some(value) = value {
                data.insert(key.to_string(), serde_json::Value::String(value.clone()));
            }
        }
        data.insert(
            "updated_at".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&data)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_or_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join(".settings/session.json"));
        assert_eq!(store.load(), Session::default());

        std::fs::create_dir_all(dir.path().join(".settings")).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn test_partial_update_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join(".settings/session.json"));
        store
            .update(&Session {
                command_book: Some("kanna".into()),
                routine: Some("routines/cavern.txt".into()),
                ..Session::default()
            })
            .unwrap();
        store
            .update(&Session {
                routine: Some("routines/lab.txt".into()),
                ..Session::default()
            })
            .unwrap();

        let session = store.load();
        assert_eq!(session.command_book.as_deref(), Some("kanna"));
        assert_eq!(session.routine.as_deref(), Some("routines/lab.txt"));
        assert!(session.minimap.is_none());
        assert!(session.updated_at.is_some());
    }

    #[test]
    fn test_unknown_keys_survive_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        std::fs::write(store.path(), r#"{"theme": "dark"}"#).unwrap();
        store
            .update(&Session {
                minimap: Some("Map_Cavern.png".into()),
                ..Session::default()
            })
            .unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["minimap"], "Map_Cavern.png");
    }
}
