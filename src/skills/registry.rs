//! 指令书：技能注册表 + 按键绑定 + 职业增益
//!
//! 指令书是 TOML 文件（config/command_books/<name>.toml）：
//! ```toml
//! name = "kanna"
//!
//! [keys]
//! jump = "alt"
//!
//! [[skill]]
//! id = "attack"      # 冷却为 0：默认动作（普攻）
//! key = "ctrl"
//!
//! [[skill]]
//! id = "blast"
//! key = "q"
//! cooldown = 12.0
//! presses = 2
//!
//! [[buff]]
//! key = "f1"
//! interval = 180
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;

/// 默认动作按键（指令书未声明冷却为 0 的技能时使用）
pub const DEFAULT_ACTION_KEY: &str = "ctrl";

/// 单个技能定义
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SkillSpec {
    pub id: String,
    /// 实际按键；省略时按键与 id 相同
    #[serde(default)]
    pub key: Option<String>,
    /// 冷却秒数，0 表示随时可用
    #[serde(default)]
    pub cooldown: f64,
    #[serde(default = "default_presses")]
    pub presses: u32,
}

fn default_presses() -> u32 {
    1
}

impl SkillSpec {
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.id)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.cooldown > 0.0
    }
}

/// 类型化技能注册表，保持声明顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkillRegistry {
    skills: Vec<SkillSpec>,
}

impl SkillRegistry {
    pub fn new(skills: Vec<SkillSpec>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        for skill in &skills {
            if !seen.insert(skill.id.as_str()) {
                bail!("duplicate skill id '{}'", skill.id);
            }
            if !skill.cooldown.is_finite() || skill.cooldown < 0.0 {
                bail!("skill '{}' has invalid cooldown {}", skill.id, skill.cooldown);
            }
        }
        Ok(Self { skills })
    }

    pub fn get(&self, id: &str) -> Option<&SkillSpec> {
        self.skills.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkillSpec> {
        self.skills.iter()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// 技能 id → 冷却秒数
    pub fn cooldowns(&self) -> impl Iterator<Item = (&str, f64)> {
        self.skills.iter().map(|s| (s.id.as_str(), s.cooldown))
    }

    /// 有冷却限制的技能 id（声明顺序）
    pub fn rate_limited(&self) -> Vec<&str> {
        self.skills
            .iter()
            .filter(|s| s.is_rate_limited())
            .map(|s| s.id.as_str())
            .collect()
    }

    /// 默认动作按键：第一个冷却为 0 的技能
    pub fn default_action_key(&self) -> &str {
        self.skills
            .iter()
            .find(|s| !s.is_rate_limited())
            .map(SkillSpec::key)
            .unwrap_or(DEFAULT_ACTION_KEY)
    }

    /// 技能 id 对应的实际按键；未注册的 id 按字面按键处理
    pub fn key_for<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(SkillSpec::key).unwrap_or(id)
    }

    pub fn presses_for(&self, id: &str) -> u32 {
        self.get(id).map(|s| s.presses).unwrap_or(1)
    }
}

/// 通用按键绑定
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub jump: String,
    pub interact: String,
    pub feed_pet: String,
    pub cash_shop: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            jump: "space".to_string(),
            interact: "y".to_string(),
            feed_pet: "9".to_string(),
            cash_shop: "f5".to_string(),
        }
    }
}

/// 定时增益
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuffSpec {
    pub key: String,
    /// 间隔秒数，0 表示从不使用
    pub interval: f64,
}

#[derive(Debug, Deserialize)]
struct CommandBookToml {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    keys: KeyBindings,
    #[serde(default)]
    skill: Vec<SkillSpec>,
    #[serde(default)]
    buff: Vec<BuffSpec>,
}

/// 指令书
#[derive(Debug, Clone)]
pub struct CommandBook {
    pub name: String,
    pub keys: KeyBindings,
    /// 技能表共享给冷却调度器；指针变化即视为换了一张表
    pub skills: Arc<SkillRegistry>,
    pub buffs: Vec<BuffSpec>,
}

impl CommandBook {
    pub fn from_toml(default_name: &str, text: &str) -> anyhow::Result<Self> {
        let raw: CommandBookToml = toml::from_str(text).context("invalid command book TOML")?;
        for buff in &raw.buff {
            if !buff.interval.is_finite() || buff.interval < 0.0 {
                bail!("buff '{}' has invalid interval {}", buff.key, buff.interval);
            }
        }
        Ok(Self {
            name: raw.name.unwrap_or_else(|| default_name.to_string()),
            keys: raw.keys,
            skills: Arc::new(SkillRegistry::new(raw.skill)?),
            buffs: raw.buff,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read command book {}", path.display()))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("command_book");
        let book = Self::from_toml(stem, &text)
            .with_context(|| format!("failed to load command book {}", path.display()))?;
        tracing::info!(
            "Loaded command book '{}' ({} skills, {} buffs)",
            book.name,
            book.skills.len(),
            book.buffs.len()
        );
        Ok(book)
    }
}

/// 指令书目录
pub struct CommandBookLoader {
    dir: PathBuf,
}

impl CommandBookLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 从默认位置创建
    pub fn from_default() -> Self {
        let dirs = [
            PathBuf::from("config/command_books"),
            PathBuf::from("../config/command_books"),
        ];
        let dir = dirs
            .into_iter()
            .find(|d| d.exists())
            .unwrap_or_else(|| PathBuf::from("config/command_books"));
        Self::new(dir)
    }

    /// 按名称或路径加载
    pub fn load(&self, name_or_path: &str) -> anyhow::Result<CommandBook> {
        let direct = PathBuf::from(name_or_path);
        if direct.is_file() {
            return CommandBook::load(direct);
        }
        CommandBook::load(self.dir.join(format!("{name_or_path}.toml")))
    }

    /// 目录下所有指令书名称（排序）
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK: &str = r#"
name = "kanna"

[keys]
jump = "alt"

[[skill]]
id = "attack"
key = "a"

[[skill]]
id = "blast"
key = "q"
cooldown = 12.0
presses = 2

[[skill]]
id = "w"
cooldown = 30

[[buff]]
key = "f1"
interval = 180
"#;

    #[test]
    fn test_parse_command_book() {
        let book = CommandBook::from_toml("fallback", BOOK).unwrap();
        assert_eq!(book.name, "kanna");
        assert_eq!(book.keys.jump, "alt");
        assert_eq!(book.keys.interact, "y");
        assert_eq!(book.skills.default_action_key(), "a");
        assert_eq!(book.skills.rate_limited(), vec!["blast", "w"]);
        assert_eq!(book.skills.key_for("blast"), "q");
        assert_eq!(book.skills.key_for("w"), "w");
        assert_eq!(book.skills.key_for("unknown"), "unknown");
        assert_eq!(book.skills.presses_for("blast"), 2);
        assert_eq!(book.buffs.len(), 1);
    }

    #[test]
    fn test_default_action_fallback() {
        let registry = SkillRegistry::new(vec![SkillSpec {
            id: "blast".into(),
            key: None,
            cooldown: 5.0,
            presses: 1,
        }])
        .unwrap();
        assert_eq!(registry.default_action_key(), DEFAULT_ACTION_KEY);
    }

    #[test]
    fn test_duplicate_skill_rejected() {
        let text = "[[skill]]\nid = \"a\"\n[[skill]]\nid = \"a\"\n";
        assert!(CommandBook::from_toml("x", text).is_err());
    }

    #[test]
    fn test_negative_cooldown_rejected() {
        let text = "[[skill]]\nid = \"a\"\ncooldown = -1.0\n";
        assert!(CommandBook::from_toml("x", text).is_err());
    }

    #[test]
    fn test_loader_lists_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kanna.toml"), BOOK).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let loader = CommandBookLoader::new(dir.path());
        assert_eq!(loader.list(), vec!["kanna".to_string()]);
        let book = loader.load("kanna").unwrap();
        assert_eq!(book.skills.len(), 3);
        assert!(loader.load("missing").is_err());
    }
}
