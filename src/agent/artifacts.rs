//! 失败帧留存
//!
//! 谜题求解失败时把裁剪后的帧写成 `image_<N>.png`。首次使用时扫描目录中已有的文件名
//! （不区分大小写）续接编号，重启后不会覆盖旧文件。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::core::AgentError;

pub struct FailedFrameStore {
    dir: PathBuf,
    next: Option<u64>,
}

impl FailedFrameStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            next: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 写入一张失败帧，返回文件路径
    pub fn save(&mut self, png: &[u8]) -> Result<PathBuf, AgentError> {
        std::fs::create_dir_all(&self.dir)?;
        let number = match self.next {
            Some(n) => n,
            None => highest_number(&self.dir)? + 1,
        };
        let path = self.dir.join(format!("image_{number}.png"));
        std::fs::write(&path, png)?;
        self.next = Some(number + 1);
        info!(path = %path.display(), "Saved failed puzzle frame");
        Ok(path)
    }
}

/// 目录中已有的最大编号；没有时为 0
fn highest_number(dir: &Path) -> std::io::Result<u64> {
    static IMAGE_NAME: OnceLock<Regex> = OnceLock::new();
    let pattern = IMAGE_NAME.get_or_init(|| Regex::new(r"(?i)^image_(\d+)\.png$").expect("valid regex"));

    let mut highest = 0;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(n) = pattern
            .captures(name)
            .and_then(|c| c[1].parse::<u64>().ok())
        {
            highest = highest.max(n);
        }
    }
    Ok(highest)
}
