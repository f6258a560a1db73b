//! 地图识别：OCR 读出左上角地图名，与素材目录中的地图文件名比对
//!
//! 素材文件名 `Map_Laboratory_Behind_Locked_Door_4.png` 对应地图名
//! "Laboratory Behind Locked Door 4"。比对前统一小写、去掉非字母数字、合并空白：
//! - 地图名出现在 OCR 文本中：1.0
//! - OCR 文本出现在地图名中：0.95
//! - 否则按词重叠率，低于一半时再减半
//!
//! 得分不足 0.5 视为无匹配；OCR 不可用或帧太小（短边不超过 400 像素）时直接返回 None。

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::perception::{EnvironmentIdentifier, Frame, Rect, TextReader};

const MIN_SCORE: f64 = 0.5;
const MIN_FRAME_SIDE: u32 = 400;
const ROI_WIDTH_FRAC: f64 = 0.40;
const ROI_HEIGHT_FRAC: f64 = 0.20;

/// 识别结果
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentMatch {
    pub name: String,
    pub path: PathBuf,
    pub score: f64,
}

pub struct MapCatalog {
    dir: PathBuf,
    reader: Option<Arc<dyn TextReader>>,
}

impl MapCatalog {
    pub fn new(dir: impl AsRef<Path>, reader: Option<Arc<dyn TextReader>>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            reader,
        }
    }

    /// 按 OCR 文本挑选最匹配的地图
    pub fn best_match(&self, text: &str) -> Option<EnvironmentMatch> {
        let text = normalize(text);
        if text.is_empty() {
            return None;
        }
        let mut names: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("png"))
            })
            .collect();
        names.sort();

        let mut best: Option<EnvironmentMatch> = None;
        for path in names {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = asset_name(file_name);
            let normalized = normalize(&name);
            if normalized.is_empty() {
                continue;
            }
            let score = score(&text, &normalized);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(EnvironmentMatch { name, path, score });
            }
        }
        best.filter(|b| b.score >= MIN_SCORE)
    }
}

impl EnvironmentIdentifier for MapCatalog {
    fn identify(&self, frame: &Frame) -> Option<EnvironmentMatch> {
        let reader = self.reader.as_ref()?;
        if frame.width.min(frame.height) <= MIN_FRAME_SIDE || !self.dir.is_dir() {
            return None;
        }
        let region = Rect {
            left: 0,
            top: 0,
            width: (frame.width as f64 * ROI_WIDTH_FRAC) as u32,
            height: (frame.height as f64 * ROI_HEIGHT_FRAC) as u32,
        };
        let text = reader.read_text(frame, region)?;
        let found = self.best_match(&text);
        debug!(text = %text.trim(), matched = ?found.as_ref().map(|m| &m.name), "Environment lookup");
        found
    }
}

/// `Map_Foo_Bar_4.png` → `Foo Bar 4`
pub fn asset_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    let stem = if stem.len() >= 4 && stem[..4].eq_ignore_ascii_case("map_") {
        &stem[4..]
    } else {
        stem
    };
    stem.replace('_', " ").trim().to_string()
}

/// 小写、去掉非字母数字、合并空白
pub fn normalize(text: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let non_alnum = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9\s]").expect("valid regex"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));

    let lower = text.trim().to_lowercase();
    let stripped = non_alnum.replace_all(&lower, "");
    spaces.replace_all(&stripped, " ").trim().to_string()
}

/// 已归一化的 OCR 文本与地图名的匹配得分
pub fn score(text: &str, map_name: &str) -> f64 {
    if text.contains(map_name) {
        return 1.0;
    }
    if map_name.contains(text) {
        return 0.95;
    }
    let text_words: std::collections::HashSet<&str> = text.split(' ').collect();
    let map_words: std::collections::HashSet<&str> = map_name.split(' ').collect();
    if map_words.is_empty() {
        return 0.0;
    }
    let overlap = text_words.intersection(&map_words).count() as f64 / map_words.len() as f64;
    if overlap >= 0.5 {
        overlap
    } else {
        overlap * 0.5
    }
}
