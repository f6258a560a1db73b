//! 地图预置路点：与地图素材同名的 `<base>_waypoints.json`
//!
//! ```json
//! [{"x": 0.12, "y": 0.56, "is_bottom_platform": true}, {"x": 0.8, "y": 0.56}]
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::perception::Point;

#[derive(Debug, Deserialize)]
struct WaypointEntry {
    x: f64,
    y: f64,
    #[serde(default)]
    #[allow(dead_code)]
    is_bottom_platform: bool,
}

/// 素材旁的路点文件路径
pub fn waypoints_path(map_path: &Path) -> PathBuf {
    let stem = map_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    map_path.with_file_name(format!("{stem}_waypoints.json"))
}

/// 读取预置路点；文件不存在返回 Ok(None)
pub fn load_waypoints(map_path: impl AsRef<Path>) -> anyhow::Result<Option<Vec<Point>>> {
    let path = waypoints_path(map_path.as_ref());
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let entries: Vec<WaypointEntry> = serde_json::from_str(&text)
        .with_context(|| format!("invalid waypoint file {}", path.display()))?;
    Ok(Some(
        entries.into_iter().map(|e| Point::new(e.x, e.y)).collect(),
    ))
}
