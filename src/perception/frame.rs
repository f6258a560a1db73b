//! 画面帧与平面坐标
//!
//! 坐标统一为小地图相对坐标（0-1），帧像素为 BGRA 排列，经 Arc 共享避免复制。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 平面坐标（小地图相对坐标）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 欧氏距离
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// 一帧截屏：宽高 + BGRA 像素
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// 全黑帧，测试与占位用
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(width, height, vec![0u8; (width * height * 4) as usize])
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// 像素矩形（左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// 求解器与失败帧使用的边长
pub const CROP_SIZE: u32 = 640;

/// 水平居中、自 vertical_offset 起的 size×size 裁剪区域；越界时贴边，帧不足时取整帧
pub fn crop_region(width: u32, height: u32, size: u32, vertical_offset: u32) -> Rect {
    let mut left = width.saturating_sub(size) / 2;
    let mut right = left + size;
    let mut top = vertical_offset;
    let mut bottom = top + size;

    if bottom > height {
        bottom = height;
        top = height.saturating_sub(size);
    }
    if right > width {
        right = width;
        left = width.saturating_sub(size);
    }

    Rect {
        left,
        top,
        width: right - left,
        height: bottom - top,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_crop_region_centered_with_offset() {
        let rect = crop_region(1366, 768, CROP_SIZE, 50);
        assert_eq!(
            rect,
            Rect {
                left: 363,
                top: 50,
                width: 640,
                height: 640
            }
        );
    }

    #[test]
    fn test_crop_region_clamps_to_bottom() {
        let rect = crop_region(1366, 680, CROP_SIZE, 50);
        assert_eq!(rect.top, 40);
        assert_eq!(rect.height, 640);
    }

    #[test]
    fn test_crop_region_small_frame_takes_whole_frame() {
        let rect = crop_region(500, 400, CROP_SIZE, 50);
        assert_eq!(rect.left, 0);
        assert_eq!(rect.top, 0);
        assert_eq!(rect.width, 500);
        assert_eq!(rect.height, 400);
    }
}
