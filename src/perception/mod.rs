//! 感知层
//!
//! 截屏、图像匹配、OCR、图片编码都是外部协作方，这里只定义它们的接口：
//! - FrameSource：截取一帧
//! - Locator：从帧中定位角色位置与各类检测
//! - FrameEncoder：把帧（或其区域）编码为 JPEG / PNG
//! - TextReader：读取帧中某区域的文字
//! - EnvironmentIdentifier：识别当前所在地图
//!
//! 感知循环（capture）在独立线程中运行，整体替换发布快照。

pub mod capture;
pub mod catalog;
pub mod encode;
pub mod frame;
pub mod waypoints;

pub use capture::PerceptionLoop;
pub use catalog::{EnvironmentMatch, MapCatalog};
pub use encode::ImageEncoder;
pub use frame::{crop_region, Frame, Point, Rect, CROP_SIZE};
pub use waypoints::load_waypoints;

use crate::core::{AgentError, Detection};

/// 截屏
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Frame, AgentError>;
}

/// 单帧定位结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    /// 当前帧中的角色位置；未匹配到为 None
    pub position: Option<Point>,
    pub detections: Vec<Detection>,
}

/// 角色 / 地标 / 风险定位
pub trait Locator: Send {
    fn locate(&mut self, frame: &Frame) -> Observation;
}

/// 图片编码
pub trait FrameEncoder: Send + Sync {
    fn jpeg(&self, frame: &Frame, region: Rect) -> Result<Vec<u8>, AgentError>;

    fn png(&self, frame: &Frame, region: Rect) -> Result<Vec<u8>, AgentError>;
}

/// OCR
pub trait TextReader: Send + Sync {
    /// 读取区域内文字；不可用或失败时返回 None
    fn read_text(&self, frame: &Frame, region: Rect) -> Option<String>;
}

/// 当前地图识别；不可用时返回 None
pub trait EnvironmentIdentifier: Send + Sync {
    fn identify(&self, frame: &Frame) -> Option<EnvironmentMatch>;
}
