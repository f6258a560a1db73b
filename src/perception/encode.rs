//! BGRA 帧区域编码为 PNG / JPEG
//!
//! 求解服务收 JPEG，失败帧留存写 PNG。区域超出帧时按帧边界截断。

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::core::AgentError;
use crate::perception::{Frame, FrameEncoder, Rect};

const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone)]
pub struct ImageEncoder {
    jpeg_quality: u8,
}

impl ImageEncoder {
    pub fn new() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder for ImageEncoder {
    fn jpeg(&self, frame: &Frame, region: Rect) -> Result<Vec<u8>, AgentError> {
        let rgb = to_rgb(frame, region)?;
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.jpeg_quality)
            .encode_image(&rgb)
            .map_err(|e| AgentError::Encode(e.to_string()))?;
        Ok(out)
    }

    fn png(&self, frame: &Frame, region: Rect) -> Result<Vec<u8>, AgentError> {
        let rgb = to_rgb(frame, region)?;
        let mut out = Cursor::new(Vec::new());
        rgb.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| AgentError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}

/// 截取区域并把 BGRA 转成 RGB
fn to_rgb(frame: &Frame, region: Rect) -> Result<RgbImage, AgentError> {
    let expected = frame.width as usize * frame.height as usize * 4;
    if frame.pixels.len() < expected {
        return Err(AgentError::Encode(format!(
            "frame {}x{} has {} bytes, expected {}",
            frame.width,
            frame.height,
            frame.pixels.len(),
            expected
        )));
    }
    let left = region.left.min(frame.width);
    let top = region.top.min(frame.height);
    let width = region.width.min(frame.width - left);
    let height = region.height.min(frame.height - top);
    if width == 0 || height == 0 {
        return Err(AgentError::Encode(format!("empty region {region:?}")));
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in top..top + height {
        let row = (y as usize * frame.width as usize + left as usize) * 4;
        for px in frame.pixels[row..row + width as usize * 4].chunks_exact(4) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| AgentError::Encode("pixel buffer size mismatch".to_string()))
}
