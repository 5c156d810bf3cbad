//! 缩放引擎：解码原图、按适配策略缩放到目标尺寸、按原图格式重新编码。
//!
//! 引擎是同步的 CPU 密集型实现，由流水线放进阻塞线程池执行。

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::ResizeError;

use super::types::ImageKind;

/// 适配策略：原图如何映射到 width×height 的目标框。
///
/// 三种策略的输出像素尺寸都严格等于目标框。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FitPolicy {
    /// 等比放大到完全覆盖目标框，再居中裁剪
    #[default]
    Cover,
    /// 等比缩放到完全落入目标框，居中留边（PNG/GIF 透明，JPEG 黑色）
    Contain,
    /// 拉伸到目标框，不保持宽高比
    Fill,
}

/// 单次缩放参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeSpec {
    pub width: u32,
    pub height: u32,
    pub fit: FitPolicy,
    /// 输出编码（沿用原图格式）
    pub format: ImageKind,
}

/// 缩放引擎抽象，便于测试时替换为计数桩。
pub trait ResizeEngine: Send + Sync {
    fn resize(&self, source: &Path, spec: &ResizeSpec) -> Result<Vec<u8>, ResizeError>;

    /// 读取原图像素尺寸（只给一边尺寸时用于推算另一边）
    fn dimensions(&self, source: &Path) -> Result<(u32, u32), ResizeError> {
        Ok(image::image_dimensions(source)?)
    }
}

/// 基于 `image` crate 的默认实现
#[derive(Debug, Clone)]
pub struct RasterEngine {
    jpeg_quality: u8,
    filter: FilterType,
}

impl Default for RasterEngine {
    fn default() -> Self {
        Self::new(85)
    }
}

impl RasterEngine {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
            filter: FilterType::Lanczos3,
        }
    }
}

impl ResizeEngine for RasterEngine {
    fn resize(&self, source: &Path, spec: &ResizeSpec) -> Result<Vec<u8>, ResizeError> {
        let img = image::open(source)?;
        let fitted = fit_to_box(&img, spec.width, spec.height, spec.fit, self.filter);
        encode(&fitted, spec.format, self.jpeg_quality)
    }
}

/// 按策略把图片映射到 width×height。
pub fn fit_to_box(
    img: &DynamicImage,
    width: u32,
    height: u32,
    fit: FitPolicy,
    filter: FilterType,
) -> DynamicImage {
    match fit {
        FitPolicy::Cover => img.resize_to_fill(width, height, filter),
        FitPolicy::Fill => img.resize_exact(width, height, filter),
        FitPolicy::Contain => {
            let scaled = img.resize(width, height, filter).to_rgba8();
            let mut canvas = RgbaImage::new(width, height);
            let x = (width.saturating_sub(scaled.width()) / 2) as i64;
            let y = (height.saturating_sub(scaled.height()) / 2) as i64;
            imageops::overlay(&mut canvas, &scaled, x, y);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}

fn encode(img: &DynamicImage, format: ImageKind, jpeg_quality: u8) -> Result<Vec<u8>, ResizeError> {
    let mut out = Vec::new();
    match format {
        ImageKind::Jpeg => {
            // JPEG 不支持 alpha，透明区域落为黑色
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, jpeg_quality)
                .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
                .map_err(|e| ResizeError::Encode(e.to_string()))?;
        }
        ImageKind::Png => {
            img.write_to(&mut Cursor::new(&mut out), format.image_format())
                .map_err(|e| ResizeError::Encode(e.to_string()))?;
        }
        ImageKind::Gif => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut out), format.image_format())
                .map_err(|e| ResizeError::Encode(e.to_string()))?;
        }
    }
    Ok(out)
}
