//! 宽高参数解析与校验。
//!
//! 纯函数，不访问文件系统；流水线在探测原图之前先跑这里。

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// 尺寸参数策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionMode {
    /// 宽高都必须提供
    #[default]
    Both,
    /// 允许只提供一边，另一边按原图宽高比推算
    PreserveAspect,
}

/// 校验通过的尺寸请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedSize {
    Exact { width: u32, height: u32 },
    Width(u32),
    Height(u32),
}

impl RequestedSize {
    /// 已确定的目标尺寸；只给一边时返回 `None`。
    pub fn exact(self) -> Option<(u32, u32)> {
        match self {
            RequestedSize::Exact { width, height } => Some((width, height)),
            _ => None,
        }
    }

    /// 结合原图尺寸补全缺失的一边（四舍五入，最小为 1）。
    pub fn resolve(self, source: (u32, u32)) -> (u32, u32) {
        let (src_w, src_h) = (source.0.max(1) as f64, source.1.max(1) as f64);
        match self {
            RequestedSize::Exact { width, height } => (width, height),
            RequestedSize::Width(w) => (w, scale_side(w as f64 * src_h / src_w)),
            RequestedSize::Height(h) => (scale_side(h as f64 * src_w / src_h), h),
        }
    }
}

fn scale_side(v: f64) -> u32 {
    v.round().clamp(1.0, u32::MAX as f64) as u32
}

/// 宽高必填模式下的校验：`validate(width, height) -> (w, h)`。
pub fn validate(width: Option<&str>, height: Option<&str>) -> Result<(u32, u32), PipelineError> {
    let size = validate_with_mode(width, height, DimensionMode::Both)?;
    size.exact().ok_or(PipelineError::MissingParameter)
}

/// 按配置的策略校验宽高。
///
/// 先判断缺失（`MissingParameter`），再判断数值合法性（`InvalidDimension`）。
pub fn validate_with_mode(
    width: Option<&str>,
    height: Option<&str>,
    mode: DimensionMode,
) -> Result<RequestedSize, PipelineError> {
    let width = present(width);
    let height = present(height);

    match (width, height, mode) {
        (Some(w), Some(h), _) => Ok(RequestedSize::Exact {
            width: parse_dimension(w)?,
            height: parse_dimension(h)?,
        }),
        (Some(w), None, DimensionMode::PreserveAspect) => {
            Ok(RequestedSize::Width(parse_dimension(w)?))
        }
        (None, Some(h), DimensionMode::PreserveAspect) => {
            Ok(RequestedSize::Height(parse_dimension(h)?))
        }
        _ => Err(PipelineError::MissingParameter),
    }
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

/// 解析单个尺寸：必须是正整数且不超过 `u32`。
pub fn parse_dimension(raw: &str) -> Result<u32, PipelineError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| PipelineError::InvalidDimension)?;
    if value <= 0 {
        return Err(PipelineError::InvalidDimension);
    }
    u32::try_from(value).map_err(|_| PipelineError::InvalidDimension)
}
