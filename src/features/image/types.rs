use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

/// 允许的原图扩展名（小写，不含点）
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// 图片编码类型，由原图扩展名决定；缩放结果沿用原图格式。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
}

impl ImageKind {
    /// 按扩展名识别（大小写不敏感），不在白名单内返回 `None`。
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ALLOWED_EXTENSIONS
            .into_iter()
            .find(|allowed| allowed.eq_ignore_ascii_case(ext))?;
        match ext {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
        }
    }

    pub(crate) fn image_format(self) -> image::ImageFormat {
        match self {
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Gif => image::ImageFormat::Gif,
        }
    }
}

/// `GET /images` 查询参数。
///
/// 所有字段都按原始字符串接收，校验统一交给流水线完成，
/// 这样 `width=abc` 之类的输入会得到业务错误而不是框架层的 400。
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ResizeQuery {
    /// 原图文件名（仅文件名，不允许包含路径）
    #[param(example = "photo.png")]
    pub filename: Option<String>,
    /// 目标宽度（正整数）
    #[param(example = "200")]
    pub width: Option<String>,
    /// 目标高度（正整数）
    #[param(example = "150")]
    pub height: Option<String>,
}

impl ResizeQuery {
    pub fn new(
        filename: impl Into<String>,
        width: impl Into<String>,
        height: impl Into<String>,
    ) -> Self {
        Self {
            filename: Some(filename.into()),
            width: Some(width.into()),
            height: Some(height.into()),
        }
    }
}

/// `GET /images/raw` 查询参数
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RawQuery {
    /// 原图文件名
    #[param(example = "photo.png")]
    pub filename: Option<String>,
}
