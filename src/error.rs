use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 缩放流水线错误（核心层）
///
/// `Display` 文本即客户端可见的 `error` 字段（`ResizeFailure` 除外，其细节只写日志）。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// 宽/高缺失
    #[error("Missing required parameters")]
    MissingParameter,

    /// 宽/高不是正整数
    #[error("Width and height must be positive numbers")]
    InvalidDimension,

    /// 文件名缺失、扩展名不在白名单内或路径不安全
    #[error("{0}")]
    InvalidFormat(&'static str),

    /// 原图不存在
    #[error("Image not found")]
    NotFound,

    /// 解码/编码/超时/写盘失败
    #[error("Error processing image: {0}")]
    ResizeFailure(#[from] ResizeError),
}

/// 缩放引擎错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResizeError {
    #[error("解码失败: {0}")]
    Decode(String),

    #[error("编码失败: {0}")]
    Encode(String),

    #[error("缩放超时（{0:?}）")]
    Timeout(Duration),

    #[error("I/O 错误: {0}")]
    Io(String),

    /// 后台任务 panic 或被取消
    #[error("缩放任务中断: {0}")]
    Aborted(String),
}

impl From<std::io::Error> for ResizeError {
    fn from(err: std::io::Error) -> Self {
        ResizeError::Io(err.to_string())
    }
}

impl From<image::ImageError> for ResizeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => ResizeError::Io(e.to_string()),
            image::ImageError::Encoding(e) => ResizeError::Encode(e.to_string()),
            other => ResizeError::Decode(other.to_string()),
        }
    }
}

/// 应用统一错误类型（HTTP 层）
#[derive(Error, Debug)]
pub enum AppError {
    /// 缩放流水线错误
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// API Key 缺失或错误
    #[error("Unauthorized")]
    Unauthorized,

    /// 触发限流
    #[error("Too many requests")]
    RateLimited,

    /// 参数校验错误（HTTP 层的请求约束）
    #[error("{0}")]
    Validation(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误响应体：`error` 为人类可读信息，`code` 为稳定错误码。
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// 错误信息
    #[schema(example = "Width and height must be positive numbers")]
    pub error: String,

    /// 稳定的错误码，用于程序化处理。
    #[schema(example = "INVALID_DIMENSION")]
    pub code: String,

    /// HTTP 状态码（与响应 status 一致）。
    #[schema(example = 400)]
    pub status: u16,

    /// 请求追踪 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Pipeline(e) => match e {
                PipelineError::MissingParameter
                | PipelineError::InvalidDimension
                | PipelineError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
                PipelineError::NotFound => StatusCode::NOT_FOUND,
                PipelineError::ResizeFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn stable_code(&self) -> &'static str {
        match self {
            AppError::Pipeline(e) => match e {
                PipelineError::MissingParameter => "MISSING_PARAMETER",
                PipelineError::InvalidDimension => "INVALID_DIMENSION",
                PipelineError::InvalidFormat(_) => "INVALID_FORMAT",
                PipelineError::NotFound => "NOT_FOUND",
                PipelineError::ResizeFailure(ResizeError::Timeout(_)) => "RESIZE_TIMEOUT",
                PipelineError::ResizeFailure(_) => "RESIZE_FAILED",
            },
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 客户端可见的错误信息：内部细节不外泄。
    fn client_message(&self) -> String {
        match self {
            AppError::Pipeline(PipelineError::ResizeFailure(_)) => {
                "Error processing image".to_string()
            }
            AppError::Internal(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.stable_code(), "{}", self);
        }

        let body = ErrorResponse {
            error: self.client_message(),
            code: self.stable_code().to_string(),
            status: status.as_u16(),
            request_id: crate::request_id::current_request_id(),
        };

        (status, Json(body)).into_response()
    }
}
