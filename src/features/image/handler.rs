use std::path::Path;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
    routing::get,
};
use serde::Serialize;
use tower_http::services::ServeFile;

use crate::{error::AppError, error::PipelineError, state::AppState};

use super::dimensions;
use super::types::{RawQuery, ResizeQuery};

/// 缩放结果按缓存键寻址，内容不会变化
const DERIVATIVE_CACHE_CONTROL: &str = "public, max-age=604800, immutable";

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AuthCheckResponse {
    #[schema(example = "Authenticated!")]
    pub message: String,
}

/// HTTP 层额外的尺寸上限；格式本身的校验仍由流水线负责。
fn check_max_dimension(query: &ResizeQuery, max_dimension: u32) -> Result<(), AppError> {
    if max_dimension == 0 {
        return Ok(());
    }
    for raw in [query.width.as_deref(), query.height.as_deref()]
        .into_iter()
        .flatten()
    {
        if let Ok(v) = dimensions::parse_dimension(raw)
            && v > max_dimension
        {
            return Err(AppError::Validation(format!(
                "Width and height must not exceed {max_dimension}"
            )));
        }
    }
    Ok(())
}

/// 以流的方式返回磁盘上的图片；文件不存在时返回 `None`。
///
/// 条件请求与 Range 由 `ServeFile` 处理，Content-Type 以白名单识别的格式为准。
async fn stream_image(
    path: &Path,
    content_type: &'static str,
    cache: bool,
    request: Request,
) -> Result<Option<Response>, AppError> {
    let res = match ServeFile::new(path).try_call(request).await {
        Ok(res) => res,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            tracing::error!("读取图片失败 {:?}: {}", path, e);
            return Err(AppError::Internal(format!("读取图片失败: {e}")));
        }
    };
    if res.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    let mut res = res.map(Body::new);
    if res.status().is_success() {
        let headers = res.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        if cache {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(DERIVATIVE_CACHE_CONTROL),
            );
        }
    }
    Ok(Some(res))
}

#[utoipa::path(
    get,
    path = "/images",
    summary = "获取缩放后的图片",
    description = "按 filename/width/height 返回缩放结果。首次请求时生成并写入缓存目录，之后直接读取缓存文件。",
    params(ResizeQuery),
    responses(
        (status = 200, description = "PNG/JPEG/GIF bytes（格式与原图一致）"),
        (status = 400, description = "参数缺失或非法", body = crate::error::ErrorResponse),
        (status = 401, description = "X-API-Key 缺失或错误", body = crate::error::ErrorResponse),
        (status = 404, description = "原图不存在", body = crate::error::ErrorResponse),
        (status = 429, description = "请求频率超限", body = crate::error::ErrorResponse),
        (status = 500, description = "缩放失败", body = crate::error::ErrorResponse)
    ),
    security(("ApiKey" = [])),
    tag = "Image"
)]
pub async fn get_image(
    State(state): State<AppState>,
    Query(query): Query<ResizeQuery>,
    request: Request,
) -> Result<Response, AppError> {
    check_max_dimension(&query, state.max_dimension)?;

    let derivative = state.pipeline.process(&query).await?;
    stream_image(&derivative.path, derivative.content_type(), true, request)
        .await?
        .ok_or_else(|| {
            tracing::error!("缩放结果已不在磁盘上: {:?}", derivative.path);
            AppError::Internal("缩放结果文件缺失".to_string())
        })
}

#[utoipa::path(
    get,
    path = "/images/raw",
    summary = "获取原图",
    description = "不做缩放，直接返回原图字节。",
    params(RawQuery),
    responses(
        (status = 200, description = "原图字节"),
        (status = 400, description = "文件名非法", body = crate::error::ErrorResponse),
        (status = 401, description = "X-API-Key 缺失或错误", body = crate::error::ErrorResponse),
        (status = 404, description = "原图不存在", body = crate::error::ErrorResponse)
    ),
    security(("ApiKey" = [])),
    tag = "Image"
)]
pub async fn get_raw(
    State(state): State<AppState>,
    Query(query): Query<RawQuery>,
    request: Request,
) -> Result<Response, AppError> {
    let source = state
        .pipeline
        .resolve_source(query.filename.as_deref())
        .await?;
    stream_image(source.as_path(), source.kind().content_type(), false, request)
        .await?
        .ok_or_else(|| PipelineError::NotFound.into())
}

#[utoipa::path(
    get,
    path = "/images/test-auth",
    summary = "校验 API Key",
    responses(
        (status = 200, description = "API Key 有效", body = AuthCheckResponse),
        (status = 401, description = "X-API-Key 缺失或错误", body = crate::error::ErrorResponse)
    ),
    security(("ApiKey" = [])),
    tag = "Image"
)]
pub async fn test_auth() -> Json<AuthCheckResponse> {
    Json(AuthCheckResponse {
        message: "Authenticated!".to_string(),
    })
}

/// `/images` 路由（鉴权与限流由上层挂载）
pub fn create_image_router() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/images", get(get_image))
        .route("/images/raw", get(get_raw))
        .route("/images/test-auth", get(test_auth))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_dimension_only_rejects_valid_oversized_values() {
        let q = ResizeQuery::new("a.png", "20001", "10");
        assert!(matches!(
            check_max_dimension(&q, 10_000),
            Err(AppError::Validation(_))
        ));

        // 非法值交给流水线报 InvalidDimension
        let q = ResizeQuery::new("a.png", "-5", "abc");
        assert!(check_max_dimension(&q, 10_000).is_ok());

        let q = ResizeQuery::new("a.png", "20001", "10");
        assert!(check_max_dimension(&q, 0).is_ok());
    }

    fn get_request() -> Request {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn stream_image_sets_type_and_cache_headers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("photo_10x10.png");
        std::fs::write(&path, b"not really png").expect("write");

        let res = stream_image(&path, "image/png", true, get_request())
            .await
            .expect("serve")
            .expect("present");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(res.headers()[header::CACHE_CONTROL], DERIVATIVE_CACHE_CONTROL);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(body.as_ref(), b"not really png");

        let res = stream_image(&path, "image/png", false, get_request())
            .await
            .expect("serve")
            .expect("present");
        assert!(res.headers().get(header::CACHE_CONTROL).is_none());
    }

    #[tokio::test]
    async fn stream_image_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let res = stream_image(&dir.path().join("gone.png"), "image/png", true, get_request())
            .await
            .expect("serve");
        assert!(res.is_none());
    }
}
