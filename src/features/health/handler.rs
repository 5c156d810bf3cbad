use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;

use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    #[schema(example = "healthy")]
    pub status: String,
    /// 服务名称
    #[schema(example = "image-gateway")]
    pub service: String,
    /// 当前版本（Cargo package version）
    #[schema(example = "0.1.0")]
    pub version: String,
    /// 原图目录是否可访问
    #[serde(rename = "sourceDirReady")]
    pub source_dir_ready: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "用于探活的健康检查端点，返回服务状态与版本信息；原图目录不可访问时返回 503。",
    responses(
        (status = 200, description = "服务健康", body = HealthResponse),
        (status = 503, description = "原图目录不可访问", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let source_root = &state.pipeline.config().source_root;
    let ready = tokio::fs::metadata(source_root)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let (status, label) = if ready {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            source_dir_ready: ready,
        }),
    )
}
