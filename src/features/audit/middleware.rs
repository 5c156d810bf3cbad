use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::AuditHandle;

/// 静态资源访问日志：仅对成功返回文件内容的请求（2xx）记一条访问记录。
pub async fn access_log_middleware(
    State(audit): State<AuditHandle>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let res = next.run(req).await;

    if res.status().is_success() {
        tracing::debug!("Serving file: {}", path);
        audit.record_access(path);
    }
    res
}
