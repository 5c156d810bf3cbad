use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::state::AppState;

pub const INDEX_FILE: &str = "index.html";

/// 首页：返回 views 目录下的 index.html；读取失败时返回纯文本 500。
pub async fn index(State(state): State<AppState>) -> Response {
    let path = state.views_dir.join(INDEX_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!("读取首页失败 {:?}: {}", path, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}
