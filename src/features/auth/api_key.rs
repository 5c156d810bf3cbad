use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

use crate::error::AppError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// 共享 API Key 校验器。
///
/// 只保存密钥的 SHA-256 摘要，比较时对摘要做逐字节比较，避免按前缀提前返回。
#[derive(Clone)]
pub struct ApiKeyGuard {
    digest: Option<Arc<[u8; 32]>>,
}

impl ApiKeyGuard {
    /// 空密钥视为未配置：所有受保护请求都会被拒绝。
    pub fn new(api_key: &str) -> Self {
        let key = api_key.trim();
        let digest = (!key.is_empty()).then(|| Arc::new(sha256(key)));
        Self { digest }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    pub fn verify(&self, provided: &str) -> bool {
        let Some(expected) = self.digest.as_deref() else {
            return false;
        };
        if provided.is_empty() {
            return false;
        }
        let actual = sha256(provided);
        expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    pub fn check_headers(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let provided = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if self.verify(provided) {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }
}

fn sha256(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// `/images*` 的鉴权中间件：`X-API-Key` 缺失或不匹配时返回 401。
pub async fn api_key_middleware(
    State(guard): State<ApiKeyGuard>,
    req: Request,
    next: Next,
) -> Response {
    if let Err(e) = guard.check_headers(req.headers()) {
        tracing::debug!(path = %req.uri().path(), "API Key 校验失败");
        return e.into_response();
    }
    next.run(req).await
}
