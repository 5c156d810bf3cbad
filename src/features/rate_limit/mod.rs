//! 按客户端 IP 的固定窗口限流。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;

use crate::config::RateLimitConfig;
use crate::error::AppError;

/// 计数表超过该条目数时清理过期窗口
const PRUNE_THRESHOLD: usize = 50_000;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    slot: i64,
    count: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window_secs: i64,
    /// 为 false 时只按连接地址计数，忽略可被客户端伪造的代理头
    trust_proxy_headers: bool,
    windows: Arc<Mutex<HashMap<String, RateWindow>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window_secs: window_secs.max(1) as i64,
            trust_proxy_headers: false,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// 未启用时返回 None
    pub fn from_config(cfg: &RateLimitConfig) -> Option<Self> {
        cfg.enabled.then(|| {
            Self::new(cfg.max_requests, cfg.window_secs).trust_proxy_headers(cfg.trust_proxy_headers)
        })
    }

    fn client_key(&self, req: &Request) -> String {
        if self.trust_proxy_headers
            && let Some(ip) = client_ip_from_headers(req.headers())
        {
            return ip.to_string();
        }
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    /// 记一次请求；超出当前窗口配额时返回 false。
    pub async fn check(&self, client: &str, now_ts: i64) -> bool {
        let slot = now_ts.div_euclid(self.window_secs);
        let mut guard = self.windows.lock().await;
        let entry = guard
            .entry(client.to_string())
            .or_insert(RateWindow { slot, count: 0 });
        if entry.slot != slot {
            entry.slot = slot;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;

        if guard.len() > PRUNE_THRESHOLD {
            guard.retain(|_, v| v.slot >= slot);
        }
        true
    }
}

pub(crate) fn client_ip_from_headers(headers: &HeaderMap) -> Option<&str> {
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next().map(|s| s.trim()))
        && !ip.is_empty()
    {
        return Some(ip);
    }
    if let Some(v) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let s = v.trim();
        if !s.is_empty() {
            return Some(s);
        }
    }
    None
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let client = limiter.client_key(&req);
    let now_ts = chrono::Utc::now().timestamp();
    if !limiter.check(&client, now_ts).await {
        tracing::warn!(client = %client, "请求频率超限");
        return AppError::RateLimited.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn window_allows_quota_then_rejects() {
        let limiter = RateLimiter::new(2, 60);
        assert!(limiter.check("1.1.1.1", 0).await);
        assert!(limiter.check("1.1.1.1", 10).await);
        assert!(!limiter.check("1.1.1.1", 59).await);
        // 其他客户端独立计数
        assert!(limiter.check("2.2.2.2", 59).await);
        // 新窗口重置
        assert!(limiter.check("1.1.1.1", 60).await);
    }

    #[test]
    fn disabled_config_yields_no_limiter() {
        let cfg = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        assert!(RateLimiter::from_config(&cfg).is_none());
        assert!(RateLimiter::from_config(&RateLimitConfig::default()).is_some());
    }

    fn request_from(addr: &str, forwarded: &str) -> Request {
        let mut req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", forwarded)
            .body(axum::body::Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        req
    }

    #[test]
    fn proxy_headers_are_ignored_unless_trusted() {
        let req = request_from("192.168.1.7:5000", "1.2.3.4");

        let limiter = RateLimiter::new(1, 60);
        assert_eq!(limiter.client_key(&req), "192.168.1.7");

        let limiter = RateLimiter::new(1, 60).trust_proxy_headers(true);
        assert_eq!(limiter.client_key(&req), "1.2.3.4");
    }

    #[test]
    fn client_ip_prefers_x_forwarded_for_first_item() {
        let mut h = HeaderMap::new();
        h.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 1.2.3.4 , 5.6.7.8 "),
        );
        h.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip_from_headers(&h), Some("1.2.3.4"));
    }

    #[test]
    fn client_ip_falls_back_to_x_real_ip() {
        let mut h = HeaderMap::new();
        h.insert("x-real-ip", HeaderValue::from_static(" 9.9.9.9 "));
        assert_eq!(client_ip_from_headers(&h), Some("9.9.9.9"));

        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("   "));
        assert_eq!(client_ip_from_headers(&h), None);
    }
}
