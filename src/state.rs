use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::features::audit::AuditHandle;
use crate::features::auth::ApiKeyGuard;
use crate::features::image::{ImagePipeline, RasterEngine};
use crate::features::rate_limit::RateLimiter;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub pipeline: ImagePipeline,
    /// 访问/处理日志
    pub audit: AuditHandle,
    pub api_key: ApiKeyGuard,
    /// 未启用限流时为 None
    pub rate_limiter: Option<RateLimiter>,
    /// HTTP 层允许的最大宽/高（0=不限制）
    pub max_dimension: u32,
    /// 首页 HTML 所在目录
    pub views_dir: PathBuf,
}

impl AppState {
    /// 按配置组装状态；缩放引擎使用默认的 `RasterEngine`。
    pub fn from_config(config: &AppConfig, audit: AuditHandle) -> Self {
        let engine = Arc::new(RasterEngine::new(config.image.jpeg_quality));
        let pipeline = ImagePipeline::new(
            config.pipeline_config(),
            engine,
            config.image.effective_parallelism(),
        )
        .with_audit(audit.clone());

        Self {
            pipeline,
            audit,
            api_key: ApiKeyGuard::new(&config.auth.api_key),
            rate_limiter: RateLimiter::from_config(&config.rate_limit),
            max_dimension: config.image.max_dimension,
            views_dir: config.views_path(),
        }
    }
}
