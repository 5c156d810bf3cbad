//! 路由与全局中间件装配。

use axum::{
    Router,
    http::{HeaderName, HeaderValue, header},
    middleware,
    routing::get,
};
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::features::audit::middleware::access_log_middleware;
use crate::features::auth::api_key_middleware;
use crate::features::health::handler::health_check;
use crate::features::image::create_image_router;
use crate::features::rate_limit::rate_limit_middleware;
use crate::features::views;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; img-src 'self' data: blob:";

pub fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // 图片本身已压缩，只压缩 JSON/HTML 等文本响应
    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

fn security_headers() -> [(HeaderName, HeaderValue); 4] {
    [
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
        (
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ),
        (
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ),
        (
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ),
    ]
}

/// `/images*` 路由：限流在外层，鉴权在内层
fn api_router(state: &AppState) -> Router<AppState> {
    let mut router = create_image_router().layer(middleware::from_fn_with_state(
        state.api_key.clone(),
        api_key_middleware,
    ));
    if let Some(limiter) = state.rate_limiter.clone() {
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }
    router
}

/// `/static/*`：原图目录的静态服务，成功返回的文件记一条访问日志
fn static_router(state: &AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .nest_service("/static", ServeDir::new(&state.pipeline.config().source_root))
        .layer(middleware::from_fn_with_state(
            state.audit.clone(),
            access_log_middleware,
        ))
}

/// 组装完整应用
pub fn build_app(state: AppState, config: &AppConfig) -> Router {
    let prefix = config.api.prefix.trim_matches('/');
    let api = api_router(&state);

    let mut app = Router::<AppState>::new()
        .route("/", get(views::index))
        .route("/health", get(health_check))
        .merge(static_router(&state))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));
    app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(&format!("/{prefix}"), api)
    };

    let mut app = app.with_state(state);

    for (name, value) in security_headers() {
        app = app.layer(SetResponseHeaderLayer::if_not_present(name, value));
    }
    if let Some(cors) = crate::cors::build_cors_layer(&config.cors) {
        app = app.layer(cors);
    }
    app.layer(CompressionLayer::new().compress_when(compression_predicate()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(crate::request_id::request_id_middleware))
}
