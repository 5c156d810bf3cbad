use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// 在 OpenAPI 中注入 `X-API-Key` 的安全定义，`/images*` 接口共用。
struct ApiKeySecurity;

impl Modify for ApiKeySecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "ApiKey",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::image::handler::get_image,
        crate::features::image::handler::get_raw,
        crate::features::image::handler::test_auth,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::features::health::handler::HealthResponse,
        crate::features::image::handler::AuthCheckResponse,
    )),
    modifiers(&ApiKeySecurity),
    tags(
        (name = "Image", description = "图片缩放：按需生成并缓存缩放结果，或直接读取原图。"),
        (name = "Health", description = "健康检查：服务探活。"),
    ),
    info(
        title = "Image Gateway API",
        version = env!("CARGO_PKG_VERSION"),
        description = "图片缩放服务 API（Axum + utoipa）。`/images*` 接口挂载在 `config.api.prefix` 下（默认为空），OpenAPI 的 paths 不包含该前缀。"
    )
)]
pub struct ApiDoc;
