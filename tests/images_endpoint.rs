use std::path::Path;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use image::{GenericImageView, Rgba, RgbaImage};
use serde_json::Value;
use tower::ServiceExt;

use image_gateway::config::AppConfig;
use image_gateway::features::audit::{ACCESS_LOG_FILE, AuditHandle, PROCESSING_LOG_FILE};
use image_gateway::{AppState, build_app};

const API_KEY: &str = "test-key";

struct TestApp {
    dir: tempfile::TempDir,
    app: Router,
    audit: AuditHandle,
}

fn test_config(root: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.storage.source_dir = root.join("images").to_string_lossy().into_owned();
    cfg.storage.derivative_dir = root.join("processed_images").to_string_lossy().into_owned();
    cfg.storage.log_dir = root.join("logs").to_string_lossy().into_owned();
    cfg.storage.views_dir = root.join("views").to_string_lossy().into_owned();
    cfg.auth.api_key = API_KEY.to_string();
    cfg
}

async fn spawn_app(tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = test_config(dir.path());
    tweak(&mut cfg);

    let images = dir.path().join("images");
    std::fs::create_dir_all(&images).expect("mkdir images");
    RgbaImage::from_pixel(400, 300, Rgba([0, 128, 255, 255]))
        .save(images.join("photo.png"))
        .expect("save fixture");

    let audit = AuditHandle::spawn(cfg.log_path());
    let state = AppState::from_config(&cfg, audit.clone());
    state
        .pipeline
        .ensure_storage_ready()
        .await
        .expect("storage ready");

    TestApp {
        app: build_app(state, &cfg),
        dir,
        audit,
    }
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(k) = key {
        builder = builder.header("x-api-key", k);
    }
    builder.body(Body::empty()).expect("build request")
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn resize_returns_png_and_caches_on_disk() {
    let t = spawn_app(|_| {}).await;

    let resp = t
        .app
        .clone()
        .oneshot(get(
            "/images?filename=photo.png&width=200&height=150",
            Some(API_KEY),
        ))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
    assert!(resp.headers().get("x-request-id").is_some());

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let img = image::load_from_memory(&bytes).expect("decode body");
    assert_eq!(img.dimensions(), (200, 150));

    let cached = t.dir.path().join("processed_images/photo_200x150.png");
    assert!(cached.is_file());

    t.audit
        .graceful_shutdown(Duration::from_secs(5))
        .await
        .expect("drain audit");
    let log = std::fs::read_to_string(t.dir.path().join("logs").join(PROCESSING_LOG_FILE))
        .expect("processing log");
    assert!(log.trim_end().ends_with("Processed: photo.png to 200x150"));
}

#[tokio::test]
async fn error_statuses_and_messages() {
    let t = spawn_app(|_| {}).await;

    let cases = [
        (
            "/images?filename=missing.png&width=100&height=100",
            StatusCode::NOT_FOUND,
            "Image not found",
        ),
        (
            "/images?filename=photo.png&width=-5&height=100",
            StatusCode::BAD_REQUEST,
            "Width and height must be positive numbers",
        ),
        (
            "/images?filename=photo.png&width=100",
            StatusCode::BAD_REQUEST,
            "Missing required parameters",
        ),
        (
            "/images?filename=photo.bmp&width=100&height=100",
            StatusCode::BAD_REQUEST,
            "Invalid image format",
        ),
        (
            "/images?filename=..%2F..%2Fetc%2Fpasswd&width=10&height=10",
            StatusCode::BAD_REQUEST,
            "Invalid filename",
        ),
    ];

    for (uri, status, message) in cases {
        let resp = t
            .app
            .clone()
            .oneshot(get(uri, Some(API_KEY)))
            .await
            .expect("call");
        assert_eq!(resp.status(), status, "{uri}");
        let body = json_body(resp).await;
        assert_eq!(body["error"], message, "{uri}");
        assert_eq!(body["status"], status.as_u16(), "{uri}");
    }
}

#[tokio::test]
async fn api_key_is_required() {
    let t = spawn_app(|_| {}).await;

    for key in [None, Some("wrong")] {
        let resp = t
            .app
            .clone()
            .oneshot(get("/images/test-auth", key))
            .await
            .expect("call");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["error"], "Unauthorized");
    }

    let resp = t
        .app
        .clone()
        .oneshot(get("/images/test-auth", Some(API_KEY)))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["message"], "Authenticated!");
}

#[tokio::test]
async fn raw_returns_original_bytes() {
    let t = spawn_app(|_| {}).await;

    let resp = t
        .app
        .clone()
        .oneshot(get("/images/raw?filename=photo.png", Some(API_KEY)))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let original = std::fs::read(t.dir.path().join("images/photo.png")).expect("read");
    assert_eq!(bytes.as_ref(), original.as_slice());

    let resp = t
        .app
        .clone()
        .oneshot(get("/images/raw?filename=nope.png", Some(API_KEY)))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_request_is_rejected_at_http_layer() {
    let t = spawn_app(|cfg| cfg.image.max_dimension = 500).await;
    let resp = t
        .app
        .clone()
        .oneshot(get(
            "/images?filename=photo.png&width=501&height=10",
            Some(API_KEY),
        ))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn static_files_are_served_and_logged() {
    let t = spawn_app(|_| {}).await;

    let resp = t
        .app
        .clone()
        .oneshot(get("/static/photo.png", None))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = t
        .app
        .clone()
        .oneshot(get("/static/absent.png", None))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    t.audit
        .graceful_shutdown(Duration::from_secs(5))
        .await
        .expect("drain audit");
    let log = std::fs::read_to_string(t.dir.path().join("logs").join(ACCESS_LOG_FILE))
        .expect("access log");
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("Accessed: /static/photo.png"));
}

#[tokio::test]
async fn index_page_and_health() {
    let t = spawn_app(|_| {}).await;

    // views 目录不存在
    let resp = t.app.clone().oneshot(get("/", None)).await.expect("call");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let views = t.dir.path().join("views");
    std::fs::create_dir_all(&views).expect("mkdir views");
    std::fs::write(views.join("index.html"), "<h1>hi</h1>").expect("write index");
    let resp = t.app.clone().oneshot(get("/", None)).await.expect("call");
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
    assert!(ct.starts_with("text/html"));

    let resp = t.app.clone().oneshot(get("/health", None)).await.expect("call");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "healthy");
}

#[tokio::test]
async fn rate_limit_rejects_after_quota() {
    let t = spawn_app(|cfg| {
        cfg.rate_limit.max_requests = 2;
        cfg.rate_limit.window_secs = 3600;
        cfg.rate_limit.trust_proxy_headers = true;
    })
    .await;

    let call = |ip: &'static str| {
        Request::builder()
            .uri("/images/test-auth")
            .header("x-api-key", API_KEY)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .expect("build request")
    };

    for _ in 0..2 {
        let resp = t.app.clone().oneshot(call("10.0.0.1")).await.expect("call");
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = t.app.clone().oneshot(call("10.0.0.1")).await.expect("call");
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(resp).await["error"], "Too many requests");

    let resp = t.app.clone().oneshot(call("10.0.0.2")).await.expect("call");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_bypass_untrusted_limit() {
    let t = spawn_app(|cfg| {
        cfg.rate_limit.max_requests = 2;
        cfg.rate_limit.window_secs = 3600;
    })
    .await;

    let mut statuses = Vec::new();
    for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        let req = Request::builder()
            .uri("/images/test-auth")
            .header("x-api-key", API_KEY)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .expect("build request");
        let resp = t.app.clone().oneshot(req).await.expect("call");
        statuses.push(resp.status());
    }
    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
}

#[tokio::test]
async fn prefix_nests_image_routes() {
    let t = spawn_app(|cfg| cfg.api.prefix = "/api".to_string()).await;

    let resp = t
        .app
        .clone()
        .oneshot(get("/api/images/test-auth", Some(API_KEY)))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = t
        .app
        .clone()
        .oneshot(get("/images/test-auth", Some(API_KEY)))
        .await
        .expect("call");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
