use std::net::SocketAddr;

use image_gateway::config::{AppConfig, LoggingConfig};
use image_gateway::features::audit::AuditHandle;
use image_gateway::startup::run_startup_checks;
use image_gateway::{AppState, ShutdownManager, build_app};

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("image_gateway={},tower_http=info", logging.level).into()
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("compact") {
        builder.compact().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    // 日志初始化前先加载配置，加载失败直接输出到 stderr
    if let Err(e) = AppConfig::init_global() {
        eprintln!("Config init failed: {e}");
        std::process::exit(1);
    }
    let config = AppConfig::global();
    init_tracing(&config.logging);

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    let audit = AuditHandle::spawn(config.log_path());
    let state = AppState::from_config(config, audit.clone());

    if let Err(e) = run_startup_checks(config, &state.pipeline).await {
        tracing::error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    let app = build_app(state, config);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Images API: http://{}{}/images", addr, config.api.prefix);
    tracing::info!("Source images: {:?}", config.source_path());

    let shutdown_timeout = config.shutdown.timeout_duration();
    let signal = {
        let manager = shutdown_manager.clone();
        async move {
            let reason = manager.wait_for_shutdown().await;
            tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
            tracing::info!("优雅退出超时时间: {}秒", shutdown_timeout.as_secs());

            // 仍有长连接未结束时，超时后强制退出
            tokio::spawn(async move {
                tokio::time::sleep(shutdown_timeout).await;
                tracing::warn!("优雅退出超时，强制退出");
                std::process::exit(1);
            });
        }
    };

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await;

    if let Err(e) = served {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    // 连接已全部结束，排空审计日志队列
    match audit.graceful_shutdown(shutdown_timeout).await {
        Ok(()) => tracing::info!("审计日志已写完"),
        Err(e) => tracing::warn!("审计日志关闭失败: {}", e),
    }

    tracing::info!("服务器已优雅关闭");
}
