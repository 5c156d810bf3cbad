use std::path::Path;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::image::{ImageKind, ImagePipeline};
use crate::features::views::INDEX_FILE;

/// 执行启动检查
///
/// 1. 创建原图目录与缓存目录
/// 2. 创建日志目录
/// 3. 检查首页文件（仅告警，不阻断启动）
/// 4. 统计原图数量
pub async fn run_startup_checks(
    config: &AppConfig,
    pipeline: &ImagePipeline,
) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    pipeline
        .ensure_storage_ready()
        .await
        .map_err(|e| AppError::Internal(format!("创建图片目录失败: {e}")))?;

    let log_dir = config.log_path();
    tokio::fs::create_dir_all(&log_dir)
        .await
        .map_err(|e| AppError::Internal(format!("创建日志目录失败: {e}")))?;

    check_views(&config.views_path()).await;

    let source_root = &pipeline.config().source_root;
    match count_source_images(source_root).await {
        Ok(n) => tracing::info!("✅ 原图目录 {:?} 共 {} 张图片", source_root, n),
        Err(e) => tracing::warn!("⚠️ 无法读取原图目录 {:?}: {}", source_root, e),
    }

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

async fn check_views(views_dir: &Path) {
    let index = views_dir.join(INDEX_FILE);
    if tokio::fs::metadata(&index).await.is_err() {
        tracing::warn!("⚠️ 未找到首页文件 {:?}，GET / 将返回 500", index);
    }
}

/// 统计目录下扩展名在白名单内的常规文件
pub async fn count_source_images(dir: &Path) -> std::io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let allowed = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageKind::from_extension)
            .is_some();
        if is_file && allowed {
            count += 1;
        }
    }
    Ok(count)
}
