//! 缩放流水线（编排层）：校验 → 计算缓存键 → 探测 → 缺失时生成 → 返回路径。
//!
//! 文件系统是唯一的持久层：是否已有缩放结果，每次都直接探测磁盘。
//! 同一缓存键的"探测+生成"作为一个独立任务运行，in-flight 表保存该任务的共享句柄：
//! 并发请求挂到同一任务上，调用方中途断开不影响任务写完结果，也不会触发第二次缩放。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::{PipelineError, ResizeError};
use crate::features::audit::AuditHandle;

use super::dimensions::{self, DimensionMode, RequestedSize};
use super::engine::{FitPolicy, ResizeEngine, ResizeSpec};
use super::key::DerivativeKey;
use super::resolver::{ImageName, PathResolver, SourcePath};
use super::types::{ImageKind, ResizeQuery};

/// 正在生成中的缩放任务，可被多个请求同时等待
type Production = Shared<BoxFuture<'static, Result<Derivative, PipelineError>>>;

/// 流水线配置，构造时显式传入；构造本身不触碰文件系统。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 原图目录（只读）
    pub source_root: PathBuf,
    /// 缩放结果缓存目录
    pub derivative_root: PathBuf,
    pub fit: FitPolicy,
    pub dimension_mode: DimensionMode,
    /// 单次缩放超时
    pub resize_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(source_root: impl Into<PathBuf>, derivative_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            derivative_root: derivative_root.into(),
            fit: FitPolicy::default(),
            dimension_mode: DimensionMode::default(),
            resize_timeout: Duration::from_secs(30),
        }
    }
}

/// 可直接返回给调用方的缩放结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    /// 缓存文件的绝对路径
    pub path: PathBuf,
    pub key: DerivativeKey,
    pub kind: ImageKind,
}

impl Derivative {
    pub fn content_type(&self) -> &'static str {
        self.kind.content_type()
    }
}

#[derive(Clone)]
pub struct ImagePipeline {
    config: Arc<PipelineConfig>,
    resolver: PathResolver,
    engine: Arc<dyn ResizeEngine>,
    /// 控制并发缩放的信号量（限制 CPU 密集型任务数量）
    permits: Arc<Semaphore>,
    /// 缓存键 → 生成任务；任务结束时自行移除条目
    in_flight: Cache<DerivativeKey, Production>,
    audit: Option<AuditHandle>,
}

impl ImagePipeline {
    pub fn new(config: PipelineConfig, engine: Arc<dyn ResizeEngine>, max_parallel: usize) -> Self {
        let mut config = config;
        config.source_root = absolutize(config.source_root);
        config.derivative_root = absolutize(config.derivative_root);

        let in_flight = Cache::builder().max_capacity(10_000).build();

        Self {
            resolver: PathResolver::new(config.source_root.clone()),
            config: Arc::new(config),
            engine,
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            in_flight,
            audit: None,
        }
    }

    /// 生成新缩放图时写一条处理日志
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 创建原图目录与缓存目录（幂等），启动时调用一次。
    pub async fn ensure_storage_ready(&self) -> std::io::Result<()> {
        for dir in [&self.config.source_root, &self.config.derivative_root] {
            if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
                tracing::info!("📁 创建目录: {:?}", dir);
            }
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// 解析原图（`/images/raw` 使用）
    pub async fn resolve_source(&self, filename: Option<&str>) -> Result<SourcePath, PipelineError> {
        self.resolver.resolve_str(filename).await
    }

    /// 处理一条未经校验的请求。
    ///
    /// 纯校验（文件名语法、宽高）先于任何文件访问执行。
    pub async fn process(&self, query: &ResizeQuery) -> Result<Derivative, PipelineError> {
        let name = ImageName::parse(query.filename.as_deref())?;
        let requested = dimensions::validate_with_mode(
            query.width.as_deref(),
            query.height.as_deref(),
            self.config.dimension_mode,
        )?;
        let source = self.resolver.resolve(&name).await?;

        let (width, height) = match requested.exact() {
            Some(size) => size,
            None => self.complete_size(&source, requested).await?,
        };
        self.derive(source, width, height).await
    }

    /// `get_or_create(filename, width, height)`：类型化入口。
    pub async fn get_or_create(
        &self,
        filename: &str,
        width: u32,
        height: u32,
    ) -> Result<Derivative, PipelineError> {
        let name = ImageName::parse(Some(filename))?;
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimension);
        }
        let source = self.resolver.resolve(&name).await?;
        self.derive(source, width, height).await
    }

    async fn complete_size(
        &self,
        source: &SourcePath,
        requested: RequestedSize,
    ) -> Result<(u32, u32), PipelineError> {
        let engine = self.engine.clone();
        let path = source.as_path().to_path_buf();
        let dims = tokio::task::spawn_blocking(move || engine.dimensions(&path))
            .await
            .map_err(|e| ResizeError::Aborted(e.to_string()))??;
        Ok(requested.resolve(dims))
    }

    async fn derive(
        &self,
        source: SourcePath,
        width: u32,
        height: u32,
    ) -> Result<Derivative, PipelineError> {
        let key = DerivativeKey::derive(source.name().as_str(), width, height);
        let target = key.path_in(&self.config.derivative_root);

        let pipeline = self.clone();
        let production = self
            .in_flight
            .get_with(key.clone(), async move {
                // 任务在首次被等待时才启动，此时条目已写入表中，结束时的移除不会早于插入
                async move {
                    let worker = pipeline.clone();
                    let handle = tokio::spawn(async move {
                        let result = worker.probe_or_produce(source, key.clone(), target).await;
                        // 文件系统才是唯一记录，完成后立即移出 in-flight 表
                        worker.in_flight.invalidate(&key).await;
                        result
                    });
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(PipelineError::ResizeFailure(ResizeError::Aborted(
                            e.to_string(),
                        ))),
                    }
                }
                .boxed()
                .shared()
            })
            .await;

        production.await
    }

    async fn probe_or_produce(
        &self,
        source: SourcePath,
        key: DerivativeKey,
        target: PathBuf,
    ) -> Result<Derivative, PipelineError> {
        let derivative = Derivative {
            path: target.clone(),
            key: key.clone(),
            kind: source.kind(),
        };

        if matches!(tokio::fs::try_exists(&target).await, Ok(true)) {
            tracing::debug!(key = %key, "缩放缓存命中");
            return Ok(derivative);
        }

        self.produce(source, key, target).await?;
        Ok(derivative)
    }

    async fn produce(
        &self,
        source: SourcePath,
        key: DerivativeKey,
        target: PathBuf,
    ) -> Result<(), PipelineError> {
        let filename = source.name().as_str().to_string();
        let (width, height) = (key.width(), key.height());

        let outcome = self.resize_and_store(&source, &key, &target).await;
        if let Err(e) = &outcome {
            tracing::error!(
                filename = %filename,
                width,
                height,
                error = %e,
                "缩放失败"
            );
        }
        let elapsed_ms = outcome?;

        tracing::info!(
            filename = %filename,
            width,
            height,
            elapsed_ms,
            "Processed image: {} to {}x{}",
            filename,
            width,
            height
        );
        if let Some(audit) = &self.audit {
            audit.record_processed(filename, width, height);
        }
        Ok(())
    }

    async fn resize_and_store(
        &self,
        source: &SourcePath,
        key: &DerivativeKey,
        target: &Path,
    ) -> Result<u64, ResizeError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ResizeError::Aborted(e.to_string()))?;

        let started = Instant::now();
        let spec = ResizeSpec {
            width: key.width(),
            height: key.height(),
            fit: self.config.fit,
            format: source.kind(),
        };
        let engine = self.engine.clone();
        let path = source.as_path().to_path_buf();
        // 许可随阻塞任务一起释放：超时返回后，仍在运行的解码继续占用并发名额
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine.resize(&path, &spec)
        });

        let timeout = self.config.resize_timeout;
        let bytes = match tokio::time::timeout(timeout, task).await {
            Err(_) => return Err(ResizeError::Timeout(timeout)),
            Ok(Err(join)) => return Err(ResizeError::Aborted(join.to_string())),
            Ok(Ok(result)) => result?,
        };

        write_atomically(target, &bytes).await?;
        Ok(started.elapsed().as_millis() as u64)
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

/// 先写同目录临时文件再 rename，崩溃时不会在正式路径上留下半截文件。
async fn write_atomically(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.part", file_name, Uuid::new_v4().simple()));

    let written = async {
        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(bytes).await?;
        f.flush().await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, target).await
    }
    .await;

    if written.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    written
}
