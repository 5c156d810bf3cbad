pub mod middleware;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};

use crate::error::AppError;

/// 静态资源访问日志文件名
pub const ACCESS_LOG_FILE: &str = "image-access.log";
/// 缩放处理日志文件名
pub const PROCESSING_LOG_FILE: &str = "image-processing.log";

const QUEUE_CAPACITY: usize = 1024;

/// 只追加的审计事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// 静态资源被访问
    Access { path: String },
    /// 新生成了一张缩放图
    Processed {
        filename: String,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub ts_utc: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditRecord {
    fn file_name(&self) -> &'static str {
        match self.event {
            AuditEvent::Access { .. } => ACCESS_LOG_FILE,
            AuditEvent::Processed { .. } => PROCESSING_LOG_FILE,
        }
    }

    /// 单行文本：`{timestamp} - {subject}`
    pub fn line(&self) -> String {
        let ts = self.ts_utc.to_rfc3339_opts(SecondsFormat::Millis, true);
        match &self.event {
            AuditEvent::Access { path } => format!("{ts} - Accessed: {path}\n"),
            AuditEvent::Processed {
                filename,
                width,
                height,
            } => format!("{ts} - Processed: {filename} to {width}x{height}\n"),
        }
    }
}

/// 审计日志句柄：对外只暴露非阻塞上报与优雅关闭
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
    shutdown_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl AuditHandle {
    /// 启动后台写入任务（需在 Tokio 运行时内调用）
    pub fn spawn(log_dir: impl Into<PathBuf>) -> Self {
        let log_dir = log_dir.into();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(run_writer(log_dir, rx, shutdown_rx, done_tx));

        Self {
            tx,
            shutdown_tx,
            done_rx,
        }
    }

    pub fn record(&self, event: AuditEvent) {
        let record = AuditRecord {
            ts_utc: Utc::now(),
            event,
        };
        // 队列已满则丢弃，不阻塞请求
        if self.tx.try_send(record).is_err() {
            tracing::debug!("审计队列已满或已关闭，丢弃一条记录");
        }
    }

    pub fn record_access(&self, path: impl Into<String>) {
        self.record(AuditEvent::Access { path: path.into() });
    }

    pub fn record_processed(&self, filename: impl Into<String>, width: u32, height: u32) {
        self.record(AuditEvent::Processed {
            filename: filename.into(),
            width,
            height,
        });
    }

    /// 优雅关闭：通知写入任务排空队列后退出，并等待其完成
    pub async fn graceful_shutdown(&self, timeout: Duration) -> Result<(), AppError> {
        let _ = self.shutdown_tx.send(true);

        let mut rx = self.done_rx.clone();
        let wait = async {
            loop {
                if *rx.borrow() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| AppError::Internal("审计日志关闭超时".into()))
    }
}

async fn run_writer(
    log_dir: PathBuf,
    mut rx: mpsc::Receiver<AuditRecord>,
    mut shutdown_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(record) => append(&log_dir, &record).await,
                None => break,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    // 收尾：写完队列里剩余的记录
    rx.close();
    while let Some(record) = rx.recv().await {
        append(&log_dir, &record).await;
    }
    let _ = done_tx.send(true);
}

async fn append(log_dir: &Path, record: &AuditRecord) {
    let path = log_dir.join(record.file_name());
    if let Err(e) = append_line(&path, &record.line()).await {
        tracing::warn!("写入审计日志失败 {:?}: {}", path, e);
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
