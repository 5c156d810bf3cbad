use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::features::image::{DimensionMode, FitPolicy, PipelineConfig};

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApiConfig {
    /// API 路由前缀（留空则直接挂在根路径下，如 `/images`）
    pub prefix: String,
}

/// 存储目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 原图目录（只读）
    pub source_dir: String,
    /// 缩放结果缓存目录
    pub derivative_dir: String,
    /// 访问/处理日志目录
    pub log_dir: String,
    /// 首页 HTML 目录（包含 index.html）
    pub views_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            source_dir: "./images".to_string(),
            derivative_dir: "./processed_images".to_string(),
            log_dir: "./logs".to_string(),
            views_dir: "./views".to_string(),
        }
    }
}

/// API Key 鉴权配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// 请求头 `X-API-Key` 需要匹配的密钥；为空时所有受保护请求均返回 401
    pub api_key: String,
}

impl AuthConfig {
    fn default_api_key() -> String {
        std::env::var("API_KEY")
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: Self::default_api_key(),
        }
    }
}

/// 图片处理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// 适配策略：cover | contain | fill
    pub fit: FitPolicy,
    /// 尺寸参数策略：both（宽高必填）| preserve-aspect（允许只给一边）
    pub dimension_mode: DimensionMode,
    /// 并发缩放许可数（0=自动，取 CPU 核心数）
    pub max_parallel: u32,
    /// 单次缩放超时（秒）
    pub resize_timeout_secs: u64,
    /// JPEG 输出质量（1-100）
    pub jpeg_quality: u8,
    /// HTTP 层允许的最大宽/高（0=不限制）
    pub max_dimension: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            fit: FitPolicy::default(),
            dimension_mode: DimensionMode::default(),
            max_parallel: 0,
            resize_timeout_secs: 30,
            jpeg_quality: 85,
            max_dimension: 10_000,
        }
    }
}

impl ImageConfig {
    /// 实际生效的并发许可数
    pub fn effective_parallelism(&self) -> usize {
        match self.max_parallel {
            0 => num_cpus::get(),
            n => n as usize,
        }
    }
}

/// 限流配置（固定窗口，按客户端 IP 计数）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// 每个窗口内允许的最大请求数
    pub max_requests: u32,
    /// 窗口长度（秒）
    pub window_secs: u64,
    /// 是否信任 X-Forwarded-For / X-Real-IP（仅在可信反向代理之后开启，否则客户端可伪造）
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_secs: 15 * 60,
            trust_proxy_headers: false,
        }
    }
}

/// CORS 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 是否启用 CORS
    #[serde(default = "CorsConfig::default_enabled")]
    pub enabled: bool,
    /// 允许的 Origin 列表（支持 "*" 表示任意）
    #[serde(default = "CorsConfig::default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// 允许的方法列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// 允许的请求头列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// 暴露的响应头列表（支持 "*" 表示任意）
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// 是否允许携带凭证（Cookie/Authorization）
    #[serde(default)]
    pub allow_credentials: bool,
    /// 预检缓存时间（秒）
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl CorsConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_allowed_origins() -> Vec<String> {
        vec!["*".to_string()]
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            allowed_origins: Self::default_allowed_origins(),
            allowed_methods: vec!["*".to_string()],
            allowed_headers: vec!["*".to_string()],
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    /// 日志格式：full | compact
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    /// 图片处理配置
    pub image: ImageConfig,
    /// 限流配置
    pub rate_limit: RateLimitConfig,
    /// CORS 配置
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
    /// 优雅退出配置
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            // 配置文件可缺省，全部字段都有默认值
            .add_source(File::from(config_path).required(false))
            // 支持环境变量覆盖，例如：APP__SERVER__PORT=8080
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = builder.try_deserialize()?;
        if config.auth.api_key.trim().is_empty() {
            config.auth.api_key = AuthConfig::default_api_key();
        }
        if config.auth.api_key.is_empty() {
            tracing::warn!("auth.api_key 未配置，所有 /images 请求都将返回 401");
        }

        Ok(config)
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        std::env::var("APP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.source_dir)
    }

    pub fn derivative_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.derivative_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.log_dir)
    }

    pub fn views_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.views_dir)
    }

    /// 由应用配置构造缩放流水线配置
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            source_root: self.source_path(),
            derivative_root: self.derivative_path(),
            fit: self.image.fit,
            dimension_mode: self.image.dimension_mode,
            resize_timeout: Duration::from_secs(self.image.resize_timeout_secs.max(1)),
        }
    }
}
