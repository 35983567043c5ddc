//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::book::RenderTarget;
use crate::infrastructure::resilience::{RateLimiterConfig, RetryPolicy, SupervisionConfig};
use crate::infrastructure::worker::WorkflowSettings;

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 生成服务配置
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// 渲染服务配置
    #[serde(default)]
    pub renderer: RendererConfig,

    /// 生成调用限流
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// 重试策略
    #[serde(default)]
    pub retry: RetryConfig,

    /// 编排参数
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// 公开访问的 Base URL
    /// 如果未设置，则使用 http://{host}:{port}
    #[serde(default)]
    pub base_url: Option<String>,

    /// 产物静态服务的 URL 前缀
    #[serde(default = "default_files_path")]
    pub files_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5070
}

fn default_files_path() -> String {
    "/files".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            files_path: default_files_path(),
        }
    }
}

impl ServerConfig {
    /// 获取服务器地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 获取公开的 Base URL
    pub fn public_base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| {
            let host = if self.host == "0.0.0.0" {
                "localhost"
            } else {
                &self.host
            };
            format!("http://{}:{}", host, self.port)
        })
    }
}

/// 生成服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// 单次调用总时长上限（秒）
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,

    /// 无心跳判定卡死的时长（秒）
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,

    /// 使用内置假生成器（离线开发）
    #[serde(default)]
    pub fake: bool,
}

fn default_generator_url() -> String {
    "http://localhost:8100".to_string()
}

fn default_generator_timeout() -> u64 {
    180
}

fn default_stall_timeout() -> u64 {
    45
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            url: default_generator_url(),
            api_key: None,
            timeout_secs: default_generator_timeout(),
            stall_timeout_secs: default_stall_timeout(),
            fake: false,
        }
    }
}

impl GeneratorConfig {
    pub fn supervision(&self) -> SupervisionConfig {
        SupervisionConfig {
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            call_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// 渲染服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    #[serde(default = "default_renderer_url")]
    pub url: String,

    #[serde(default = "default_renderer_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub fake: bool,
}

fn default_renderer_url() -> String {
    "http://localhost:8200".to_string()
}

fn default_renderer_timeout() -> u64 {
    120
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            url: default_renderer_url(),
            timeout_secs: default_renderer_timeout(),
            fake: false,
        }
    }
}

/// 限流配置（令牌桶 + 并发闸门）
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    #[serde(default = "default_refill")]
    pub refill_per_sec: f64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_min_wait")]
    pub min_wait_ms: u64,
}

fn default_capacity() -> u32 {
    5
}

fn default_refill() -> f64 {
    1.0
}

fn default_max_concurrent() -> usize {
    3
}

fn default_min_wait() -> u64 {
    25
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill(),
            max_concurrent: default_max_concurrent(),
            min_wait_ms: default_min_wait(),
        }
    }
}

impl RateLimitConfig {
    pub fn limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            capacity: self.capacity,
            refill_per_sec: self.refill_per_sec,
            max_concurrent: self.max_concurrent,
            min_wait: Duration::from_millis(self.min_wait_ms),
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// 含首次调用
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_jitter")]
    pub max_jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    1.8
}

fn default_max_jitter() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
            max_jitter_ms: default_max_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

/// 编排配置
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// 每本书同时在飞的页面数
    #[serde(default = "default_page_concurrency")]
    pub page_concurrency: usize,

    #[serde(default = "default_true")]
    pub covers_enabled: bool,

    #[serde(default = "default_options")]
    pub cover_options: usize,

    #[serde(default = "default_options")]
    pub character_options: usize,

    #[serde(default = "default_true")]
    pub preview_enabled: bool,

    #[serde(default = "default_render_targets")]
    pub render_targets: Vec<RenderTarget>,
}

fn default_page_concurrency() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_options() -> usize {
    3
}

fn default_render_targets() -> Vec<RenderTarget> {
    vec![RenderTarget::Screen, RenderTarget::Print]
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            page_concurrency: default_page_concurrency(),
            covers_enabled: true,
            cover_options: default_options(),
            character_options: default_options(),
            preview_enabled: true,
            render_targets: default_render_targets(),
        }
    }
}

impl WorkflowConfig {
    /// 渲染的超时与重试取自 renderer/retry 配置，状态落盘沿用同一重试策略
    pub fn settings(&self, renderer: &RendererConfig, retry: &RetryConfig) -> WorkflowSettings {
        WorkflowSettings {
            page_concurrency: self.page_concurrency,
            covers_enabled: self.covers_enabled,
            cover_options: self.cover_options,
            character_options: self.character_options,
            preview_enabled: self.preview_enabled,
            render_targets: self.render_targets.clone(),
            render_timeout: Duration::from_secs(renderer.timeout_secs),
            render_retry: retry.policy(),
            persist_retry: retry.policy(),
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    #[serde(default = "default_db_path")]
    pub path: String,

    /// 最大连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/picbook.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// 获取数据库 URL
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path)
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 产物根目录（同时作为静态服务目录）
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// 生成结果幂等缓存（sled）
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("data/artifacts")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache.sled")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            cache_path: default_cache_path(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
