//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `PICBOOK_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `PICBOOK_SERVER__PORT=8080`
/// - `PICBOOK_GENERATOR__URL=http://generator:8100`
/// - `PICBOOK_WORKFLOW__PAGE_CONCURRENCY=4`
/// - `PICBOOK_WORKFLOW__RENDER_TARGETS=screen,proof,print`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 默认值（最低优先级），列表类默认值由 serde 提供
    builder = builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5070)?
        .set_default("server.files_path", "/files")?
        .set_default("generator.url", "http://localhost:8100")?
        .set_default("generator.timeout_secs", 180)?
        .set_default("generator.stall_timeout_secs", 45)?
        .set_default("generator.fake", false)?
        .set_default("renderer.url", "http://localhost:8200")?
        .set_default("renderer.timeout_secs", 120)?
        .set_default("renderer.fake", false)?
        .set_default("rate_limit.capacity", 5)?
        .set_default("rate_limit.refill_per_sec", 1.0)?
        .set_default("rate_limit.max_concurrent", 3)?
        .set_default("rate_limit.min_wait_ms", 25)?
        .set_default("retry.max_attempts", 4)?
        .set_default("retry.initial_backoff_ms", 1000)?
        .set_default("retry.max_backoff_ms", 30_000)?
        .set_default("retry.multiplier", 1.8)?
        .set_default("retry.max_jitter_ms", 1000)?
        .set_default("workflow.page_concurrency", 2)?
        .set_default("workflow.covers_enabled", true)?
        .set_default("workflow.cover_options", 3)?
        .set_default("workflow.character_options", 3)?
        .set_default("workflow.preview_enabled", true)?
        .set_default("database.path", "data/picbook.db")?
        .set_default("database.max_connections", 5)?
        .set_default("storage.artifacts_dir", "data/artifacts")?
        .set_default("storage.cache_path", "data/cache.sled")?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 环境变量（最高优先级）
    // 例如: PICBOOK_GENERATOR__URL=http://generator:8100
    // 注意: 环境变量名会被转换为小写
    builder = builder.add_source(
        Environment::with_prefix("PICBOOK")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("workflow.render_targets")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("Server port cannot be 0"));
    }

    let files_path = config.server.files_path.trim_end_matches('/');
    if !files_path.starts_with('/') {
        return Err(invalid("Files path must be an absolute URL path other than /"));
    }

    if config.generator.url.is_empty() {
        return Err(invalid("Generator URL cannot be empty"));
    }

    if config.database.path.is_empty() {
        return Err(invalid("Database path cannot be empty"));
    }

    if config.workflow.page_concurrency == 0 {
        return Err(invalid("Page concurrency must be at least 1"));
    }

    if config.workflow.render_targets.is_empty() {
        return Err(invalid("At least one render target is required"));
    }

    if config.rate_limit.capacity == 0 {
        return Err(invalid("Rate limit capacity cannot be 0"));
    }

    if config.rate_limit.max_concurrent == 0 {
        return Err(invalid("Rate limit max_concurrent cannot be 0"));
    }

    if config.retry.max_attempts == 0 {
        return Err(invalid("Retry max_attempts must be at least 1"));
    }

    if config.retry.multiplier < 1.0 {
        return Err(invalid("Retry multiplier cannot be below 1.0"));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!("Public Base URL: {}", config.server.public_base_url());
    tracing::info!("Files Path: {}", config.server.files_path);
    if config.generator.fake {
        tracing::info!("Generator: fake");
    } else {
        tracing::info!("Generator URL: {}", config.generator.url);
    }
    tracing::info!(
        "Generator Timeout: {}s (stall {}s)",
        config.generator.timeout_secs,
        config.generator.stall_timeout_secs
    );
    if config.renderer.fake {
        tracing::info!("Renderer: fake");
    } else {
        tracing::info!("Renderer URL: {}", config.renderer.url);
    }
    tracing::info!(
        "Rate Limit: capacity={} refill={}/s max_concurrent={}",
        config.rate_limit.capacity,
        config.rate_limit.refill_per_sec,
        config.rate_limit.max_concurrent
    );
    tracing::info!(
        "Retry: max_attempts={} backoff={}..{}ms x{}",
        config.retry.max_attempts,
        config.retry.initial_backoff_ms,
        config.retry.max_backoff_ms,
        config.retry.multiplier
    );
    tracing::info!(
        "Workflow: page_concurrency={} covers={} targets={:?}",
        config.workflow.page_concurrency,
        config.workflow.covers_enabled,
        config.workflow.render_targets
    );
    tracing::info!("Database: {}", config.database.path);
    tracing::info!("Artifacts Directory: {:?}", config.storage.artifacts_dir);
    tracing::info!("Cache Path: {:?}", config.storage.cache_path);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5070);
        assert_eq!(config.server.files_path, "/files");
    }

    #[test]
    fn test_validation_passes_for_valid_config() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_error_for_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_empty_generator_url() {
        let mut config = AppConfig::default();
        config.generator.url = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_empty_db_path() {
        let mut config = AppConfig::default();
        config.database.path = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_degenerate_workflow_and_limits() {
        let mut config = AppConfig::default();
        config.workflow.page_concurrency = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.workflow.render_targets.clear();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.rate_limit.max_concurrent = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.retry.multiplier = 0.5;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.server.files_path = "/".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("picbook.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[workflow]\npage_concurrency = 3\ncovers_enabled = false\n\n[generator]\nfake = true"
        )
        .unwrap();

        let config = load_config_from_path(Some(&path)).unwrap();
        assert_eq!(config.workflow.page_concurrency, 3);
        assert!(!config.workflow.covers_enabled);
        assert!(config.generator.fake);
        assert_eq!(config.retry.max_attempts, 4);
    }
}
