//! Picbook - 儿童绘本生成编排服务
//!
//! - Domain: book/ (BookCreationState), age_rules
//! - Application: commands, queries, ports
//! - Infrastructure: http, worker, memory, resilience, persistence, adapters, events

use std::sync::Arc;

use picbook::application::{BookStateRepositoryPort, GeneratorPort, RendererPort};
use picbook::config::{load_config, print_config, AppConfig};
use picbook::infrastructure::adapters::{
    FakeGenerator, FakeGeneratorConfig, FakeRenderer, FileArtifactStorage, HttpGeneratorClient,
    HttpGeneratorClientConfig, HttpRendererClient,
};
use picbook::infrastructure::events::EventPublisher;
use picbook::infrastructure::http::{AppState, HttpServer, ServerConfig};
use picbook::infrastructure::memory::InMemoryBookRegistry;
use picbook::infrastructure::persistence::sled::{SledArtifactCache, SledCacheConfig};
use picbook::infrastructure::persistence::sqlite::{
    create_pool, run_migrations, DatabaseConfig, SqliteBookRepository,
};
use picbook::infrastructure::resilience::{GenerationService, RateLimiter, RetryExecutor};
use picbook::infrastructure::worker::WorkerContext;

/// 生成结果缓存上限
const CACHE_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;

fn init_tracing(config: &AppConfig) {
    let log_filter = format!(
        "{},picbook={},tower_http=debug",
        config.log.level, config.log.level
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter));

    if config.log.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    init_tracing(&config);

    tracing::info!("Picbook - picture book orchestration service");
    print_config(&config);

    // 确保数据目录存在
    tokio::fs::create_dir_all(&config.storage.artifacts_dir).await?;
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if let Some(parent) = config.storage.cache_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // 初始化数据库
    let db_config = DatabaseConfig {
        database_url: config.database.database_url(),
        max_connections: config.database.max_connections,
    };
    let pool = create_pool(&db_config).await?;
    run_migrations(&pool).await?;

    let book_repo: Arc<dyn BookStateRepositoryPort> =
        Arc::new(SqliteBookRepository::new(pool.clone()));

    // 产物存储 + 生成结果幂等缓存
    let storage = Arc::new(FileArtifactStorage::new(&config.storage.artifacts_dir).await?);
    let cache_config = SledCacheConfig {
        db_path: config.storage.cache_path.to_string_lossy().to_string(),
        max_size_bytes: CACHE_MAX_BYTES,
    };
    let cache = Arc::new(SledArtifactCache::new(&cache_config)?);

    // 生成服务与渲染服务（fake 用于离线开发）
    let generator: Arc<dyn GeneratorPort> = if config.generator.fake {
        Arc::new(FakeGenerator::new(FakeGeneratorConfig::default()))
    } else {
        let generator_config = HttpGeneratorClientConfig::new(config.generator.url.clone())
            .with_timeout(config.generator.timeout_secs)
            .with_api_key(config.generator.api_key.clone());
        Arc::new(HttpGeneratorClient::new(generator_config)?)
    };

    // 不可用时仍然启动，调用会按重试策略处理
    if !generator.health_check().await {
        tracing::warn!(url = %config.generator.url, "Generator health check failed");
    }

    let renderer: Arc<dyn RendererPort> = if config.renderer.fake {
        Arc::new(FakeRenderer::new(
            storage.clone(),
            std::time::Duration::from_millis(200),
        ))
    } else {
        Arc::new(HttpRendererClient::new(
            config.renderer.url.clone(),
            config.renderer.timeout_secs,
        )?)
    };

    // 所有绘本共享同一个限流器
    let generation = Arc::new(GenerationService::new(
        generator,
        cache,
        Arc::new(RateLimiter::new(config.rate_limit.limiter())),
        RetryExecutor::new(config.retry.policy()),
        config.generator.supervision(),
    ));

    // 创建事件发布器
    let event_publisher = Arc::new(EventPublisher::new());

    let ctx = WorkerContext {
        generation,
        renderer,
        storage,
        repository: book_repo.clone(),
        publisher: event_publisher.clone(),
        settings: config.workflow.settings(&config.renderer, &config.retry),
    };

    // 恢复上次进程未完成的绘本
    let registry = Arc::new(InMemoryBookRegistry::new(ctx));
    let restored = registry.restore_unfinished().await?;
    if restored > 0 {
        tracing::info!(restored, "Resumed unfinished books");
    }

    // 创建 HTTP 服务器
    let server_config = ServerConfig::new(&config.server.host, config.server.port).with_files(
        config.server.files_path.clone(),
        config.storage.artifacts_dir.clone(),
    );
    let state = AppState::new(
        registry,
        book_repo,
        event_publisher,
        &config.server.files_path,
    );

    let server = HttpServer::new(server_config, state);

    tracing::info!("Starting HTTP server...");

    // 启动服务器（带优雅关闭）
    server
        .run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal");
        })
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
