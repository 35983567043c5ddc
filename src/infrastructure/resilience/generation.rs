//! Generation Service
//!
//! 生成调用的完整防护链：幂等缓存 → 限流准入 → 心跳监督 → 重试

use std::sync::Arc;

use super::heartbeat::{supervise, SupervisionConfig};
use super::rate_limiter::RateLimiter;
use super::retry::{RetryError, RetryExecutor};
use crate::application::ports::{
    generate_cache_key, ArtifactCachePort, GenerateRequest, GeneratedArtifact, GeneratorError,
    GeneratorPort, Heartbeat,
};

/// Generation Service
///
/// 多本书可共享同一个实例（共享限流器）
pub struct GenerationService {
    generator: Arc<dyn GeneratorPort>,
    cache: Arc<dyn ArtifactCachePort>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    supervision: SupervisionConfig,
}

impl GenerationService {
    pub fn new(
        generator: Arc<dyn GeneratorPort>,
        cache: Arc<dyn ArtifactCachePort>,
        limiter: Arc<RateLimiter>,
        retry: RetryExecutor,
        supervision: SupervisionConfig,
    ) -> Self {
        Self {
            generator,
            cache,
            limiter,
            retry,
            supervision,
        }
    }

    pub async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GeneratedArtifact, RetryError<GeneratorError>> {
        let cache_key = generate_cache_key(&request.idempotency_key, &request.prompt);

        match self.cache.get(&cache_key).await {
            Ok(Some(artifact)) => {
                tracing::debug!(key = %request.idempotency_key, "Generation cache hit");
                return Ok(artifact);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key = %request.idempotency_key, error = %e, "Cache lookup failed");
            }
        }

        let artifact = self
            .retry
            .run(request.kind.as_str(), |attempt| {
                let request = request.clone();
                async move {
                    let _permit = self
                        .limiter
                        .acquire()
                        .await
                        .map_err(|e| GeneratorError::Rejected(e.to_string()))?;

                    tracing::debug!(
                        key = %request.idempotency_key,
                        kind = request.kind.as_str(),
                        attempt,
                        "Calling generator"
                    );
                    let heartbeat = Heartbeat::new();
                    supervise(
                        self.generator.generate(request, &heartbeat),
                        &heartbeat,
                        self.supervision,
                    )
                    .await
                }
            })
            .await?;

        if let Err(e) = self.cache.put(&cache_key, &artifact).await {
            tracing::warn!(key = %request.idempotency_key, error = %e, "Failed to cache artifact");
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ArtifactKind;
    use crate::infrastructure::adapters::generator::{FakeGenerator, FakeGeneratorConfig};
    use crate::infrastructure::persistence::sled::SledArtifactCache;
    use crate::infrastructure::resilience::{RateLimiterConfig, RetryPolicy};
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(generator: Arc<FakeGenerator>) -> (GenerationService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SledArtifactCache::open(dir.path().join("cache.sled"), 1024 * 1024).unwrap();
        let service = GenerationService::new(
            generator,
            Arc::new(cache),
            Arc::new(RateLimiter::new(RateLimiterConfig::default())),
            RetryExecutor::new(RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_millis(1000),
                multiplier: 1.8,
                max_jitter: Duration::from_millis(50),
            }),
            SupervisionConfig::default(),
        );
        (service, dir)
    }

    fn fake() -> Arc<FakeGenerator> {
        Arc::new(FakeGenerator::new(FakeGeneratorConfig {
            latency: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(5),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_replayed_call_served_from_cache() {
        let generator = fake();
        let (service, _dir) = service(generator.clone());
        let request = GenerateRequest::new(ArtifactKind::CoverArt, "a fox", "b:cover_option:0".into());

        let first = service.generate(request.clone()).await.unwrap();
        let second = service.generate(request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(generator.call_count(ArtifactKind::CoverArt), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_calls_are_retried() {
        let generator = fake();
        generator.script_failures(
            "b:page_illustration:2",
            vec![
                GeneratorError::RateLimited { retry_after: None },
                GeneratorError::Http {
                    status: 503,
                    message: "busy".into(),
                    retry_after: None,
                },
            ],
        );
        let (service, _dir) = service(generator.clone());
        let request = GenerateRequest::new(
            ArtifactKind::PageIllustration,
            "scene",
            "b:page_illustration:2".into(),
        );

        assert!(service.generate(request).await.is_ok());
        assert_eq!(generator.call_count(ArtifactKind::PageIllustration), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_is_not_retried_or_cached() {
        let generator = fake();
        generator.script_failures(
            "b:outline:0",
            vec![GeneratorError::Rejected("content policy".into())],
        );
        let (service, _dir) = service(generator.clone());
        let request = GenerateRequest::new(ArtifactKind::Outline, "story", "b:outline:0".into());

        let err = service.generate(request.clone()).await.unwrap_err();
        assert!(matches!(err, RetryError::Terminal(GeneratorError::Rejected(_))));
        assert_eq!(generator.call_count(ArtifactKind::Outline), 1);

        // 失败不写缓存，下一次重新调用
        assert!(service.generate(request).await.is_ok());
        assert_eq!(generator.call_count(ArtifactKind::Outline), 2);
    }
}
