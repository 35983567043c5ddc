//! Artifact Cache Port - 生成结果幂等缓存
//!
//! 崩溃后重放同一次生成调用时直接返回缓存结果，具体实现使用 Sled

use async_trait::async_trait;
use thiserror::Error;

use super::generator::GeneratedArtifact;

/// Cache 错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// 缓存统计信息
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// Artifact Cache Port
#[async_trait]
pub trait ArtifactCachePort: Send + Sync {
    async fn get(&self, cache_key: &str) -> Result<Option<GeneratedArtifact>, CacheError>;

    async fn put(&self, cache_key: &str, artifact: &GeneratedArtifact) -> Result<(), CacheError>;

    async fn remove(&self, cache_key: &str) -> Result<(), CacheError>;

    async fn stats(&self) -> CacheStats;
}

/// 生成缓存 key
///
/// 使用 幂等 key + md5(prompt)，提示词变化时不会命中旧结果
pub fn generate_cache_key(idempotency_key: &str, prompt: &str) -> String {
    let digest = md5::compute(prompt.as_bytes());
    format!("{}:{:x}", idempotency_key, digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_depends_on_prompt() {
        let a = generate_cache_key("book:outline:0", "a fox");
        let b = generate_cache_key("book:outline:0", "a fox");
        let c = generate_cache_key("book:outline:0", "a bear");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("book:outline:0:"));
    }
}
