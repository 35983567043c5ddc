//! Sled-based LRU Artifact Cache Implementation
//!
//! 生成结果按 `{幂等key}:{md5(prompt)}` 缓存，崩溃后重放同一调用直接命中

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::application::ports::{ArtifactCachePort, CacheError, CacheStats, GeneratedArtifact};

/// Sled 缓存配置
#[derive(Debug, Clone)]
pub struct SledCacheConfig {
    /// 数据库路径
    pub db_path: String,
    /// 最大缓存大小（字节）
    pub max_size_bytes: u64,
}

impl Default for SledCacheConfig {
    fn default() -> Self {
        Self {
            db_path: "data/cache.sled".to_string(),
            max_size_bytes: 2 * 1024 * 1024 * 1024, // 2GB
        }
    }
}

/// 内部缓存条目
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InternalCacheEntry {
    data: Vec<u8>,
    content_type: String,
    size_bytes: u64,
    last_accessed: i64,
    created_at: i64,
}

/// Sled 产物缓存
pub struct SledArtifactCache {
    db: Db,
    max_size_bytes: u64,
    current_size: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl SledArtifactCache {
    /// 创建新的缓存实例
    pub fn new(config: &SledCacheConfig) -> Result<Self, CacheError> {
        let db = sled::open(&config.db_path)
            .map_err(|e| CacheError::DatabaseError(e.to_string()))?;

        let current_size = Self::calculate_total_size(&db)?;

        tracing::info!(
            db_path = %config.db_path,
            max_size_bytes = config.max_size_bytes,
            current_size = current_size,
            "SledArtifactCache initialized"
        );

        Ok(Self {
            db,
            max_size_bytes: config.max_size_bytes,
            current_size: AtomicU64::new(current_size),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        })
    }

    /// 打开现有缓存
    pub fn open<P: AsRef<Path>>(path: P, max_size_bytes: u64) -> Result<Self, CacheError> {
        let config = SledCacheConfig {
            db_path: path.as_ref().to_string_lossy().to_string(),
            max_size_bytes,
        };
        Self::new(&config)
    }

    fn calculate_total_size(db: &Db) -> Result<u64, CacheError> {
        let mut total = 0u64;
        for item in db.scan_prefix("cache:") {
            let (_, value) = item.map_err(|e| CacheError::DatabaseError(e.to_string()))?;
            if let Ok(entry) = bincode::deserialize::<InternalCacheEntry>(&value) {
                total += entry.size_bytes;
            }
        }
        Ok(total)
    }

    /// LRU 淘汰一条，缓存为空时返回 false
    fn evict_lru(&self) -> Result<bool, CacheError> {
        let mut oldest: Option<(sled::IVec, InternalCacheEntry)> = None;

        for item in self.db.scan_prefix("cache:") {
            let (key, value) = item.map_err(|e| CacheError::DatabaseError(e.to_string()))?;
            if let Ok(entry) = bincode::deserialize::<InternalCacheEntry>(&value) {
                let is_older = oldest
                    .as_ref()
                    .map(|(_, e)| entry.last_accessed < e.last_accessed)
                    .unwrap_or(true);
                if is_older {
                    oldest = Some((key, entry));
                }
            }
        }

        let Some((key, entry)) = oldest else {
            return Ok(false);
        };

        self.db
            .remove(&key)
            .map_err(|e| CacheError::DatabaseError(e.to_string()))?;
        self.current_size.fetch_sub(
            entry.size_bytes.min(self.current_size.load(Ordering::Relaxed)),
            Ordering::Relaxed,
        );
        tracing::debug!(
            key = %String::from_utf8_lossy(&key),
            size_bytes = entry.size_bytes,
            "LRU evicted cache entry"
        );

        Ok(true)
    }

    /// 刷新数据库
    pub fn flush(&self) -> Result<(), CacheError> {
        self.db
            .flush()
            .map_err(|e| CacheError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactCachePort for SledArtifactCache {
    async fn get(&self, cache_key: &str) -> Result<Option<GeneratedArtifact>, CacheError> {
        let key = format!("cache:{}", cache_key);

        match self.db.get(&key) {
            Ok(Some(data)) => {
                let mut entry: InternalCacheEntry = bincode::deserialize(&data)
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?;

                // 更新 last_accessed (LRU touch)
                entry.last_accessed = Utc::now().timestamp_millis();
                let entry_bytes = bincode::serialize(&entry)
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?;
                self.db
                    .insert(&key, entry_bytes)
                    .map_err(|e| CacheError::DatabaseError(e.to_string()))?;

                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Ok(Some(GeneratedArtifact {
                    data: entry.data,
                    content_type: entry.content_type,
                }))
            }
            Ok(None) => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(CacheError::DatabaseError(e.to_string())),
        }
    }

    async fn put(&self, cache_key: &str, artifact: &GeneratedArtifact) -> Result<(), CacheError> {
        let size = artifact.data.len() as u64;

        // 淘汰以腾出空间
        while self.current_size.load(Ordering::Relaxed) + size > self.max_size_bytes {
            if !self.evict_lru()? {
                break;
            }
        }

        let now = Utc::now().timestamp_millis();
        let entry = InternalCacheEntry {
            data: artifact.data.clone(),
            content_type: artifact.content_type.clone(),
            size_bytes: size,
            last_accessed: now,
            created_at: now,
        };
        let entry_bytes =
            bincode::serialize(&entry).map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let previous = self
            .db
            .insert(format!("cache:{}", cache_key), entry_bytes)
            .map_err(|e| CacheError::DatabaseError(e.to_string()))?;
        if let Some(previous) = previous {
            if let Ok(old) = bincode::deserialize::<InternalCacheEntry>(&previous) {
                self.current_size.fetch_sub(
                    old.size_bytes.min(self.current_size.load(Ordering::Relaxed)),
                    Ordering::Relaxed,
                );
            }
        }
        self.current_size.fetch_add(size, Ordering::Relaxed);

        tracing::debug!(cache_key = %cache_key, size_bytes = size, "Artifact cached");

        Ok(())
    }

    async fn remove(&self, cache_key: &str) -> Result<(), CacheError> {
        let key = format!("cache:{}", cache_key);

        if let Some(data) = self
            .db
            .remove(&key)
            .map_err(|e| CacheError::DatabaseError(e.to_string()))?
        {
            if let Ok(entry) = bincode::deserialize::<InternalCacheEntry>(&data) {
                self.current_size.fetch_sub(
                    entry.size_bytes.min(self.current_size.load(Ordering::Relaxed)),
                    Ordering::Relaxed,
                );
            }
        }

        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.db.scan_prefix("cache:").count(),
            total_size_bytes: self.current_size.load(Ordering::Relaxed),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn artifact(bytes: &[u8]) -> GeneratedArtifact {
        GeneratedArtifact {
            data: bytes.to_vec(),
            content_type: "image/png".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cache_put_get() {
        let dir = tempdir().unwrap();
        let cache = SledArtifactCache::open(dir.path().join("test.sled"), 1024 * 1024).unwrap();

        cache.put("b:outline:0:abc", &artifact(&[1, 2, 3])).await.unwrap();
        // 覆盖写不重复计算大小
        cache.put("b:outline:0:abc", &artifact(&[1, 2, 3])).await.unwrap();

        let hit = cache.get("b:outline:0:abc").await.unwrap();
        assert_eq!(hit, Some(artifact(&[1, 2, 3])));
        assert!(cache.get("missing").await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_size_bytes, 3);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);

        cache.remove("b:outline:0:abc").await.unwrap();
        assert_eq!(cache.stats().await.total_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sled");
        {
            let cache = SledArtifactCache::open(&path, 1024).unwrap();
            cache.put("k", &artifact(b"png")).await.unwrap();
            cache.flush().unwrap();
        }
        let cache = SledArtifactCache::open(&path, 1024).unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(artifact(b"png")));
        assert_eq!(cache.stats().await.total_size_bytes, 3);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let dir = tempdir().unwrap();
        let cache = SledArtifactCache::open(dir.path().join("test.sled"), 10).unwrap();

        cache.put("a", &artifact(&[0; 6])).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.put("b", &artifact(&[0; 6])).await.unwrap();

        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_some());
    }
}
