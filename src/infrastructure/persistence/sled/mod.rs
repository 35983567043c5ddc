//! Sled Persistence - 生成结果幂等缓存

mod artifact_cache;

pub use artifact_cache::{SledArtifactCache, SledCacheConfig};
