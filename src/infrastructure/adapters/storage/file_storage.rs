//! File Storage - 文件系统产物存储实现
//!
//! 实现 ArtifactStoragePort trait；写入先落临时文件再原子重命名

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::application::ports::{ArtifactStoragePort, StorageError};

/// 文件系统产物存储
pub struct FileArtifactStorage {
    /// 存储根目录
    base_dir: PathBuf,
}

impl FileArtifactStorage {
    /// 创建新的文件存储
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_dir = base_dir.as_ref().to_path_buf();

        // 确保目录存在
        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))?;

        Ok(Self { base_dir })
    }

    /// key 转换为绝对路径，拒绝逃逸根目录的 key
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }
}

#[async_trait]
impl ArtifactStoragePort for FileArtifactStorage {
    async fn put(&self, key: &str, data: &[u8]) -> Result<String, StorageError> {
        let path = self.resolve(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::IoError(e.to_string()))?;
        }

        // 同目录临时文件，rename 保证读者只会看到完整内容
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        fs::write(&tmp_path, data)
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::IoError(e.to_string()));
        }

        tracing::debug!(key = %key, size = data.len(), "Artifact stored");

        Ok(key.to_string())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;

        if !path.exists() {
            return Err(StorageError::FileNotFound(key.to_string()));
        }

        fs::read(&path)
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))
    }

    async fn exists(&self, key: &str) -> bool {
        match self.resolve(key) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
