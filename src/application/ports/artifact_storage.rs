//! Artifact Storage Port - 产物文件存储
//!
//! 所有写入幂等：同一 key 重复写入得到相同结果

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::book::{BookId, RenderTarget};

/// 存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// 存储 key 约定（相对于存储根目录）
pub mod keys {
    use super::*;

    pub fn character_option(book_id: BookId, index: usize, ext: &str) -> String {
        format!("books/{}/characters/{}.{}", book_id, index, ext)
    }

    pub fn cover_option(book_id: BookId, index: usize, ext: &str) -> String {
        format!("books/{}/covers/{}.{}", book_id, index, ext)
    }

    pub fn illustration(book_id: BookId, page_index: u32, ext: &str) -> String {
        format!("books/{}/pages/{}/illustration.{}", book_id, page_index, ext)
    }

    pub fn preview(book_id: BookId, page_index: u32, ext: &str) -> String {
        format!("books/{}/pages/{}/preview.{}", book_id, page_index, ext)
    }

    pub fn rendered(book_id: BookId, page_index: u32, target: RenderTarget) -> String {
        format!("books/{}/pages/{}/{}.png", book_id, page_index, target)
    }

    pub fn manifest(book_id: BookId) -> String {
        format!("books/{}/manifest.json", book_id)
    }
}

/// Artifact Storage Port
#[async_trait]
pub trait ArtifactStoragePort: Send + Sync {
    /// 写入产物（先写临时文件再原子重命名），返回 key
    async fn put(&self, key: &str, data: &[u8]) -> Result<String, StorageError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> bool;
}
