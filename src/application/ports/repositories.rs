//! Repository Ports - 出站端口
//!
//! 绘本流程状态的持久化抽象，具体实现在 infrastructure 层（SQLite）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::{FailureClass, Retryable};
use crate::domain::book::{BookCreationState, BookId, BookStatus};

/// Repository 错误
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Retryable for RepositoryError {
    /// 数据库错误（锁、IO）可重试，其余重试也不会成功
    fn classify(&self) -> FailureClass {
        match self {
            RepositoryError::DatabaseError(_) => FailureClass::Retryable,
            RepositoryError::NotFound(_) | RepositoryError::SerializationError(_) => {
                FailureClass::Terminal
            }
        }
    }
}

/// 绘本列表项
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub book_id: BookId,
    pub status: BookStatus,
    pub stage: String,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Book State Repository Port
///
/// 每次状态变更后整体 upsert 快照
#[async_trait]
pub trait BookStateRepositoryPort: Send + Sync {
    async fn save(&self, state: &BookCreationState) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: BookId) -> Result<Option<BookCreationState>, RepositoryError>;

    /// 所有未进入终态的绘本（重启后恢复）
    async fn find_unfinished(&self) -> Result<Vec<BookCreationState>, RepositoryError>;

    /// 按开始时间倒序列出
    async fn list(&self) -> Result<Vec<BookSummary>, RepositoryError>;
}
