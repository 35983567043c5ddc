//! Book Workflow Port - 编排器的命令投递与快照读取
//!
//! 每本书一个单写者 actor；命令异步投递，查询读取最近一次发布的快照

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::book::{BookCreationState, BookId, BookPreferences, CharacterSpec};

/// 投递给运行中流程的信号
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowSignal {
    SubmitCharacterSpec(CharacterSpec),
    SelectCharacter(String),
    SubmitPreferences(BookPreferences),
    SelectCover(String),
    Pause,
    Resume,
    Cancel,
}

impl WorkflowSignal {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowSignal::SubmitCharacterSpec(_) => "submit_character_spec",
            WorkflowSignal::SelectCharacter(_) => "select_character",
            WorkflowSignal::SubmitPreferences(_) => "submit_preferences",
            WorkflowSignal::SelectCover(_) => "select_cover",
            WorkflowSignal::Pause => "pause",
            WorkflowSignal::Resume => "resume",
            WorkflowSignal::Cancel => "cancel",
        }
    }
}

/// Workflow 错误
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Book not found: {0}")]
    NotFound(BookId),

    #[error("Book already exists: {0}")]
    AlreadyExists(BookId),

    #[error("Book already finished: {0}")]
    Finished(BookId),

    #[error("Workflow channel closed: {0}")]
    ChannelClosed(BookId),

    #[error("Repository error: {0}")]
    Repository(String),
}

/// Book Workflow Port
#[async_trait]
pub trait BookWorkflowPort: Send + Sync {
    /// 为新书启动编排流程
    async fn start(&self, book_id: BookId) -> Result<Arc<BookCreationState>, WorkflowError>;

    /// 从持久化快照恢复流程
    async fn restore(&self, state: BookCreationState) -> Result<(), WorkflowError>;

    /// 投递命令（按投递顺序应用）
    async fn signal(&self, book_id: BookId, signal: WorkflowSignal) -> Result<(), WorkflowError>;

    /// 读取最近一次发布的状态快照
    fn snapshot(&self, book_id: BookId) -> Option<Arc<BookCreationState>>;

    /// 当前持有的全部绘本
    fn book_ids(&self) -> Vec<BookId>;
}
