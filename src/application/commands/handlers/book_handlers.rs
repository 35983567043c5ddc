//! Book Command Handlers

use serde::Serialize;
use std::sync::Arc;

use crate::application::commands::{BookCommand, CreateBook};
use crate::application::error::ApplicationError;
use crate::application::ports::{
    BookStateRepositoryPort, BookWorkflowPort, WorkflowError, WorkflowSignal,
};
use crate::domain::book::{BookCreationState, BookId, BookStatus};

// ============================================================================
// CreateBook
// ============================================================================

/// 创建绘本响应
#[derive(Debug, Clone, Serialize)]
pub struct CreateBookResponse {
    pub book_id: BookId,
    pub status: BookStatus,
    pub stage: String,
}

impl From<&BookCreationState> for CreateBookResponse {
    fn from(state: &BookCreationState) -> Self {
        Self {
            book_id: state.book_id(),
            status: state.status(),
            stage: state.stage().as_str().to_string(),
        }
    }
}

/// CreateBook Handler
///
/// 同一 ID 重复创建返回已有绘本
pub struct CreateBookHandler {
    workflow: Arc<dyn BookWorkflowPort>,
    book_repo: Arc<dyn BookStateRepositoryPort>,
}

impl CreateBookHandler {
    pub fn new(
        workflow: Arc<dyn BookWorkflowPort>,
        book_repo: Arc<dyn BookStateRepositoryPort>,
    ) -> Self {
        Self {
            workflow,
            book_repo,
        }
    }

    pub async fn handle(&self, command: CreateBook) -> Result<CreateBookResponse, ApplicationError> {
        let book_id = command.book_id.unwrap_or_default();

        if let Some(existing) = self.workflow.snapshot(book_id) {
            return Ok(CreateBookResponse::from(existing.as_ref()));
        }
        if let Some(existing) = self.book_repo.find_by_id(book_id).await? {
            return Ok(CreateBookResponse::from(&existing));
        }

        let state = match self.workflow.start(book_id).await {
            Ok(state) => state,
            // 并发创建同一 ID
            Err(WorkflowError::AlreadyExists(_)) => self
                .workflow
                .snapshot(book_id)
                .ok_or_else(|| ApplicationError::not_found("Book", book_id))?,
            Err(e) => return Err(e.into()),
        };

        tracing::info!(book_id = %book_id, "Book created");

        Ok(CreateBookResponse::from(state.as_ref()))
    }
}

// ============================================================================
// Signal commands
// ============================================================================

/// 命令投递结果
#[derive(Debug, Clone, Serialize)]
pub struct SignalAck {
    pub book_id: BookId,
    pub signal: &'static str,
    /// false 表示绘本已结束，命令被忽略
    pub delivered: bool,
}

/// 投递命令给运行中的编排器
///
/// 绘本不在内存中时回退到持久化快照：终态直接忽略，未完成则先恢复再投递
pub struct SignalBookHandler {
    workflow: Arc<dyn BookWorkflowPort>,
    book_repo: Arc<dyn BookStateRepositoryPort>,
}

impl SignalBookHandler {
    pub fn new(
        workflow: Arc<dyn BookWorkflowPort>,
        book_repo: Arc<dyn BookStateRepositoryPort>,
    ) -> Self {
        Self {
            workflow,
            book_repo,
        }
    }

    pub async fn handle<C: BookCommand>(&self, command: C) -> Result<SignalAck, ApplicationError> {
        command.validate()?;

        let book_id = command.book_id();
        let signal = command.into_signal();
        let name = signal.name();

        let delivered = match self.workflow.signal(book_id, signal.clone()).await {
            Ok(()) => true,
            Err(WorkflowError::Finished(_)) => false,
            Err(WorkflowError::NotFound(_)) => self.restore_and_deliver(book_id, signal).await?,
            Err(e) => return Err(e.into()),
        };

        if delivered {
            tracing::debug!(book_id = %book_id, signal = name, "Signal delivered");
        } else {
            tracing::info!(book_id = %book_id, signal = name, "Book finished, signal ignored");
        }

        Ok(SignalAck {
            book_id,
            signal: name,
            delivered,
        })
    }

    async fn restore_and_deliver(
        &self,
        book_id: BookId,
        signal: WorkflowSignal,
    ) -> Result<bool, ApplicationError> {
        let state = self
            .book_repo
            .find_by_id(book_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Book", book_id))?;

        if state.is_terminal() {
            return Ok(false);
        }

        match self.workflow.restore(state).await {
            Ok(()) | Err(WorkflowError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match self.workflow.signal(book_id, signal).await {
            Ok(()) => Ok(true),
            Err(WorkflowError::Finished(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
