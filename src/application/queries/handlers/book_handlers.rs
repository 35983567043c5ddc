//! Book Query Handlers

use std::sync::Arc;

use crate::application::error::ApplicationError;
use crate::application::ports::{BookStateRepositoryPort, BookSummary, BookWorkflowPort};
use crate::application::queries::{GetFullState, GetProgress, GetWorkflowView, ListBooks};
use crate::domain::book::{BookCreationState, BookId, ProgressSnapshot, WorkflowView};

/// 读取状态：优先取运行中流程的快照，否则回退到持久化存储
#[derive(Clone)]
struct StateReader {
    workflow: Arc<dyn BookWorkflowPort>,
    book_repo: Arc<dyn BookStateRepositoryPort>,
}

impl StateReader {
    async fn load(&self, book_id: BookId) -> Result<Arc<BookCreationState>, ApplicationError> {
        if let Some(state) = self.workflow.snapshot(book_id) {
            return Ok(state);
        }
        self.book_repo
            .find_by_id(book_id)
            .await?
            .map(Arc::new)
            .ok_or_else(|| ApplicationError::not_found("Book", book_id))
    }
}

/// GetProgress Handler
pub struct GetProgressHandler {
    reader: StateReader,
}

impl GetProgressHandler {
    pub fn new(
        workflow: Arc<dyn BookWorkflowPort>,
        book_repo: Arc<dyn BookStateRepositoryPort>,
    ) -> Self {
        Self {
            reader: StateReader {
                workflow,
                book_repo,
            },
        }
    }

    pub async fn handle(&self, query: GetProgress) -> Result<ProgressSnapshot, ApplicationError> {
        let state = self.reader.load(query.book_id).await?;
        Ok(state.progress())
    }
}

/// GetFullState Handler
pub struct GetFullStateHandler {
    reader: StateReader,
}

impl GetFullStateHandler {
    pub fn new(
        workflow: Arc<dyn BookWorkflowPort>,
        book_repo: Arc<dyn BookStateRepositoryPort>,
    ) -> Self {
        Self {
            reader: StateReader {
                workflow,
                book_repo,
            },
        }
    }

    pub async fn handle(
        &self,
        query: GetFullState,
    ) -> Result<Arc<BookCreationState>, ApplicationError> {
        self.reader.load(query.book_id).await
    }
}

/// GetWorkflowView Handler
///
/// 产物路径改写为 `files_path` 下的公开 URL
pub struct GetWorkflowViewHandler {
    reader: StateReader,
    files_path: String,
}

impl GetWorkflowViewHandler {
    pub fn new(
        workflow: Arc<dyn BookWorkflowPort>,
        book_repo: Arc<dyn BookStateRepositoryPort>,
        files_path: impl Into<String>,
    ) -> Self {
        Self {
            reader: StateReader {
                workflow,
                book_repo,
            },
            files_path: files_path.into(),
        }
    }

    pub async fn handle(&self, query: GetWorkflowView) -> Result<WorkflowView, ApplicationError> {
        let state = self.reader.load(query.book_id).await?;
        Ok(state.workflow_view(&self.files_path))
    }
}

/// ListBooks Handler
pub struct ListBooksHandler {
    book_repo: Arc<dyn BookStateRepositoryPort>,
}

impl ListBooksHandler {
    pub fn new(book_repo: Arc<dyn BookStateRepositoryPort>) -> Self {
        Self { book_repo }
    }

    pub async fn handle(&self, _query: ListBooks) -> Result<Vec<BookSummary>, ApplicationError> {
        Ok(self.book_repo.list().await?)
    }
}
