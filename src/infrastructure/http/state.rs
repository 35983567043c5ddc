//! Application State
//!
//! 包含所有 Command/Query Handlers 的应用状态

use std::sync::Arc;

use crate::application::{
    // Command handlers
    CreateBookHandler, SignalBookHandler,
    // Query handlers
    GetFullStateHandler, GetProgressHandler, GetWorkflowViewHandler, ListBooksHandler,
    // Ports
    BookStateRepositoryPort, BookWorkflowPort,
};
use crate::infrastructure::events::EventPublisher;

/// 应用状态
pub struct AppState {
    // ========== Ports ==========
    pub workflow: Arc<dyn BookWorkflowPort>,
    pub book_repo: Arc<dyn BookStateRepositoryPort>,
    pub event_publisher: Arc<EventPublisher>,

    // ========== Command Handlers ==========
    pub create_book_handler: CreateBookHandler,
    pub signal_handler: SignalBookHandler,

    // ========== Query Handlers ==========
    pub progress_handler: GetProgressHandler,
    pub full_state_handler: GetFullStateHandler,
    pub view_handler: GetWorkflowViewHandler,
    pub list_books_handler: ListBooksHandler,
}

impl AppState {
    /// 创建应用状态
    ///
    /// `files_path` 为产物静态服务的 URL 前缀，用于改写视图中的路径
    pub fn new(
        workflow: Arc<dyn BookWorkflowPort>,
        book_repo: Arc<dyn BookStateRepositoryPort>,
        event_publisher: Arc<EventPublisher>,
        files_path: &str,
    ) -> Self {
        Self {
            // Ports
            workflow: workflow.clone(),
            book_repo: book_repo.clone(),
            event_publisher,

            // Command handlers
            create_book_handler: CreateBookHandler::new(workflow.clone(), book_repo.clone()),
            signal_handler: SignalBookHandler::new(workflow.clone(), book_repo.clone()),

            // Query handlers
            progress_handler: GetProgressHandler::new(workflow.clone(), book_repo.clone()),
            full_state_handler: GetFullStateHandler::new(workflow.clone(), book_repo.clone()),
            view_handler: GetWorkflowViewHandler::new(workflow, book_repo.clone(), files_path),
            list_books_handler: ListBooksHandler::new(book_repo),
        }
    }
}
