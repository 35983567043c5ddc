//! Book Queries

use crate::domain::book::BookId;

/// 进度摘要查询
#[derive(Debug, Clone, Copy)]
pub struct GetProgress {
    pub book_id: BookId,
}

/// 完整状态快照查询
#[derive(Debug, Clone, Copy)]
pub struct GetFullState {
    pub book_id: BookId,
}

/// 面向观察者的流程视图查询
#[derive(Debug, Clone, Copy)]
pub struct GetWorkflowView {
    pub book_id: BookId,
}

/// 列出所有绘本
#[derive(Debug, Clone, Copy)]
pub struct ListBooks;
