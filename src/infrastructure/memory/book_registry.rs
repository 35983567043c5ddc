//! In-Memory Book Registry
//!
//! 实现 BookWorkflowPort：每本书一个 BookWorker，注册表只持有其句柄

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::application::ports::{BookWorkflowPort, WorkflowError, WorkflowSignal};
use crate::domain::book::{BookCreationState, BookId};
use crate::infrastructure::worker::{BookHandle, BookWorker, WorkerContext};

/// 内存绘本注册表
pub struct InMemoryBookRegistry {
    ctx: WorkerContext,
    books: DashMap<BookId, BookHandle>,
}

impl InMemoryBookRegistry {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            books: DashMap::new(),
        }
    }

    /// 订阅某本书的快照变化
    pub fn watch(&self, book_id: BookId) -> Option<watch::Receiver<Arc<BookCreationState>>> {
        self.books.get(&book_id).map(|h| h.snapshot.clone())
    }

    /// 启动时恢复所有未结束的绘本，返回恢复数量
    pub async fn restore_unfinished(&self) -> Result<usize, WorkflowError> {
        let unfinished = self
            .ctx
            .repository
            .find_unfinished()
            .await
            .map_err(|e| WorkflowError::Repository(e.to_string()))?;

        let mut restored = 0;
        for state in unfinished {
            let book_id = state.book_id();
            match self.restore(state).await {
                Ok(()) => restored += 1,
                Err(e) => tracing::warn!(book_id = %book_id, error = %e, "Failed to restore book"),
            }
        }

        tracing::info!(restored, "Unfinished books restored");
        Ok(restored)
    }

    fn spawn(&self, state: BookCreationState) -> Result<Arc<BookCreationState>, WorkflowError> {
        let book_id = state.book_id();
        match self.books.entry(book_id) {
            Entry::Occupied(_) => Err(WorkflowError::AlreadyExists(book_id)),
            Entry::Vacant(slot) => {
                let handle = BookWorker::spawn(state, &self.ctx);
                let snapshot = handle.snapshot.borrow().clone();
                slot.insert(handle);
                Ok(snapshot)
            }
        }
    }
}

#[async_trait]
impl BookWorkflowPort for InMemoryBookRegistry {
    async fn start(&self, book_id: BookId) -> Result<Arc<BookCreationState>, WorkflowError> {
        let state = BookCreationState::new(book_id, self.ctx.settings.covers_enabled);
        let snapshot = self.spawn(state)?;
        tracing::info!(book_id = %book_id, "Book workflow started");
        Ok(snapshot)
    }

    async fn restore(&self, state: BookCreationState) -> Result<(), WorkflowError> {
        let book_id = state.book_id();
        if state.is_terminal() {
            return Err(WorkflowError::Finished(book_id));
        }
        self.spawn(state)?;
        tracing::info!(book_id = %book_id, "Book workflow restored");
        Ok(())
    }

    async fn signal(&self, book_id: BookId, signal: WorkflowSignal) -> Result<(), WorkflowError> {
        let handle = self
            .books
            .get(&book_id)
            .map(|h| h.clone())
            .ok_or(WorkflowError::NotFound(book_id))?;

        if handle.snapshot.borrow().is_terminal() {
            return Err(WorkflowError::Finished(book_id));
        }

        tracing::debug!(book_id = %book_id, signal = signal.name(), "Delivering signal");
        handle
            .commands
            .send(signal)
            .map_err(|_| WorkflowError::ChannelClosed(book_id))
    }

    fn snapshot(&self, book_id: BookId) -> Option<Arc<BookCreationState>> {
        self.books.get(&book_id).map(|h| h.snapshot.borrow().clone())
    }

    fn book_ids(&self) -> Vec<BookId> {
        self.books.iter().map(|entry| *entry.key()).collect()
    }
}
