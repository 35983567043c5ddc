//! SQLite Book State Repository
//!
//! 状态整体序列化为 JSON 快照；status / stage / title 冗余成列便于列表与恢复查询

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::DbPool;
use crate::application::ports::{BookStateRepositoryPort, BookSummary, RepositoryError};
use crate::domain::book::{BookCreationState, BookId, BookStatus};

/// SQLite Book Repository
pub struct SqliteBookRepository {
    pool: DbPool,
}

impl SqliteBookRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct BookRow {
    snapshot: String,
}

impl TryFrom<BookRow> for BookCreationState {
    type Error = RepositoryError;

    fn try_from(row: BookRow) -> Result<Self, Self::Error> {
        serde_json::from_str(&row.snapshot)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))
    }
}

#[derive(FromRow)]
struct BookSummaryRow {
    id: String,
    status: String,
    stage: String,
    title: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<BookSummaryRow> for BookSummary {
    type Error = RepositoryError;

    fn try_from(row: BookSummaryRow) -> Result<Self, Self::Error> {
        Ok(BookSummary {
            book_id: BookId::from_uuid(
                Uuid::parse_str(&row.id)
                    .map_err(|e| RepositoryError::SerializationError(e.to_string()))?,
            ),
            status: BookStatus::from_str(&row.status).ok_or_else(|| {
                RepositoryError::SerializationError(format!("unknown status: {}", row.status))
            })?,
            stage: row.stage,
            title: row.title,
            started_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map_err(|e| RepositoryError::SerializationError(e.to_string()))?
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                .map_err(|e| RepositoryError::SerializationError(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl BookStateRepositoryPort for SqliteBookRepository {
    async fn save(&self, state: &BookCreationState) -> Result<(), RepositoryError> {
        let snapshot = serde_json::to_string(state)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO books (id, status, stage, title, snapshot, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                stage = excluded.stage,
                title = excluded.title,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.book_id().to_string())
        .bind(state.status().as_str())
        .bind(state.stage().as_str())
        .bind(
            state
                .title()
                .map(str::to_string)
                .or_else(|| state.book_preferences().map(|p| p.title.clone())),
        )
        .bind(snapshot)
        .bind(state.started_at().to_rfc3339())
        .bind(state.updated_at().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: BookId) -> Result<Option<BookCreationState>, RepositoryError> {
        let row: Option<BookRow> = sqlx::query_as("SELECT snapshot FROM books WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        row.map(BookCreationState::try_from).transpose()
    }

    async fn find_unfinished(&self) -> Result<Vec<BookCreationState>, RepositoryError> {
        let rows: Vec<BookRow> = sqlx::query_as(
            "SELECT snapshot FROM books WHERE status IN ('running', 'paused') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(BookCreationState::try_from).collect()
    }

    async fn list(&self) -> Result<Vec<BookSummary>, RepositoryError> {
        let rows: Vec<BookSummaryRow> = sqlx::query_as(
            "SELECT id, status, stage, title, created_at, updated_at FROM books ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(BookSummary::try_from).collect()
    }
}
