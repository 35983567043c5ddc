//! Book Handlers
//!
//! 写操作转换为命令投递给编排器，读操作任何时刻都可应答

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::application::{
    BookCommand, BookSummary, CancelBook, CreateBook, CreateBookResponse, GetFullState,
    GetProgress, GetWorkflowView, ListBooks, PauseBook, ResumeBook, SelectCharacter, SelectCover,
    SignalAck, SubmitCharacterSpec, SubmitPreferences,
};
use crate::domain::book::{BookCreationState, ProgressSnapshot, WorkflowView};
use crate::infrastructure::http::dto::{
    ApiResponse, BookIdRequest, CharacterSpecRequest, CreateBookRequest, PreferencesRequest,
    SelectCharacterRequest, SelectCoverRequest,
};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

async fn deliver<C: BookCommand>(state: &AppState, command: C) -> ApiResult<SignalAck> {
    let ack = state.signal_handler.handle(command).await?;
    Ok(Json(ApiResponse::success(ack)))
}

// ============================================================================
// Commands
// ============================================================================

pub async fn create_book(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBookRequest>,
) -> ApiResult<CreateBookResponse> {
    let result = state
        .create_book_handler
        .handle(CreateBook {
            book_id: req.book_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(result)))
}

pub async fn submit_character_spec(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CharacterSpecRequest>,
) -> ApiResult<SignalAck> {
    deliver(
        &state,
        SubmitCharacterSpec {
            book_id: req.book_id,
            spec: req.spec,
        },
    )
    .await
}

pub async fn select_character(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectCharacterRequest>,
) -> ApiResult<SignalAck> {
    deliver(
        &state,
        SelectCharacter {
            book_id: req.book_id,
            file_ref: req.file_ref,
        },
    )
    .await
}

pub async fn submit_preferences(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PreferencesRequest>,
) -> ApiResult<SignalAck> {
    deliver(
        &state,
        SubmitPreferences {
            book_id: req.book_id,
            preferences: req.preferences,
        },
    )
    .await
}

pub async fn select_cover(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectCoverRequest>,
) -> ApiResult<SignalAck> {
    deliver(
        &state,
        SelectCover {
            book_id: req.book_id,
            option_id: req.option_id,
        },
    )
    .await
}

pub async fn pause_book(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookIdRequest>,
) -> ApiResult<SignalAck> {
    deliver(&state, PauseBook { book_id: req.book_id }).await
}

pub async fn resume_book(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookIdRequest>,
) -> ApiResult<SignalAck> {
    deliver(&state, ResumeBook { book_id: req.book_id }).await
}

pub async fn cancel_book(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookIdRequest>,
) -> ApiResult<SignalAck> {
    deliver(&state, CancelBook { book_id: req.book_id }).await
}

// ============================================================================
// Queries
// ============================================================================

pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookIdRequest>,
) -> ApiResult<ProgressSnapshot> {
    let progress = state
        .progress_handler
        .handle(GetProgress {
            book_id: req.book_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(progress)))
}

pub async fn get_full_state(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookIdRequest>,
) -> ApiResult<BookCreationState> {
    let snapshot = state
        .full_state_handler
        .handle(GetFullState {
            book_id: req.book_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(Arc::unwrap_or_clone(snapshot))))
}

pub async fn get_workflow_view(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookIdRequest>,
) -> ApiResult<WorkflowView> {
    let view = state
        .view_handler
        .handle(GetWorkflowView {
            book_id: req.book_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(view)))
}

pub async fn list_books(State(state): State<Arc<AppState>>) -> ApiResult<Vec<BookSummary>> {
    let books = state.list_books_handler.handle(ListBooks).await?;
    Ok(Json(ApiResponse::success(books)))
}
