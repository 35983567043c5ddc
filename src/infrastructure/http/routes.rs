//! HTTP Routes
//!
//! API Endpoints:
//! - /api/ping                    GET   健康检查
//! - /api/book/create             POST  创建绘本（启动编排器）
//! - /api/book/character_spec     POST  提交角色设定
//! - /api/book/select_character   POST  选择角色形象
//! - /api/book/preferences        POST  提交绘本偏好
//! - /api/book/select_cover       POST  选择封面
//! - /api/book/pause              POST  暂停页面准入
//! - /api/book/resume             POST  恢复
//! - /api/book/cancel             POST  取消
//! - /api/book/progress           POST  进度摘要
//! - /api/book/state              POST  完整状态快照
//! - /api/book/view               POST  流程视图（公开 URL）
//! - /api/book/list               GET   列出所有绘本
//! - /ws/book/{id}                WS    绘本事件流

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

/// 创建所有路由
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", api_routes())
        .route("/ws/book/:book_id", get(handlers::book_websocket_handler))
}

/// API 路由
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .nest("/book", book_routes())
}

/// Book 路由
fn book_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create", post(handlers::create_book))
        .route("/character_spec", post(handlers::submit_character_spec))
        .route("/select_character", post(handlers::select_character))
        .route("/preferences", post(handlers::submit_preferences))
        .route("/select_cover", post(handlers::select_cover))
        .route("/pause", post(handlers::pause_book))
        .route("/resume", post(handlers::resume_book))
        .route("/cancel", post(handlers::cancel_book))
        .route("/progress", post(handlers::get_progress))
        .route("/state", post(handlers::get_full_state))
        .route("/view", post(handlers::get_workflow_view))
        .route("/list", get(handlers::list_books))
}
