//! Data Transfer Objects

use serde::{Deserialize, Serialize};

use crate::domain::book::{BookId, BookPreferences, CharacterSpec};

// ============================================================================
// 统一响应结构
// ============================================================================

/// 统一 API 响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub errno: i32,
    pub error: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 成功响应
    pub fn success(data: T) -> Self {
        Self {
            errno: 0,
            error: String::new(),
            data: Some(data),
        }
    }
}

// ============================================================================
// Book DTOs
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateBookRequest {
    /// 客户端指定的 ID（可选）
    #[serde(default)]
    pub book_id: Option<BookId>,
}

/// 只携带 book_id 的请求（pause/resume/cancel 及查询）
#[derive(Debug, Deserialize)]
pub struct BookIdRequest {
    pub book_id: BookId,
}

#[derive(Debug, Deserialize)]
pub struct CharacterSpecRequest {
    pub book_id: BookId,
    pub spec: CharacterSpec,
}

#[derive(Debug, Deserialize)]
pub struct SelectCharacterRequest {
    pub book_id: BookId,
    pub file_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    pub book_id: BookId,
    pub preferences: BookPreferences,
}

#[derive(Debug, Deserialize)]
pub struct SelectCoverRequest {
    pub book_id: BookId,
    pub option_id: String,
}
