//! Renderer Port - 排版渲染服务抽象
//!
//! 输入页面 + 版式 + 插画，输出各渲染目标的产物路径；相同输入可安全重放

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use super::failure::{classify_status, FailureClass, Retryable};
use crate::domain::book::{BookId, PageLayout, PageSpec, RenderTarget};

/// Renderer 错误
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Renderer returned {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Render timeout")]
    Timeout,

    #[error("Illustration missing: {0}")]
    MissingInput(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Retryable for RenderError {
    fn classify(&self) -> FailureClass {
        match self {
            RenderError::Network(_) | RenderError::Timeout => FailureClass::Retryable,
            RenderError::Http { status, .. } => classify_status(*status),
            RenderError::MissingInput(_) | RenderError::InvalidResponse(_) => {
                FailureClass::Terminal
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RenderError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// 渲染请求
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub book_id: BookId,
    pub page: PageSpec,
    pub layout: PageLayout,
    /// 插画在存储中的相对路径
    pub illustration_path: String,
    pub targets: Vec<RenderTarget>,
}

/// Renderer Port
#[async_trait]
pub trait RendererPort: Send + Sync {
    /// 渲染单页，返回 target → 存储相对路径
    async fn render(
        &self,
        request: RenderRequest,
    ) -> Result<BTreeMap<RenderTarget, String>, RenderError>;
}
