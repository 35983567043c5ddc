//! Generator Port - AI 内容生成服务抽象
//!
//! 文本与图像模型都通过同一个 `generate` 调用访问，具体实现在 infrastructure/adapters 层

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use super::failure::{classify_status, FailureClass, Retryable};

/// Generator 错误
#[derive(Debug, Clone, Error)]
pub enum GeneratorError {
    #[error("Rate limited by generator")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Generator returned {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Generator stalled: no heartbeat for {0:?}")]
    Stalled(Duration),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Retryable for GeneratorError {
    fn classify(&self) -> FailureClass {
        match self {
            GeneratorError::RateLimited { .. }
            | GeneratorError::Network(_)
            | GeneratorError::Timeout
            | GeneratorError::Stalled(_) => FailureClass::Retryable,
            GeneratorError::Http { status, .. } => classify_status(*status),
            GeneratorError::Rejected(_) | GeneratorError::InvalidResponse(_) => {
                FailureClass::Terminal
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GeneratorError::RateLimited { retry_after }
            | GeneratorError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// 生成产物类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    CharacterSheet,
    StyleAnalysis,
    CoverArt,
    Outline,
    Layout,
    PageIllustration,
    PagePreview,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::CharacterSheet => "character_sheet",
            ArtifactKind::StyleAnalysis => "style_analysis",
            ArtifactKind::CoverArt => "cover_art",
            ArtifactKind::Outline => "outline",
            ArtifactKind::Layout => "layout",
            ArtifactKind::PageIllustration => "page_illustration",
            ArtifactKind::PagePreview => "page_preview",
        }
    }

    /// 图像类产物（其余为 JSON 文本）
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            ArtifactKind::CharacterSheet
                | ArtifactKind::CoverArt
                | ArtifactKind::PageIllustration
                | ArtifactKind::PagePreview
        )
    }
}

/// 生成请求
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub kind: ArtifactKind,
    pub prompt: String,
    /// 附加参数（风格、参考图、尺寸等），原样透传给生成服务
    pub params: serde_json::Value,
    /// 稳定的幂等 key：`{book_id}:{step}:{index}`
    pub idempotency_key: String,
}

impl GenerateRequest {
    pub fn new(kind: ArtifactKind, prompt: impl Into<String>, idempotency_key: String) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            params: serde_json::Value::Null,
            idempotency_key,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// 生成结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl GeneratedArtifact {
    /// 将 JSON 类产物解析为结构化输出
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, GeneratorError> {
        serde_json::from_slice(&self.data)
            .map_err(|e| GeneratorError::InvalidResponse(format!("malformed JSON: {}", e)))
    }

    /// 按 content type 推断文件扩展名
    pub fn extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "application/json" => "json",
            _ => "png",
        }
    }
}

/// 心跳句柄
///
/// 生成服务在请求挂起期间调用 `beat()`，监督者据此区分"慢但健康"与"卡死"
#[derive(Debug, Clone)]
pub struct Heartbeat {
    sender: Arc<watch::Sender<u64>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn beat(&self) {
        self.sender.send_modify(|count| *count = count.wrapping_add(1));
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.sender.subscribe()
    }

    pub fn count(&self) -> u64 {
        *self.sender.borrow()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Generator Port
///
/// 可能很慢（数十秒）、会被限流、也会失败的外部生成服务
#[async_trait]
pub trait GeneratorPort: Send + Sync {
    async fn generate(
        &self,
        request: GenerateRequest,
        heartbeat: &Heartbeat,
    ) -> Result<GeneratedArtifact, GeneratorError>;

    /// 检查生成服务是否可用
    async fn health_check(&self) -> bool {
        true
    }
}
