//! Worker Layer - 绘本编排
//!
//! - BookWorker: 每本书一个单写者 actor（编排状态机）
//! - PageScheduler: 页面流水线的有界准入
//! - PagePipeline: 单页插画 → 渲染
//! - StageCoordinators: 角色/画风/封面/大纲/版式/清单各阶段

mod book_worker;
mod page_pipeline;
mod scheduler;
mod stages;

pub use book_worker::{BookHandle, BookWorker};
pub use page_pipeline::{PageJob, PagePipeline, PageSignal};
pub use scheduler::{Finished, PageScheduler};
pub use stages::{StageCoordinators, StageError};

use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::{ArtifactStoragePort, BookStateRepositoryPort, RendererPort};
use crate::domain::book::RenderTarget;
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::resilience::{GenerationService, RetryPolicy};

/// 编排参数
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// 每本书同时在飞的页面流水线数
    pub page_concurrency: usize,
    pub covers_enabled: bool,
    pub cover_options: usize,
    pub character_options: usize,
    pub preview_enabled: bool,
    pub render_targets: Vec<RenderTarget>,
    /// 单次渲染调用上限
    pub render_timeout: Duration,
    pub render_retry: RetryPolicy,
    /// 状态快照落盘失败时的重试
    pub persist_retry: RetryPolicy,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            page_concurrency: 2,
            covers_enabled: true,
            cover_options: 3,
            character_options: 3,
            preview_enabled: true,
            render_targets: vec![RenderTarget::Screen, RenderTarget::Print],
            render_timeout: Duration::from_secs(120),
            render_retry: RetryPolicy::default(),
            persist_retry: RetryPolicy::default(),
        }
    }
}

/// Worker 依赖
#[derive(Clone)]
pub struct WorkerContext {
    pub generation: Arc<GenerationService>,
    pub renderer: Arc<dyn RendererPort>,
    pub storage: Arc<dyn ArtifactStoragePort>,
    pub repository: Arc<dyn BookStateRepositoryPort>,
    pub publisher: Arc<EventPublisher>,
    pub settings: WorkflowSettings,
}
