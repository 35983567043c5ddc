//! Book Context - 绘本创作限界上下文
//!
//! 职责:
//! - BookCreationState 聚合（编排器的持久状态）
//! - 单页任务状态与进度日志
//! - 各阶段产出（角色、画风、封面、大纲、版式、清单）
//! - 查询投影

mod aggregate;
mod entities;
mod errors;
mod projections;
mod value_objects;

pub use aggregate::{BookCreationState, CommandOutcome, PageMilestone};
pub use entities::{
    CharacterOption, CoverOption, LayoutPlan, Manifest, ManifestPage, PageLayout, PageSpec,
    PageTaskState, ProgressEvent, StyleProfile, ILLUSTRATION_KEY, PREVIEW_KEY,
};
pub use errors::BookError;
pub use projections::{PageView, ProgressSnapshot, WorkflowView};
pub use value_objects::{
    AccessibilityFlags, AgeBand, BookId, BookPreferences, BookStatus, CharacterSpec, PagePhase,
    RenderTarget, WorkflowStage, MAX_PAGE_COUNT,
};
