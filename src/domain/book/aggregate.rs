//! Book Context - Aggregate Root

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    BookError, BookId, BookPreferences, BookStatus, CharacterOption, CharacterSpec, CoverOption,
    LayoutPlan, PagePhase, PageSpec, PageTaskState, ProgressEvent, StyleProfile, WorkflowStage,
    ILLUSTRATION_KEY,
};

/// 命令应用结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// 状态已更新
    Applied,
    /// 与已有值相同，无变化
    Duplicate,
    /// 与当前状态冲突，静默拒绝（状态不变）
    Rejected(String),
}

impl CommandOutcome {
    fn rejected(reason: impl Into<String>) -> Self {
        CommandOutcome::Rejected(reason.into())
    }
}

/// 页面里程碑
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageMilestone {
    Illustrating,
    IllustrationReady {
        illustration: String,
        preview: Option<String>,
    },
    Rendering,
    RenderReady {
        target: super::RenderTarget,
        path: String,
    },
}

/// BookCreationState 聚合根（编排器的持久记忆）
///
/// 不变量:
/// - status 单调迁移，仅 running ⇄ paused 可往返
/// - completed / failed / cancelled 为终态，之后任何字段都不可修改
/// - characterSpec / bookPreferences 等只能设置一次
/// - pages 一旦生成长度固定；progressLog 只追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookCreationState {
    book_id: BookId,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status: BookStatus,
    stage: WorkflowStage,
    covers_enabled: bool,
    character_spec: Option<CharacterSpec>,
    character_options: Vec<CharacterOption>,
    chosen_character_file: Option<String>,
    style_profile: Option<StyleProfile>,
    book_preferences: Option<BookPreferences>,
    cover_options: Vec<CoverOption>,
    selected_cover: Option<String>,
    covers_skipped: bool,
    title: Option<String>,
    pages: Vec<PageSpec>,
    layout: Option<LayoutPlan>,
    page_tasks: BTreeMap<u32, PageTaskState>,
    manifest_path: Option<String>,
    progress_log: Vec<ProgressEvent>,
    errors: Vec<String>,
    cancel_requested: bool,
    failure: Option<String>,
}

impl BookCreationState {
    /// 创建新绘本流程
    pub fn new(book_id: BookId, covers_enabled: bool) -> Self {
        let now = Utc::now();
        Self {
            book_id,
            started_at: now,
            updated_at: now,
            status: BookStatus::Running,
            stage: WorkflowStage::Init,
            covers_enabled,
            character_spec: None,
            character_options: Vec::new(),
            chosen_character_file: None,
            style_profile: None,
            book_preferences: None,
            cover_options: Vec::new(),
            selected_cover: None,
            covers_skipped: false,
            title: None,
            pages: Vec::new(),
            layout: None,
            page_tasks: BTreeMap::new(),
            manifest_path: None,
            progress_log: Vec::new(),
            errors: Vec::new(),
            cancel_requested: false,
            failure: None,
        }
    }

    fn ensure_mutable(&self) -> Result<(), BookError> {
        if self.status.is_terminal() {
            return Err(BookError::Terminal(self.book_id));
        }
        Ok(())
    }

    fn record(&mut self, step: &str, percent: u8, message: Option<String>, page_id: Option<u32>) {
        self.progress_log.push(ProgressEvent {
            step: step.to_string(),
            percent: percent.min(100),
            message,
            page_id,
        });
        self.updated_at = Utc::now();
    }

    // ========== Commands ==========

    pub fn submit_character_spec(&mut self, spec: CharacterSpec) -> Result<CommandOutcome, BookError> {
        self.ensure_mutable()?;
        if let Some(existing) = &self.character_spec {
            return Ok(if existing == &spec {
                CommandOutcome::Duplicate
            } else {
                CommandOutcome::rejected("character spec already set")
            });
        }
        let message = format!("character {}", spec.name);
        self.character_spec = Some(spec);
        self.record("character_spec_set", 100, Some(message), None);
        Ok(CommandOutcome::Applied)
    }

    pub fn select_character(&mut self, file_ref: String) -> Result<CommandOutcome, BookError> {
        self.ensure_mutable()?;
        if let Some(existing) = &self.chosen_character_file {
            return Ok(if existing == &file_ref {
                CommandOutcome::Duplicate
            } else {
                CommandOutcome::rejected("character already selected")
            });
        }
        if self.character_spec.is_none() {
            return Ok(CommandOutcome::rejected("character spec not submitted yet"));
        }
        // 候选生成之前没有可选的文件
        if self.character_options.is_empty() {
            return Ok(CommandOutcome::rejected("character options not ready yet"));
        }
        if !self.character_options.iter().any(|o| o.file_ref == file_ref) {
            return Ok(CommandOutcome::rejected("unknown character option"));
        }
        self.chosen_character_file = Some(file_ref);
        self.record("character_selected", 100, None, None);
        Ok(CommandOutcome::Applied)
    }

    pub fn submit_preferences(&mut self, prefs: BookPreferences) -> Result<CommandOutcome, BookError> {
        self.ensure_mutable()?;
        if let Some(existing) = &self.book_preferences {
            return Ok(if existing == &prefs {
                CommandOutcome::Duplicate
            } else {
                CommandOutcome::rejected("book preferences already set")
            });
        }
        let message = format!("{} pages", prefs.page_count);
        self.book_preferences = Some(prefs);
        self.record("book_prefs_set", 100, Some(message), None);
        Ok(CommandOutcome::Applied)
    }

    pub fn select_cover(&mut self, option_id: String) -> Result<CommandOutcome, BookError> {
        self.ensure_mutable()?;
        if let Some(existing) = &self.selected_cover {
            return Ok(if existing == &option_id {
                CommandOutcome::Duplicate
            } else {
                CommandOutcome::rejected("cover already selected")
            });
        }
        if !self.cover_options.iter().any(|o| o.id == option_id) {
            return Ok(CommandOutcome::rejected("unknown cover option"));
        }
        self.selected_cover = Some(option_id);
        self.record("cover_selected", 100, None, None);
        Ok(CommandOutcome::Applied)
    }

    pub fn pause(&mut self) -> Result<CommandOutcome, BookError> {
        self.ensure_mutable()?;
        if self.status == BookStatus::Paused {
            return Ok(CommandOutcome::Duplicate);
        }
        self.status = BookStatus::Paused;
        self.updated_at = Utc::now();
        Ok(CommandOutcome::Applied)
    }

    pub fn resume(&mut self) -> Result<CommandOutcome, BookError> {
        self.ensure_mutable()?;
        if self.status == BookStatus::Running {
            return Ok(CommandOutcome::Duplicate);
        }
        self.status = BookStatus::Running;
        self.updated_at = Utc::now();
        Ok(CommandOutcome::Applied)
    }

    /// 记录取消请求；真正进入 cancelled 由编排器在检查点完成
    pub fn request_cancel(&mut self) -> Result<CommandOutcome, BookError> {
        self.ensure_mutable()?;
        if self.cancel_requested {
            return Ok(CommandOutcome::Duplicate);
        }
        self.cancel_requested = true;
        self.updated_at = Utc::now();
        Ok(CommandOutcome::Applied)
    }

    // ========== Stage outputs ==========

    pub fn enter_stage(&mut self, stage: WorkflowStage) -> Result<(), BookError> {
        self.ensure_mutable()?;
        if stage.is_terminal() {
            return Err(BookError::InvalidInput(format!(
                "terminal stage {} must be reached through its transition",
                stage.as_str()
            )));
        }
        self.stage = stage;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_character_options(&mut self, options: Vec<CharacterOption>) -> Result<(), BookError> {
        self.ensure_mutable()?;
        let message = format!("{} options", options.len());
        self.character_options = options;
        self.record("character_options_ready", 100, Some(message), None);
        Ok(())
    }

    pub fn set_style_profile(&mut self, profile: StyleProfile) -> Result<(), BookError> {
        self.ensure_mutable()?;
        self.style_profile = Some(profile);
        self.record("style_profile_ready", 100, None, None);
        Ok(())
    }

    pub fn set_cover_options(&mut self, options: Vec<CoverOption>) -> Result<(), BookError> {
        self.ensure_mutable()?;
        let message = format!("{} options", options.len());
        self.cover_options = options;
        self.record("cover_options_ready", 100, Some(message), None);
        Ok(())
    }

    pub fn skip_covers(&mut self) -> Result<(), BookError> {
        self.ensure_mutable()?;
        if self.covers_skipped {
            return Ok(());
        }
        self.covers_skipped = true;
        self.record("covers_skipped", 100, None, None);
        Ok(())
    }

    /// 写入大纲并为每一页创建任务状态
    pub fn set_outline(&mut self, title: String, pages: Vec<PageSpec>) -> Result<(), BookError> {
        self.ensure_mutable()?;
        if !self.pages.is_empty() {
            return Err(BookError::PagesAlreadySet(self.book_id));
        }
        if pages.is_empty() {
            return Err(BookError::InvalidInput("outline has no pages".to_string()));
        }
        self.page_tasks = pages
            .iter()
            .map(|p| (p.index, PageTaskState::queued(p.index)))
            .collect();
        let message = format!("{} pages", pages.len());
        self.title = Some(title);
        self.pages = pages;
        self.record("pages_json_complete", 100, Some(message), None);
        Ok(())
    }

    pub fn set_layout(&mut self, layout: LayoutPlan) -> Result<(), BookError> {
        self.ensure_mutable()?;
        self.layout = Some(layout);
        self.record("layout_complete", 100, None, None);
        Ok(())
    }

    /// 应用单页里程碑
    ///
    /// 返回 `Ok(false)` 表示该里程碑与当前阶段不单调，被忽略
    pub fn apply_page_milestone(
        &mut self,
        page_index: u32,
        milestone: PageMilestone,
    ) -> Result<bool, BookError> {
        self.ensure_mutable()?;
        let task = self
            .page_tasks
            .get_mut(&page_index)
            .ok_or(BookError::PageNotFound(page_index))?;

        let next = match &milestone {
            PageMilestone::Illustrating => PagePhase::Illustrating,
            PageMilestone::IllustrationReady { .. } => PagePhase::IllustrationReady,
            PageMilestone::Rendering => PagePhase::Rendering,
            PageMilestone::RenderReady { target, .. } => PagePhase::RenderReady(*target),
        };
        if !task.phase.can_advance_to(next) {
            return Ok(false);
        }
        if let PagePhase::RenderReady(target) = next {
            // 渲染就绪必须以插画完成为前提，且每个目标只记录一次
            if task.illustration_path().is_none() || task.render_path(target).is_some() {
                return Ok(false);
            }
        }
        task.phase = next;

        match milestone {
            PageMilestone::Illustrating => {
                self.record("page_started", 10, None, Some(page_index));
            }
            PageMilestone::Rendering => {
                self.updated_at = Utc::now();
            }
            PageMilestone::IllustrationReady {
                illustration,
                preview,
            } => {
                task.artifact_paths
                    .insert(ILLUSTRATION_KEY.to_string(), illustration);
                if let Some(preview) = preview {
                    task.artifact_paths
                        .insert(super::PREVIEW_KEY.to_string(), preview);
                }
                self.record("page_illustration_ready", 50, None, Some(page_index));
            }
            PageMilestone::RenderReady { target, path } => {
                task.artifact_paths.insert(target.as_str().to_string(), path);
                self.record(
                    "page_render_ready",
                    80,
                    Some(target.as_str().to_string()),
                    Some(page_index),
                );
            }
        }
        Ok(true)
    }

    pub fn complete_page(&mut self, page_index: u32) -> Result<bool, BookError> {
        self.ensure_mutable()?;
        let task = self
            .page_tasks
            .get_mut(&page_index)
            .ok_or(BookError::PageNotFound(page_index))?;
        if !task.phase.can_advance_to(PagePhase::Done) {
            return Ok(false);
        }
        task.phase = PagePhase::Done;
        self.record("page_done", 100, None, Some(page_index));
        Ok(true)
    }

    /// 单页失败：记录错误，但不影响兄弟页面和整体状态
    pub fn fail_page(&mut self, page_index: u32, error: String) -> Result<bool, BookError> {
        self.ensure_mutable()?;
        let task = self
            .page_tasks
            .get_mut(&page_index)
            .ok_or(BookError::PageNotFound(page_index))?;
        if !task.phase.can_advance_to(PagePhase::Failed) {
            return Ok(false);
        }
        task.phase = PagePhase::Failed;
        task.last_error = Some(error.clone());
        self.errors.push(format!("page {}: {}", page_index, error));
        self.record("page_failed", 100, Some(error), Some(page_index));
        Ok(true)
    }

    pub fn set_manifest(&mut self, path: String) -> Result<(), BookError> {
        self.ensure_mutable()?;
        self.manifest_path = Some(path);
        self.record("manifest_written", 100, None, None);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), BookError> {
        self.ensure_mutable()?;
        self.record("done", 100, None, None);
        self.stage = WorkflowStage::Completed;
        self.status = BookStatus::Completed;
        Ok(())
    }

    /// 全局失败，保留已生成的产物
    pub fn fail(&mut self, error: String) -> Result<(), BookError> {
        self.ensure_mutable()?;
        self.record("failed", 100, Some(error.clone()), None);
        self.failure = Some(error);
        self.stage = WorkflowStage::Failed;
        self.status = BookStatus::Failed;
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), BookError> {
        self.ensure_mutable()?;
        self.record("cancelled", 100, None, None);
        self.stage = WorkflowStage::Cancelled;
        self.status = BookStatus::Cancelled;
        Ok(())
    }

    // ========== Getters ==========

    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn status(&self) -> BookStatus {
        self.status
    }

    pub fn stage(&self) -> WorkflowStage {
        self.stage
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_paused(&self) -> bool {
        self.status == BookStatus::Paused
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn covers_enabled(&self) -> bool {
        self.covers_enabled
    }

    pub fn covers_skipped(&self) -> bool {
        self.covers_skipped
    }

    pub fn character_spec(&self) -> Option<&CharacterSpec> {
        self.character_spec.as_ref()
    }

    pub fn character_options(&self) -> &[CharacterOption] {
        &self.character_options
    }

    pub fn chosen_character_file(&self) -> Option<&str> {
        self.chosen_character_file.as_deref()
    }

    pub fn style_profile(&self) -> Option<&StyleProfile> {
        self.style_profile.as_ref()
    }

    pub fn book_preferences(&self) -> Option<&BookPreferences> {
        self.book_preferences.as_ref()
    }

    pub fn cover_options(&self) -> &[CoverOption] {
        &self.cover_options
    }

    pub fn selected_cover(&self) -> Option<&str> {
        self.selected_cover.as_deref()
    }

    /// 已选封面的存储路径
    pub fn selected_cover_path(&self) -> Option<&str> {
        let id = self.selected_cover.as_deref()?;
        self.cover_options
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.path.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn pages(&self) -> &[PageSpec] {
        &self.pages
    }

    pub fn layout(&self) -> Option<&LayoutPlan> {
        self.layout.as_ref()
    }

    pub fn page_tasks(&self) -> &BTreeMap<u32, PageTaskState> {
        &self.page_tasks
    }

    pub fn page_task(&self, page_index: u32) -> Option<&PageTaskState> {
        self.page_tasks.get(&page_index)
    }

    pub fn manifest_path(&self) -> Option<&str> {
        self.manifest_path.as_deref()
    }

    pub fn progress_log(&self) -> &[ProgressEvent] {
        &self.progress_log
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}
