//! Book Worker - 每本书一个单写者 actor
//!
//! 独占 `BookCreationState`：从通道接收命令，按依赖顺序驱动各阶段，
//! 扇出页面流水线并合并其里程碑。每次状态变更先持久化，成功后才发布快照并推送事件；
//! 持久化重试耗尽时流程以失败结束。
//! 从持久化快照启动时，已有产出的阶段与已结束的页面都会被跳过

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::page_pipeline::{PageJob, PagePipeline, PageSignal};
use super::scheduler::PageScheduler;
use super::stages::{StageCoordinators, StageError};
use super::WorkerContext;
use crate::application::ports::{BookStateRepositoryPort, WorkflowSignal};
use crate::domain::book::{
    BookCreationState, BookError, BookStatus, CharacterSpec, CommandOutcome, PageLayout,
    WorkflowStage,
};
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::resilience::RetryExecutor;

/// 运行中流程的句柄
#[derive(Clone)]
pub struct BookHandle {
    pub commands: mpsc::UnboundedSender<WorkflowSignal>,
    pub snapshot: watch::Receiver<Arc<BookCreationState>>,
}

/// 流程被打断的原因
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Failed(String),
    /// 命令通道关闭（进程退出），保留持久化状态等待下次恢复
    Shutdown,
}

impl From<StageError> for Interrupt {
    fn from(e: StageError) -> Self {
        Interrupt::Failed(e.to_string())
    }
}

impl From<BookError> for Interrupt {
    fn from(e: BookError) -> Self {
        Interrupt::Failed(e.to_string())
    }
}

/// Book Worker
pub struct BookWorker {
    state: BookCreationState,
    commands: mpsc::UnboundedReceiver<WorkflowSignal>,
    commands_open: bool,
    snapshot: watch::Sender<Arc<BookCreationState>>,
    repository: Arc<dyn BookStateRepositoryPort>,
    persist_retry: RetryExecutor,
    publisher: Arc<EventPublisher>,
    stages: Arc<StageCoordinators>,
    pipeline: Arc<PagePipeline>,
    page_concurrency: usize,
    /// 已推送的进度事件数
    published_events: usize,
    published_status: Option<(BookStatus, WorkflowStage)>,
}

impl BookWorker {
    /// 启动 worker，返回命令与快照句柄
    pub fn spawn(state: BookCreationState, ctx: &WorkerContext) -> BookHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(state.clone()));

        let worker = Self {
            // 已推送过的事件不重复推送
            published_events: state.progress_log().len(),
            state,
            commands: command_rx,
            commands_open: true,
            snapshot: snapshot_tx,
            repository: ctx.repository.clone(),
            persist_retry: RetryExecutor::new(ctx.settings.persist_retry.clone()),
            publisher: ctx.publisher.clone(),
            stages: Arc::new(StageCoordinators::new(ctx)),
            pipeline: Arc::new(PagePipeline::new(ctx)),
            page_concurrency: ctx.settings.page_concurrency,
            published_status: None,
        };
        tokio::spawn(worker.run());

        BookHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self) {
        let book_id = self.state.book_id();
        tracing::info!(
            book_id = %book_id,
            stage = self.state.stage().as_str(),
            status = self.state.status().as_str(),
            "Book worker started"
        );

        let result = match self.commit().await {
            Ok(()) if self.state.is_terminal() => return,
            Ok(()) => self.drive_stages().await,
            Err(interrupt) => Err(interrupt),
        };
        let finish = match result {
            Ok(()) => self.state.complete(),
            Err(Interrupt::Cancelled) => self.state.mark_cancelled(),
            Err(Interrupt::Failed(error)) => {
                tracing::error!(book_id = %book_id, error = %error, "Book creation failed");
                self.state.fail(error)
            }
            Err(Interrupt::Shutdown) => {
                tracing::info!(book_id = %book_id, "Command channel closed, worker stopping");
                return;
            }
        };
        if let Err(e) = finish {
            tracing::warn!(book_id = %book_id, error = %e, "Terminal transition rejected");
        }
        self.commit_terminal().await;
        self.publisher.close(book_id);

        tracing::info!(
            book_id = %book_id,
            status = self.state.status().as_str(),
            errors = self.state.errors().len(),
            "Book worker finished"
        );
    }

    // ========== State plumbing ==========

    /// 持久化 → 发布快照 → 推送新事件；观察者看到的状态均已落盘
    ///
    /// 重试耗尽后不发布，返回的中断使流程以失败结束
    async fn commit(&mut self) -> Result<(), Interrupt> {
        if let Err(error) = save(&self.persist_retry, self.repository.as_ref(), &self.state).await {
            tracing::error!(book_id = %self.state.book_id(), error = %error, "Failed to persist book state");
            return Err(Interrupt::Failed(format!(
                "failed to persist book state: {}",
                error
            )));
        }
        self.publish();
        Ok(())
    }

    /// 终态总会发布；未落盘时重启后从上一次持久化的快照恢复
    async fn commit_terminal(&mut self) {
        if let Err(error) = save(&self.persist_retry, self.repository.as_ref(), &self.state).await {
            tracing::error!(
                book_id = %self.state.book_id(),
                status = self.state.status().as_str(),
                error = %error,
                "Terminal state not persisted"
            );
        }
        self.publish();
    }

    fn publish(&mut self) {
        let book_id = self.state.book_id();
        self.snapshot.send_replace(Arc::new(self.state.clone()));

        for event in &self.state.progress_log()[self.published_events..] {
            self.publisher.publish_progress(book_id, event);
        }
        self.published_events = self.state.progress_log().len();

        let status = (self.state.status(), self.state.stage());
        if self.published_status != Some(status) {
            self.publisher.publish_status(
                book_id,
                status.0,
                status.1.as_str(),
                self.state.failure(),
            );
            self.published_status = Some(status);
        }
    }

    async fn apply_signal(&mut self, signal: WorkflowSignal) -> Result<(), Interrupt> {
        let book_id = self.state.book_id();
        let name = signal.name();
        let outcome = match signal {
            WorkflowSignal::SubmitCharacterSpec(spec) => self.state.submit_character_spec(spec),
            WorkflowSignal::SelectCharacter(file_ref) => self.state.select_character(file_ref),
            WorkflowSignal::SubmitPreferences(prefs) => self.state.submit_preferences(prefs),
            WorkflowSignal::SelectCover(option_id) => self.state.select_cover(option_id),
            WorkflowSignal::Pause => self.state.pause(),
            WorkflowSignal::Resume => self.state.resume(),
            WorkflowSignal::Cancel => self.state.request_cancel(),
        };

        match outcome {
            Ok(CommandOutcome::Applied) => {
                tracing::info!(book_id = %book_id, signal = name, "Signal applied");
                return self.commit().await;
            }
            Ok(CommandOutcome::Duplicate) => {
                tracing::debug!(book_id = %book_id, signal = name, "Duplicate signal ignored");
            }
            Ok(CommandOutcome::Rejected(reason)) => {
                tracing::warn!(book_id = %book_id, signal = name, reason = %reason, "Signal rejected");
            }
            Err(e) => {
                tracing::debug!(book_id = %book_id, signal = name, error = %e, "Signal ignored");
            }
        }
        Ok(())
    }

    async fn enter(&mut self, stage: WorkflowStage) -> Result<(), Interrupt> {
        if self.state.stage() != stage {
            self.state.enter_stage(stage)?;
            self.commit().await?;
        }
        Ok(())
    }

    /// 取消检查点
    fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.state.cancel_requested() {
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }

    /// 阻塞直到谓词成立；期间逐条应用命令，不轮询
    async fn await_until<P>(&mut self, predicate: P) -> Result<(), Interrupt>
    where
        P: Fn(&BookCreationState) -> bool,
    {
        loop {
            if predicate(&self.state) {
                return Ok(());
            }
            self.checkpoint()?;
            match self.commands.recv().await {
                Some(signal) => self.apply_signal(signal).await?,
                None => return Err(Interrupt::Shutdown),
            }
        }
    }

    /// 执行阶段调用，期间继续接收命令；调用本身不被取消打断
    async fn drive<T, F>(&mut self, stage: F) -> Result<T, Interrupt>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        tokio::pin!(stage);
        loop {
            tokio::select! {
                biased;
                result = &mut stage => return Ok(result?),
                signal = self.commands.recv(), if self.commands_open => match signal {
                    Some(signal) => self.apply_signal(signal).await?,
                    None => self.commands_open = false,
                },
            }
        }
    }

    // ========== Stages ==========

    async fn drive_stages(&mut self) -> Result<(), Interrupt> {
        let book_id = self.state.book_id();

        // 1. 角色设定
        if self.state.stage() == WorkflowStage::Init {
            self.enter(WorkflowStage::AwaitingCharacterSpec).await?;
        }
        self.await_until(|s| s.character_spec().is_some()).await?;

        // 2. 候选角色 → 等待选择
        self.checkpoint()?;
        self.enter_forward(WorkflowStage::AwaitingCharacterSelection).await?;
        if self.state.character_options().is_empty() && self.state.chosen_character_file().is_none() {
            let stages = self.stages.clone();
            let spec = spec_of(&self.state)?;
            let options = self
                .drive(async move { stages.character_options(book_id, spec).await })
                .await?;
            self.state.set_character_options(options)?;
            self.commit().await?;
        }
        self.await_until(|s| s.chosen_character_file().is_some()).await?;
        let character_file = self.state.chosen_character_file().map(str::to_string);

        // 3. 画风分析 → 等待偏好
        self.checkpoint()?;
        self.enter_forward(WorkflowStage::AwaitingPreferences).await?;
        if self.state.style_profile().is_none() {
            let stages = self.stages.clone();
            let spec = spec_of(&self.state)?;
            let file = character_file.clone().unwrap_or_default();
            let profile = self
                .drive(async move { stages.style_analysis(book_id, spec, file).await })
                .await?;
            self.state.set_style_profile(profile)?;
            self.commit().await?;
        }
        self.await_until(|s| s.book_preferences().is_some()).await?;
        let preferences = self
            .state
            .book_preferences()
            .cloned()
            .ok_or_else(|| Interrupt::Failed("book preferences missing".to_string()))?;
        let style = self.state.style_profile().cloned();

        // 4. 封面（可配置跳过）
        self.checkpoint()?;
        if self.state.covers_enabled() && !self.state.covers_skipped() {
            self.enter_forward(WorkflowStage::GeneratingCover).await?;
            if self.state.cover_options().is_empty() {
                let stages = self.stages.clone();
                let (prefs, style, file) =
                    (preferences.clone(), style.clone(), character_file.clone());
                let options = self
                    .drive(async move { stages.cover_options(book_id, prefs, style, file).await })
                    .await?;
                self.state.set_cover_options(options)?;
                self.commit().await?;
            }
            self.await_until(|s| s.selected_cover().is_some()).await?;
        } else if !self.state.covers_skipped() {
            self.state.skip_covers()?;
            self.commit().await?;
        }

        // 5. 大纲
        self.checkpoint()?;
        if self.state.pages().is_empty() {
            self.enter_forward(WorkflowStage::GeneratingOutline).await?;
            let stages = self.stages.clone();
            let spec = spec_of(&self.state)?;
            let (prefs, style) = (preferences.clone(), style.clone());
            let (title, pages) = self
                .drive(async move { stages.outline(book_id, spec, prefs, style).await })
                .await?;
            self.state.set_outline(title, pages)?;
            self.commit().await?;
        }

        // 6. 版式
        self.checkpoint()?;
        if self.state.layout().is_none() {
            self.enter_forward(WorkflowStage::GeneratingLayout).await?;
            let stages = self.stages.clone();
            let pages = self.state.pages().to_vec();
            let prefs = preferences.clone();
            let layout = self
                .drive(async move { stages.layout(book_id, pages, prefs).await })
                .await?;
            self.state.set_layout(layout)?;
            self.commit().await?;
        }

        // 7. 页面
        self.checkpoint()?;
        self.enter_forward(WorkflowStage::RenderingPages).await?;
        self.render_pages().await?;

        // 8. 清单
        self.checkpoint()?;
        self.enter_forward(WorkflowStage::WritingManifest).await?;
        if self.state.manifest_path().is_none() {
            let stages = self.stages.clone();
            let snapshot = Arc::new(self.state.clone());
            let path = self
                .drive(async move { stages.write_manifest(snapshot).await })
                .await?;
            self.state.set_manifest(path)?;
            self.commit().await?;
        }

        Ok(())
    }

    /// 只向前进入阶段（恢复时不回退）
    async fn enter_forward(&mut self, stage: WorkflowStage) -> Result<(), Interrupt> {
        if self.state.stage() < stage {
            self.enter(stage).await?;
        }
        Ok(())
    }

    // ========== Page fan-out ==========

    fn page_job(&self, page_index: u32) -> Option<PageJob> {
        let page = self.state.pages().iter().find(|p| p.index == page_index)?;
        let layout = self
            .state
            .layout()
            .and_then(|l| l.for_page(page_index))
            .cloned()
            .unwrap_or_else(|| PageLayout {
                page_index,
                template: "full_bleed".to_string(),
                text_position: "bottom".to_string(),
                font_scale: 1.0,
                palette: "standard".to_string(),
            });
        Some(PageJob {
            book_id: self.state.book_id(),
            page: page.clone(),
            layout,
            task: self.state.page_task(page_index)?.clone(),
            character_file: self.state.chosen_character_file().map(str::to_string),
            style: self.state.style_profile().map(|s| s.summary.clone()),
        })
    }

    async fn apply_milestone(&mut self, (page_index, milestone): PageSignal) -> Result<(), Interrupt> {
        match self.state.apply_page_milestone(page_index, milestone) {
            Ok(true) => return self.commit().await,
            Ok(false) => {
                tracing::debug!(book_id = %self.state.book_id(), page_index, "Out-of-order milestone ignored");
            }
            Err(e) => {
                tracing::warn!(book_id = %self.state.book_id(), page_index, error = %e, "Milestone rejected");
            }
        }
        Ok(())
    }

    async fn settle_page(&mut self, page_index: u32, result: Result<(), String>) -> Result<(), Interrupt> {
        let book_id = self.state.book_id();
        let applied = match result {
            Ok(()) => self.state.complete_page(page_index),
            Err(error) => {
                tracing::warn!(book_id = %book_id, page_index, error = %error, "Page failed");
                self.state.fail_page(page_index, error)
            }
        };
        match applied {
            Ok(true) => return self.commit().await,
            Ok(false) => {}
            Err(e) => tracing::warn!(book_id = %book_id, page_index, error = %e, "Page settle rejected"),
        }
        Ok(())
    }

    /// 有界扇出：暂停只阻止新准入，取消丢弃未准入页面，两者都等待在飞页面结束
    async fn render_pages(&mut self) -> Result<(), Interrupt> {
        let book_id = self.state.book_id();
        let unsettled: Vec<u32> = self
            .state
            .pages()
            .iter()
            .map(|p| p.index)
            .filter(|i| {
                self.state
                    .page_task(*i)
                    .map(|t| !t.phase.is_settled())
                    .unwrap_or(false)
            })
            .collect();

        let (milestone_tx, mut milestone_rx) = mpsc::unbounded_channel::<PageSignal>();
        let mut scheduler: PageScheduler<Result<(), String>> =
            PageScheduler::new(self.page_concurrency, unsettled);

        tracing::info!(
            book_id = %book_id,
            pending = scheduler.pending(),
            concurrency = self.page_concurrency,
            "Rendering pages"
        );

        loop {
            // 准入边界即检查点
            if self.state.cancel_requested() {
                let dropped = scheduler.clear_pending();
                if dropped > 0 {
                    tracing::info!(book_id = %book_id, dropped, "Cancel requested, pending pages dropped");
                }
            }
            while !self.state.is_paused() && scheduler.can_admit() {
                let pipeline = self.pipeline.clone();
                let tx = milestone_tx.clone();
                let admitted = scheduler.admit_next(|page_index| {
                    let job = self.page_job(page_index);
                    async move {
                        match job {
                            Some(job) => pipeline.run(job, tx).await,
                            None => Err(format!("page {} has no task", page_index)),
                        }
                    }
                });
                if let Some(page_index) = admitted {
                    tracing::debug!(book_id = %book_id, page_index, in_flight = scheduler.in_flight(), "Page admitted");
                }
            }

            if scheduler.is_finished() {
                break;
            }
            if scheduler.in_flight() == 0 && !self.commands_open {
                // 暂停中且不会再有命令
                return Err(Interrupt::Shutdown);
            }

            tokio::select! {
                biased;
                Some(signal) = milestone_rx.recv() => self.apply_milestone(signal).await?,
                Some(done) = scheduler.join_next(), if scheduler.in_flight() > 0 => {
                    // 先合并该页尚未处理的里程碑
                    while let Ok(signal) = milestone_rx.try_recv() {
                        self.apply_milestone(signal).await?;
                    }
                    let result = done.result.and_then(|r| r);
                    self.settle_page(done.page_index, result).await?;
                }
                signal = self.commands.recv(), if self.commands_open => match signal {
                    Some(signal) => self.apply_signal(signal).await?,
                    None => self.commands_open = false,
                },
            }
        }

        tracing::info!(
            book_id = %book_id,
            admitted = scheduler.admitted(),
            peak_in_flight = scheduler.peak_in_flight(),
            "Page fan-out drained"
        );
        self.checkpoint()
    }
}

async fn save(
    retry: &RetryExecutor,
    repository: &dyn BookStateRepositoryPort,
    state: &BookCreationState,
) -> Result<(), String> {
    retry
        .run("save_book_state", move |_| repository.save(state))
        .await
        .map_err(|e| e.to_string())
}

fn spec_of(state: &BookCreationState) -> Result<CharacterSpec, Interrupt> {
    state
        .character_spec()
        .cloned()
        .ok_or_else(|| Interrupt::Failed("character spec missing".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{keys, ArtifactKind, GeneratorError, RenderError};
    use crate::domain::book::{BookId, Manifest, PagePhase};
    use crate::application::ports::{BookSummary, RepositoryError};
    use crate::infrastructure::events::BookEvent;
    use crate::infrastructure::worker::testing::{
        character, fixture, preferences, settings, Fixture, MemoryBookRepository,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn start(fx: &Fixture) -> BookHandle {
        let state = BookCreationState::new(BookId::new(), fx.ctx.settings.covers_enabled);
        BookWorker::spawn(state, &fx.ctx)
    }

    async fn wait_for<F>(handle: &BookHandle, predicate: F) -> Arc<BookCreationState>
    where
        F: Fn(&BookCreationState) -> bool,
    {
        let mut rx = handle.snapshot.clone();
        let state = tokio::time::timeout(WAIT, rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for book state")
            .expect("worker dropped");
        state.clone()
    }

    /// 可切换为写入失败的仓储
    #[derive(Default)]
    struct BrokenDiskRepository {
        inner: MemoryBookRepository,
        broken: AtomicBool,
        failed_saves: AtomicUsize,
    }

    #[async_trait]
    impl BookStateRepositoryPort for BrokenDiskRepository {
        async fn save(&self, state: &BookCreationState) -> Result<(), RepositoryError> {
            if self.broken.load(Ordering::SeqCst) {
                self.failed_saves.fetch_add(1, Ordering::SeqCst);
                return Err(RepositoryError::DatabaseError("disk full".to_string()));
            }
            self.inner.save(state).await
        }

        async fn find_by_id(
            &self,
            id: BookId,
        ) -> Result<Option<BookCreationState>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn find_unfinished(&self) -> Result<Vec<BookCreationState>, RepositoryError> {
            self.inner.find_unfinished().await
        }

        async fn list(&self) -> Result<Vec<BookSummary>, RepositoryError> {
            self.inner.list().await
        }
    }

    fn send(handle: &BookHandle, signal: WorkflowSignal) {
        handle.commands.send(signal).unwrap();
    }

    /// 提交角色 → 选择第一个候选 → 提交偏好
    async fn drive_to_pages(handle: &BookHandle, page_count: u32) {
        send(handle, WorkflowSignal::SubmitCharacterSpec(character()));
        let state = wait_for(handle, |s| !s.character_options().is_empty()).await;
        let file_ref = state.character_options()[0].file_ref.clone();
        send(handle, WorkflowSignal::SelectCharacter(file_ref));
        send(handle, WorkflowSignal::SubmitPreferences(preferences(page_count)));
    }

    fn step_position(state: &BookCreationState, step: &str) -> usize {
        state
            .progress_log()
            .iter()
            .position(|e| e.step == step)
            .unwrap_or_else(|| panic!("missing step {}", step))
    }

    #[tokio::test]
    async fn test_end_to_end_without_covers() {
        let fx = fixture(settings(2, false)).await;
        let handle = start(&fx);

        drive_to_pages(&handle, 4).await;
        let done = wait_for(&handle, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Completed);
        assert_eq!(done.pages().len(), 4);
        assert!(done
            .page_tasks()
            .values()
            .all(|t| t.phase == PagePhase::Done));

        let order = [
            "character_spec_set",
            "character_selected",
            "book_prefs_set",
            "covers_skipped",
            "pages_json_complete",
            "layout_complete",
        ];
        let positions: Vec<usize> = order.iter().map(|s| step_position(&done, s)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let layout_at = step_position(&done, "layout_complete");
        let done_at = step_position(&done, "done");
        let page_steps: Vec<usize> = done
            .progress_log()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.page_id.is_some())
            .map(|(i, _)| i)
            .collect();
        assert!(page_steps.len() >= 4 * 3);
        assert!(page_steps.iter().all(|i| *i > layout_at && *i < done_at));
        assert_eq!(done_at, done.progress_log().len() - 1);

        let progress = done.progress();
        assert_eq!(progress.completed, progress.total);
        assert!(progress.errors.is_empty());

        // 清单按页码排序
        let manifest_path = done.manifest_path().unwrap();
        assert_eq!(manifest_path, keys::manifest(done.book_id()));
        let manifest: Manifest =
            serde_json::from_slice(&fx.ctx.storage.read(manifest_path).await.unwrap()).unwrap();
        let indices: Vec<u32> = manifest.pages.iter().map(|p| p.page_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(manifest.cover.is_none());

        // 最终状态已持久化
        assert_eq!(fx.repository.get(done.book_id()).unwrap(), *done);
    }

    #[tokio::test]
    async fn test_end_to_end_with_cover_selection() {
        let fx = fixture(settings(2, true)).await;
        let handle = start(&fx);

        drive_to_pages(&handle, 2).await;
        let state = wait_for(&handle, |s| s.cover_options().len() == 2).await;
        assert_eq!(state.stage(), WorkflowStage::GeneratingCover);
        assert!(state.style_profile().is_some());

        // 未知封面被拒绝，状态不变
        send(&handle, WorkflowSignal::SelectCover("cover-9".to_string()));
        send(&handle, WorkflowSignal::SelectCover("cover-1".to_string()));
        let done = wait_for(&handle, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Completed);
        assert_eq!(done.selected_cover(), Some("cover-1"));
        assert!(step_position(&done, "cover_selected") < step_position(&done, "pages_json_complete"));
        assert_eq!(fx.generator.call_count(ArtifactKind::CoverArt), 2);
    }

    #[tokio::test]
    async fn test_page_admission_bounded() {
        let fx = fixture(settings(2, false)).await;
        let handle = start(&fx);

        drive_to_pages(&handle, 10).await;
        let done = wait_for(&handle, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Completed);
        assert_eq!(fx.generator.call_count(ArtifactKind::PageIllustration), 10);
        assert!(fx.generator.peak_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_character_spec_is_set_once() {
        let fx = fixture(settings(2, false)).await;
        fx.generator.hold(ArtifactKind::PageIllustration);
        let handle = start(&fx);

        send(&handle, WorkflowSignal::SubmitCharacterSpec(character()));
        send(&handle, WorkflowSignal::SubmitCharacterSpec(character()));
        let mut other = character();
        other.name = "Nora".to_string();
        send(&handle, WorkflowSignal::SubmitCharacterSpec(other.clone()));

        let state = wait_for(&handle, |s| !s.character_options().is_empty()).await;
        assert_eq!(state.character_spec(), Some(&character()));
        let set_count = state
            .progress_log()
            .iter()
            .filter(|e| e.step == "character_spec_set")
            .count();
        assert_eq!(set_count, 1);

        let file_ref = state.character_options()[0].file_ref.clone();
        send(&handle, WorkflowSignal::SelectCharacter(file_ref));
        send(&handle, WorkflowSignal::SubmitPreferences(preferences(3)));
        wait_for(&handle, |s| s.stage() == WorkflowStage::RenderingPages).await;

        // 页面已开始渲染后的冲突提交被静默拒绝
        send(&handle, WorkflowSignal::SubmitCharacterSpec(other));
        send(&handle, WorkflowSignal::SelectCharacter("books/x/characters/9.png".to_string()));
        fx.generator.release(ArtifactKind::PageIllustration);

        let done = wait_for(&handle, |s| s.is_terminal()).await;
        assert_eq!(done.character_spec(), Some(&character()));
        assert_eq!(done.chosen_character_file(), state.character_options().first().map(|o| o.file_ref.as_str()));
        assert_eq!(done.status(), BookStatus::Completed);
    }

    #[tokio::test]
    async fn test_selection_before_options_is_rejected() {
        let fx = fixture(settings(2, false)).await;
        let handle = start(&fx);

        send(&handle, WorkflowSignal::SubmitCharacterSpec(character()));
        send(
            &handle,
            WorkflowSignal::SelectCharacter("books/not/an/option.png".to_string()),
        );
        send(&handle, WorkflowSignal::SubmitPreferences(preferences(2)));

        let state = wait_for(&handle, |s| !s.character_options().is_empty()).await;
        assert!(state.chosen_character_file().is_none());
        assert_eq!(state.stage(), WorkflowStage::AwaitingCharacterSelection);
        // 偏好可以提前提交，但流程仍停在角色选择
        tokio::time::sleep(Duration::from_millis(100)).await;
        let waiting = handle.snapshot.borrow().clone();
        assert!(waiting.chosen_character_file().is_none());
        assert_eq!(waiting.stage(), WorkflowStage::AwaitingCharacterSelection);
        assert_eq!(fx.generator.call_count(ArtifactKind::StyleAnalysis), 0);

        let file_ref = state.character_options()[0].file_ref.clone();
        send(&handle, WorkflowSignal::SelectCharacter(file_ref.clone()));
        let done = wait_for(&handle, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Completed);
        assert_eq!(done.chosen_character_file(), Some(file_ref.as_str()));
        assert!(fx.ctx.storage.exists(&file_ref).await);
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_book() {
        let fx = fixture(settings(2, false)).await;
        let repository = Arc::new(BrokenDiskRepository::default());
        let mut ctx = fx.ctx.clone();
        ctx.repository = repository.clone();

        let book_id = BookId::new();
        let handle = BookWorker::spawn(BookCreationState::new(book_id, false), &ctx);
        send(&handle, WorkflowSignal::SubmitCharacterSpec(character()));
        let state = wait_for(&handle, |s| !s.character_options().is_empty()).await;

        repository.broken.store(true, Ordering::SeqCst);
        let mut events = fx.ctx.publisher.subscribe(book_id);
        send(
            &handle,
            WorkflowSignal::SelectCharacter(state.character_options()[0].file_ref.clone()),
        );
        let done = wait_for(&handle, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Failed);
        assert!(done.failure().unwrap().contains("disk full"));
        assert!(done.errors().is_empty());
        // 选择提交与终态各重试到上限
        assert_eq!(repository.failed_saves.load(Ordering::SeqCst), 4);
        assert_eq!(fx.generator.call_count(ArtifactKind::StyleAnalysis), 0);

        // 落盘的仍是最后一次成功的快照，重启后从那里恢复
        let durable = repository.inner.get(book_id).unwrap();
        assert!(!durable.is_terminal());
        assert!(durable.chosen_character_file().is_none());
        assert_eq!(durable.character_options(), state.character_options());

        // 失败的提交没有单独推送，观察者收到的第一条状态就是终态
        let first_status = tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Ok(BookEvent::StatusChanged { status, .. }) => break Some(status),
                    Ok(_) => continue,
                    Err(_) => break None,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(first_status, Some(BookStatus::Failed));
    }

    #[tokio::test]
    async fn test_cancel_drains_in_flight_pages_only() {
        let fx = fixture(settings(2, false)).await;
        fx.generator.hold(ArtifactKind::PageIllustration);
        let handle = start(&fx);

        drive_to_pages(&handle, 5).await;
        wait_for(&handle, |s| {
            s.page_tasks()
                .values()
                .filter(|t| t.phase == PagePhase::Illustrating)
                .count()
                == 2
        })
        .await;

        send(&handle, WorkflowSignal::Cancel);
        wait_for(&handle, |s| s.cancel_requested()).await;
        fx.generator.release(ArtifactKind::PageIllustration);

        let done = wait_for(&handle, |s| s.is_terminal()).await;
        assert_eq!(done.status(), BookStatus::Cancelled);
        assert!(done.manifest_path().is_none());

        let phases: Vec<PagePhase> = done.page_tasks().values().map(|t| t.phase).collect();
        assert_eq!(phases.iter().filter(|p| p.is_settled()).count(), 2);
        assert_eq!(phases.iter().filter(|p| **p == PagePhase::Queued).count(), 3);
        assert_eq!(fx.generator.call_count(ArtifactKind::PageIllustration), 2);
    }

    #[tokio::test]
    async fn test_pause_blocks_admission_until_resume() {
        let paused_fx = fixture(settings(2, false)).await;
        let handle = start(&paused_fx);

        send(&handle, WorkflowSignal::Pause);
        drive_to_pages(&handle, 4).await;
        wait_for(&handle, |s| s.stage() == WorkflowStage::RenderingPages).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let state = handle.snapshot.borrow().clone();
        assert_eq!(state.status(), BookStatus::Paused);
        assert!(state
            .page_tasks()
            .values()
            .all(|t| t.phase == PagePhase::Queued));
        assert_eq!(paused_fx.generator.call_count(ArtifactKind::PageIllustration), 0);

        send(&handle, WorkflowSignal::Resume);
        let paused_run = wait_for(&handle, |s| s.is_terminal()).await;

        let plain_fx = fixture(settings(2, false)).await;
        let plain = start(&plain_fx);
        drive_to_pages(&plain, 4).await;
        let plain_run = wait_for(&plain, |s| s.is_terminal()).await;

        assert_eq!(paused_run.status(), BookStatus::Completed);
        assert_eq!(paused_run.pages(), plain_run.pages());
        let shape = |s: &BookCreationState| -> Vec<(u32, PagePhase, Vec<String>)> {
            s.page_tasks()
                .values()
                .map(|t| (t.page_index, t.phase, t.artifact_paths.keys().cloned().collect()))
                .collect()
        };
        assert_eq!(shape(&paused_run), shape(&plain_run));
    }

    #[tokio::test]
    async fn test_page_failures_are_isolated() {
        let fx = fixture(settings(2, false)).await;
        fx.generator.fail_always(
            ":page_illustration:1",
            GeneratorError::Rejected("unsafe scene".to_string()),
        );
        fx.renderer.fail_page(
            2,
            RenderError::Http {
                status: 500,
                message: "renderer down".to_string(),
                retry_after: None,
            },
        );
        let handle = start(&fx);

        drive_to_pages(&handle, 4).await;
        let done = wait_for(&handle, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Completed);
        assert_eq!(done.errors().len(), 2);

        let page1 = done.page_task(1).unwrap();
        assert_eq!(page1.phase, PagePhase::Failed);
        assert!(page1.illustration_path().is_none());

        // 渲染失败保留已生成的插画，且插画不重试
        let page2 = done.page_task(2).unwrap();
        assert_eq!(page2.phase, PagePhase::Failed);
        assert!(page2.illustration_path().is_some());
        assert!(page2.last_error.as_deref().unwrap().contains("render failed"));

        assert_eq!(done.page_task(0).unwrap().phase, PagePhase::Done);
        assert_eq!(done.page_task(3).unwrap().phase, PagePhase::Done);

        let manifest: Manifest = serde_json::from_slice(
            &fx.ctx.storage.read(done.manifest_path().unwrap()).await.unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.pages[1].status, "failed");
        assert_eq!(manifest.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_outline_failure_fails_book() {
        let fx = fixture(settings(2, false)).await;
        fx.generator
            .fail_always(":outline:", GeneratorError::Rejected("policy".to_string()));
        let handle = start(&fx);

        drive_to_pages(&handle, 4).await;
        let done = wait_for(&handle, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Failed);
        assert_eq!(done.stage(), WorkflowStage::Failed);
        assert!(done.failure().unwrap().contains("policy"));
        assert!(done.pages().is_empty());
        // 已生成的角色产物保留
        assert!(done.chosen_character_file().is_some());
    }

    #[tokio::test]
    async fn test_empty_outline_fails_book() {
        let fx = fixture(settings(2, false)).await;
        fx.generator
            .script_output(ArtifactKind::Outline, serde_json::json!({ "pages": [] }));
        let handle = start(&fx);

        drive_to_pages(&handle, 4).await;
        let done = wait_for(&handle, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Failed);
        assert_eq!(done.failure(), Some("outline has no pages"));
        assert!(done.errors().is_empty());
        assert!(done.page_tasks().is_empty());
        assert_eq!(fx.generator.call_count(ArtifactKind::Layout), 0);
    }

    #[tokio::test]
    async fn test_restart_skips_finished_stages() {
        let fx = fixture(settings(2, false)).await;
        let handle = start(&fx);
        send(&handle, WorkflowSignal::SubmitCharacterSpec(character()));
        let state = wait_for(&handle, |s| !s.character_options().is_empty()).await;
        let book_id = state.book_id();
        send(
            &handle,
            WorkflowSignal::SelectCharacter(state.character_options()[0].file_ref.clone()),
        );
        wait_for(&handle, |s| s.style_profile().is_some()).await;

        // 模拟进程退出：关闭命令通道
        drop(handle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let persisted = fx.repository.get(book_id).unwrap();
        assert!(!persisted.is_terminal());
        let restarted = BookWorker::spawn(persisted, &fx.ctx);
        send(&restarted, WorkflowSignal::SubmitPreferences(preferences(2)));
        let done = wait_for(&restarted, |s| s.is_terminal()).await;

        assert_eq!(done.status(), BookStatus::Completed);
        assert_eq!(fx.generator.call_count(ArtifactKind::CharacterSheet), 2);
        assert_eq!(fx.generator.call_count(ArtifactKind::StyleAnalysis), 1);
    }
}
