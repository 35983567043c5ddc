//! Page Pipeline - 单页两阶段流水线（插画 → 渲染）
//!
//! 两个阶段各自重试；任一阶段重试耗尽即判定该页失败，不重试另一阶段。
//! 每个阶段成功后通过里程碑通道通知编排器，流水线自身不修改状态

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{WorkerContext, WorkflowSettings};
use crate::application::ports::{
    keys, ArtifactKind, ArtifactStoragePort, GenerateRequest, RenderError, RenderRequest,
    RendererPort,
};
use crate::domain::book::{
    BookId, PageLayout, PageMilestone, PageSpec, PageTaskState, RenderTarget,
};
use crate::infrastructure::resilience::{GenerationService, RetryExecutor};

/// 页面里程碑信号
pub type PageSignal = (u32, PageMilestone);

/// 一次页面准入所需的全部输入（准入时的状态快照）
#[derive(Debug, Clone)]
pub struct PageJob {
    pub book_id: BookId,
    pub page: PageSpec,
    pub layout: PageLayout,
    /// 已记录的进度，用于恢复时跳过已完成的阶段
    pub task: PageTaskState,
    pub character_file: Option<String>,
    pub style: Option<String>,
}

/// Page Pipeline
pub struct PagePipeline {
    generation: Arc<GenerationService>,
    renderer: Arc<dyn RendererPort>,
    storage: Arc<dyn ArtifactStoragePort>,
    preview_enabled: bool,
    targets: Vec<RenderTarget>,
    render_timeout: Duration,
    render_retry: RetryExecutor,
}

impl PagePipeline {
    pub fn new(ctx: &WorkerContext) -> Self {
        let WorkflowSettings {
            preview_enabled,
            render_targets,
            render_timeout,
            render_retry,
            ..
        } = ctx.settings.clone();

        Self {
            generation: ctx.generation.clone(),
            renderer: ctx.renderer.clone(),
            storage: ctx.storage.clone(),
            preview_enabled,
            targets: render_targets,
            render_timeout,
            render_retry: RetryExecutor::new(render_retry),
        }
    }

    /// 执行流水线；Err 携带写入 `lastError` 的消息
    pub async fn run(
        self: Arc<Self>,
        job: PageJob,
        milestones: mpsc::UnboundedSender<PageSignal>,
    ) -> Result<(), String> {
        let page_index = job.page.index;
        let notify = |milestone: PageMilestone| {
            // 编排器已退出时丢弃
            let _ = milestones.send((page_index, milestone));
        };

        // 记录了路径但文件已丢失时重新生成
        let recorded = match job.task.illustration_path() {
            Some(path) if self.storage.exists(path).await => Some(path.to_string()),
            Some(path) => {
                tracing::warn!(book_id = %job.book_id, page_index, path = %path, "Recorded illustration missing, regenerating");
                None
            }
            None => None,
        };

        let illustration = match recorded {
            Some(path) => {
                tracing::debug!(book_id = %job.book_id, page_index, "Illustration already recorded, skipping");
                path
            }
            None => {
                notify(PageMilestone::Illustrating);
                let (illustration, preview) = self.illustrate(&job).await?;
                notify(PageMilestone::IllustrationReady {
                    illustration: illustration.clone(),
                    preview,
                });
                illustration
            }
        };

        let missing: Vec<RenderTarget> = self
            .targets
            .iter()
            .copied()
            .filter(|t| job.task.render_path(*t).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        notify(PageMilestone::Rendering);
        let outputs = self.render(&job, illustration, missing.clone()).await?;
        for target in missing {
            let path = outputs
                .get(&target)
                .cloned()
                .ok_or_else(|| format!("renderer returned no artifact for {}", target))?;
            notify(PageMilestone::RenderReady { target, path });
        }

        tracing::info!(book_id = %job.book_id, page_index, "Page pipeline finished");
        Ok(())
    }

    async fn illustrate(&self, job: &PageJob) -> Result<(String, Option<String>), String> {
        let page_index = job.page.index;
        let params = json!({
            "page_index": page_index,
            "text": job.page.text,
            "character_file": job.character_file,
            "style": job.style,
        });

        let request = GenerateRequest::new(
            ArtifactKind::PageIllustration,
            job.page.illustration_prompt.clone(),
            format!("{}:page_illustration:{}", job.book_id, page_index),
        )
        .with_params(params.clone());
        let artifact = self
            .generation
            .generate(request)
            .await
            .map_err(|e| format!("illustration failed: {}", e))?;
        let illustration = self
            .storage
            .put(
                &keys::illustration(job.book_id, page_index, artifact.extension()),
                &artifact.data,
            )
            .await
            .map_err(|e| format!("illustration store failed: {}", e))?;

        let preview = if self.preview_enabled {
            self.preview(job, params).await
        } else {
            None
        };

        Ok((illustration, preview))
    }

    /// 预览失败不影响该页
    async fn preview(&self, job: &PageJob, params: serde_json::Value) -> Option<String> {
        let page_index = job.page.index;
        let request = GenerateRequest::new(
            ArtifactKind::PagePreview,
            job.page.illustration_prompt.clone(),
            format!("{}:page_preview:{}", job.book_id, page_index),
        )
        .with_params(params);

        let stored = match self.generation.generate(request).await {
            Ok(artifact) => {
                self.storage
                    .put(
                        &keys::preview(job.book_id, page_index, artifact.extension()),
                        &artifact.data,
                    )
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        match stored {
            Ok(path) => Some(path),
            Err(error) => {
                tracing::warn!(book_id = %job.book_id, page_index, error = %error, "Preview failed, continuing without it");
                None
            }
        }
    }

    async fn render(
        &self,
        job: &PageJob,
        illustration_path: String,
        targets: Vec<RenderTarget>,
    ) -> Result<std::collections::BTreeMap<RenderTarget, String>, String> {
        let request = RenderRequest {
            book_id: job.book_id,
            page: job.page.clone(),
            layout: job.layout.clone(),
            illustration_path,
            targets,
        };
        let timeout = self.render_timeout;

        self.render_retry
            .run("render", |attempt| {
                let request = request.clone();
                let renderer = self.renderer.clone();
                async move {
                    tracing::debug!(
                        book_id = %request.book_id,
                        page_index = request.page.index,
                        attempt,
                        "Calling renderer"
                    );
                    match tokio::time::timeout(timeout, renderer.render(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(RenderError::Timeout),
                    }
                }
            })
            .await
            .map_err(|e| format!("render failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::book::ILLUSTRATION_KEY;
    use crate::infrastructure::worker::testing::{fixture, settings};

    fn job(book_id: BookId, task: PageTaskState) -> PageJob {
        PageJob {
            book_id,
            page: PageSpec {
                index: task.page_index,
                text: "Milo looks up at the moon.".to_string(),
                illustration_prompt: "a fox under the moon".to_string(),
            },
            layout: PageLayout {
                page_index: task.page_index,
                template: "full_bleed".to_string(),
                text_position: "bottom".to_string(),
                font_scale: 1.0,
                palette: "standard".to_string(),
            },
            task,
            character_file: None,
            style: None,
        }
    }

    fn collect(mut rx: mpsc::UnboundedReceiver<PageSignal>) -> Vec<PageMilestone> {
        let mut milestones = Vec::new();
        while let Ok((_, m)) = rx.try_recv() {
            milestones.push(m);
        }
        milestones
    }

    #[tokio::test]
    async fn test_milestones_in_order() {
        let fx = fixture(settings(2, false)).await;
        let pipeline = Arc::new(PagePipeline::new(&fx.ctx));
        let (tx, rx) = mpsc::unbounded_channel();
        let book_id = BookId::new();

        pipeline
            .run(job(book_id, PageTaskState::queued(0)), tx)
            .await
            .unwrap();

        let milestones = collect(rx);
        assert_eq!(milestones[0], PageMilestone::Illustrating);
        assert!(matches!(
            milestones[1],
            PageMilestone::IllustrationReady { preview: None, .. }
        ));
        assert_eq!(milestones[2], PageMilestone::Rendering);
        assert_eq!(
            milestones[3..].to_vec(),
            vec![
                PageMilestone::RenderReady {
                    target: RenderTarget::Screen,
                    path: keys::rendered(book_id, 0, RenderTarget::Screen),
                },
                PageMilestone::RenderReady {
                    target: RenderTarget::Print,
                    path: keys::rendered(book_id, 0, RenderTarget::Print),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_skips_recorded_artifacts() {
        let fx = fixture(settings(2, false)).await;
        let book_id = BookId::new();
        let illustration = keys::illustration(book_id, 3, "png");
        fx.ctx.storage.put(&illustration, b"png").await.unwrap();

        let mut task = PageTaskState::queued(3);
        task.phase = crate::domain::book::PagePhase::RenderReady(RenderTarget::Screen);
        task.artifact_paths
            .insert(ILLUSTRATION_KEY.to_string(), illustration.clone());
        task.artifact_paths.insert(
            RenderTarget::Screen.as_str().to_string(),
            keys::rendered(book_id, 3, RenderTarget::Screen),
        );

        let pipeline = Arc::new(PagePipeline::new(&fx.ctx));
        let (tx, rx) = mpsc::unbounded_channel();
        pipeline.run(job(book_id, task), tx).await.unwrap();

        assert_eq!(fx.generator.call_count(ArtifactKind::PageIllustration), 0);
        assert_eq!(fx.renderer.call_count(), 1);
        assert_eq!(
            collect(rx),
            vec![
                PageMilestone::Rendering,
                PageMilestone::RenderReady {
                    target: RenderTarget::Print,
                    path: keys::rendered(book_id, 3, RenderTarget::Print),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_recorded_illustration_is_regenerated() {
        let fx = fixture(settings(2, false)).await;
        let book_id = BookId::new();

        let mut task = PageTaskState::queued(1);
        task.phase = crate::domain::book::PagePhase::IllustrationReady;
        task.artifact_paths.insert(
            ILLUSTRATION_KEY.to_string(),
            keys::illustration(book_id, 1, "png"),
        );

        let pipeline = Arc::new(PagePipeline::new(&fx.ctx));
        let (tx, _rx) = mpsc::unbounded_channel();
        pipeline.run(job(book_id, task), tx).await.unwrap();

        assert_eq!(fx.generator.call_count(ArtifactKind::PageIllustration), 1);
        assert!(
            fx.ctx
                .storage
                .exists(&keys::illustration(book_id, 1, "png"))
                .await
        );
    }

    #[tokio::test]
    async fn test_preview_failure_is_not_fatal() {
        let mut page_settings = settings(2, false);
        page_settings.preview_enabled = true;
        let fx = fixture(page_settings).await;
        fx.generator.fail_always(
            ":page_preview:",
            crate::application::ports::GeneratorError::Rejected("no preview".to_string()),
        );

        let pipeline = Arc::new(PagePipeline::new(&fx.ctx));
        let (tx, rx) = mpsc::unbounded_channel();
        pipeline
            .run(job(BookId::new(), PageTaskState::queued(0)), tx)
            .await
            .unwrap();

        assert!(collect(rx).iter().any(|m| matches!(
            m,
            PageMilestone::IllustrationReady { preview: None, .. }
        )));
    }
}
