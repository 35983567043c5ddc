//! Stage Coordinators
//!
//! 每个阶段只做委托：组装请求 → 生成 → 解析/落盘 → 返回类型化输出。
//! 状态写入由编排器完成

use chrono::Utc;
use futures_util::future::try_join_all;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use super::WorkerContext;
use crate::application::ports::{
    keys, ArtifactKind, ArtifactStoragePort, GenerateRequest, GeneratorError, StorageError,
};
use crate::domain::book::{
    BookCreationState, BookId, BookPreferences, CharacterOption, CharacterSpec, CoverOption,
    LayoutPlan, Manifest, ManifestPage, PageLayout, PageSpec, StyleProfile,
};
use crate::domain::{clamp, validate};
use crate::infrastructure::resilience::{GenerationService, RetryError};

const DEFAULT_TEMPLATE: &str = "full_bleed";
const DEFAULT_TEXT_POSITION: &str = "bottom";
const LARGE_PRINT_SCALE: f32 = 1.4;

/// 阶段错误（对编排器而言都是全局失败）
#[derive(Debug, Error)]
pub enum StageError {
    #[error("generation failed: {0}")]
    Generation(#[from] RetryError<GeneratorError>),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("outline has no pages")]
    EmptyOutline,

    #[error("missing input: {0}")]
    MissingInput(&'static str),
}

impl From<GeneratorError> for StageError {
    fn from(e: GeneratorError) -> Self {
        StageError::InvalidOutput(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct OutlineOutput {
    pages: Vec<OutlinePage>,
}

#[derive(Debug, Deserialize)]
struct OutlinePage {
    text: String,
    #[serde(default)]
    illustration_prompt: String,
}

#[derive(Debug, Deserialize)]
struct LayoutOutput {
    #[serde(default)]
    pages: Vec<LayoutPage>,
}

#[derive(Debug, Deserialize)]
struct LayoutPage {
    page_index: u32,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    text_position: Option<String>,
}

/// Stage Coordinators
pub struct StageCoordinators {
    generation: Arc<GenerationService>,
    storage: Arc<dyn ArtifactStoragePort>,
    character_options: usize,
    cover_options: usize,
}

impl StageCoordinators {
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            generation: ctx.generation.clone(),
            storage: ctx.storage.clone(),
            character_options: ctx.settings.character_options.max(1),
            cover_options: ctx.settings.cover_options.max(1),
        }
    }

    /// 生成并落盘若干候选角色形象
    pub async fn character_options(
        &self,
        book_id: BookId,
        spec: CharacterSpec,
    ) -> Result<Vec<CharacterOption>, StageError> {
        let prompt = format!(
            "{} ({} years old), {}; traits: {}",
            spec.name,
            spec.age,
            spec.style,
            spec.traits.join(", ")
        );
        let params = json!({
            "kind": spec.kind,
            "palette": spec.palette,
            "style": spec.style,
        });

        let options = try_join_all((0..self.character_options).map(|i| {
            let request = GenerateRequest::new(
                ArtifactKind::CharacterSheet,
                prompt.clone(),
                format!("{}:character_option:{}", book_id, i),
            )
            .with_params(params.clone());
            async move {
                let artifact = self.generation.generate(request).await?;
                let file_ref = self
                    .storage
                    .put(
                        &keys::character_option(book_id, i, artifact.extension()),
                        &artifact.data,
                    )
                    .await?;
                Ok::<_, StageError>(CharacterOption { file_ref })
            }
        }))
        .await?;

        tracing::info!(book_id = %book_id, count = options.len(), "Character options generated");
        Ok(options)
    }

    /// 分析所选角色的画风
    pub async fn style_analysis(
        &self,
        book_id: BookId,
        spec: CharacterSpec,
        character_file: String,
    ) -> Result<StyleProfile, StageError> {
        let request = GenerateRequest::new(
            ArtifactKind::StyleAnalysis,
            format!("{} in {} style", spec.name, spec.style),
            format!("{}:style_analysis:0", book_id),
        )
        .with_params(json!({ "character_file": character_file, "palette": spec.palette }));

        let profile: StyleProfile = self.generation.generate(request).await?.parse_json()?;
        tracing::info!(book_id = %book_id, summary = %profile.summary, "Style profile ready");
        Ok(profile)
    }

    /// 生成候选封面
    pub async fn cover_options(
        &self,
        book_id: BookId,
        preferences: BookPreferences,
        style: Option<StyleProfile>,
        character_file: Option<String>,
    ) -> Result<Vec<CoverOption>, StageError> {
        let prompt = format!("cover for \"{}\": {}", preferences.title, preferences.topic);
        let params = json!({
            "title": preferences.title,
            "tone": preferences.tone,
            "style": style.map(|s| s.summary),
            "character_file": character_file,
        });

        let options = try_join_all((0..self.cover_options).map(|i| {
            let request = GenerateRequest::new(
                ArtifactKind::CoverArt,
                prompt.clone(),
                format!("{}:cover_option:{}", book_id, i),
            )
            .with_params(params.clone());
            async move {
                let artifact = self.generation.generate(request).await?;
                let path = self
                    .storage
                    .put(
                        &keys::cover_option(book_id, i, artifact.extension()),
                        &artifact.data,
                    )
                    .await?;
                Ok::<_, StageError>(CoverOption {
                    id: format!("cover-{}", i),
                    path,
                })
            }
        }))
        .await?;

        tracing::info!(book_id = %book_id, count = options.len(), "Cover options generated");
        Ok(options)
    }

    /// 生成故事大纲：按年龄段截断文本，页数不超过偏好设置
    pub async fn outline(
        &self,
        book_id: BookId,
        spec: CharacterSpec,
        preferences: BookPreferences,
        style: Option<StyleProfile>,
    ) -> Result<(String, Vec<PageSpec>), StageError> {
        let band = preferences.resolved_age_band();
        let request = GenerateRequest::new(
            ArtifactKind::Outline,
            format!(
                "a {} story about {} starring {}",
                preferences.tone, preferences.topic, spec.name
            ),
            format!("{}:outline:0", book_id),
        )
        .with_params(json!({
            "title": preferences.title,
            "page_count": preferences.page_count,
            "age_band": band.as_str(),
            "style": style.map(|s| s.summary),
        }));

        let output: OutlineOutput = self.generation.generate(request).await?.parse_json()?;

        let pages: Vec<PageSpec> = output
            .pages
            .into_iter()
            .take(preferences.page_count as usize)
            .enumerate()
            .map(|(index, page)| {
                let report = validate(&page.text, band);
                if !report.ok {
                    tracing::warn!(
                        book_id = %book_id,
                        page_index = index,
                        age_band = band.as_str(),
                        issues = ?report.issues,
                        "Page text violates age rules, clamping"
                    );
                }
                PageSpec {
                    index: index as u32,
                    text: clamp(&page.text, band),
                    illustration_prompt: page.illustration_prompt,
                }
            })
            .collect();

        if pages.is_empty() {
            return Err(StageError::EmptyOutline);
        }

        tracing::info!(book_id = %book_id, pages = pages.len(), "Outline generated");
        Ok((preferences.title.trim().to_string(), pages))
    }

    /// 生成版式方案；缺失的页面使用默认模板，无障碍选项覆盖字号与配色
    pub async fn layout(
        &self,
        book_id: BookId,
        pages: Vec<PageSpec>,
        preferences: BookPreferences,
    ) -> Result<LayoutPlan, StageError> {
        let accessibility = preferences.accessibility;
        let request = GenerateRequest::new(
            ArtifactKind::Layout,
            format!("layout for \"{}\"", preferences.title),
            format!("{}:layout:0", book_id),
        )
        .with_params(json!({
            "page_count": pages.len(),
            "pages": pages,
            "accessibility": accessibility,
        }));

        let output: LayoutOutput = self.generation.generate(request).await?.parse_json()?;

        let font_scale = if accessibility.large_print {
            LARGE_PRINT_SCALE
        } else {
            1.0
        };
        let palette = if accessibility.high_contrast {
            "high_contrast"
        } else {
            "standard"
        };

        let plan = LayoutPlan {
            pages: pages
                .iter()
                .map(|page| {
                    let suggested = output.pages.iter().find(|l| l.page_index == page.index);
                    PageLayout {
                        page_index: page.index,
                        template: suggested
                            .and_then(|l| l.template.clone())
                            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
                        text_position: suggested
                            .and_then(|l| l.text_position.clone())
                            .unwrap_or_else(|| DEFAULT_TEXT_POSITION.to_string()),
                        font_scale,
                        palette: palette.to_string(),
                    }
                })
                .collect(),
        };

        tracing::info!(book_id = %book_id, pages = plan.pages.len(), "Layout planned");
        Ok(plan)
    }

    /// 汇总产物清单并写入存储，按页码排序
    pub async fn write_manifest(&self, state: Arc<BookCreationState>) -> Result<String, StageError> {
        let title = state
            .title()
            .ok_or(StageError::MissingInput("title"))?
            .to_string();

        let mut pages: Vec<ManifestPage> = state
            .page_tasks()
            .values()
            .map(|task| ManifestPage {
                page_index: task.page_index,
                status: task.phase.as_str().to_string(),
                text: state
                    .pages()
                    .iter()
                    .find(|p| p.index == task.page_index)
                    .map(|p| p.text.clone())
                    .unwrap_or_default(),
                artifact_paths: task.artifact_paths.clone(),
                error: task.last_error.clone(),
            })
            .collect();
        pages.sort_by_key(|p| p.page_index);

        let manifest = Manifest {
            book_id: state.book_id(),
            title,
            character_file: state.chosen_character_file().map(str::to_string),
            cover: state.selected_cover_path().map(str::to_string),
            pages,
            errors: state.errors().to_vec(),
            generated_at: Utc::now(),
        };

        let data = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StageError::InvalidOutput(e.to_string()))?;
        let path = self
            .storage
            .put(&keys::manifest(state.book_id()), &data)
            .await?;

        tracing::info!(book_id = %state.book_id(), path = %path, "Manifest written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::book::{AccessibilityFlags, AgeBand, PagePhase};
    use crate::infrastructure::worker::testing::{character, fixture, preferences, settings, Fixture};

    async fn coordinators() -> (Fixture, StageCoordinators) {
        let fx = fixture(settings(2, false)).await;
        let stages = StageCoordinators::new(&fx.ctx);
        (fx, stages)
    }

    fn page(index: u32) -> PageSpec {
        PageSpec {
            index,
            text: format!("Page {}.", index),
            illustration_prompt: String::new(),
        }
    }

    #[tokio::test]
    async fn test_outline_truncated_and_clamped() {
        let (fx, stages) = coordinators().await;
        let unsafe_text = "The fox found blood on the path. It ran home to hide.";
        fx.generator.script_output(
            ArtifactKind::Outline,
            json!({
                "pages": [
                    { "text": unsafe_text, "illustration_prompt": "path" },
                    { "text": "The moon rose.", "illustration_prompt": "moon" },
                    { "text": "They slept." },
                    { "text": "One page too many." },
                ]
            }),
        );

        let (title, pages) = stages
            .outline(BookId::new(), character(), preferences(3), None)
            .await
            .unwrap();

        assert_eq!(title, "Milo and the Moon");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(pages[0].text, clamp(unsafe_text, AgeBand::Early));
        assert!(!pages[0].text.contains("blood"));
        assert_eq!(pages[1].text, "The moon rose.");
        assert_eq!(pages[2].illustration_prompt, "");
    }

    #[tokio::test]
    async fn test_empty_outline_rejected() {
        let (fx, stages) = coordinators().await;
        fx.generator
            .script_output(ArtifactKind::Outline, json!({ "pages": [] }));

        let result = stages
            .outline(BookId::new(), character(), preferences(3), None)
            .await;
        assert!(matches!(result, Err(StageError::EmptyOutline)));
    }

    #[tokio::test]
    async fn test_layout_defaults_for_missing_pages() {
        let (fx, stages) = coordinators().await;
        fx.generator.script_output(
            ArtifactKind::Layout,
            json!({ "pages": [{ "page_index": 1, "template": "text_left" }] }),
        );

        let plan = stages
            .layout(BookId::new(), (0..3).map(page).collect(), preferences(3))
            .await
            .unwrap();

        assert_eq!(plan.pages.len(), 3);
        let first = plan.for_page(0).unwrap();
        assert_eq!(first.template, DEFAULT_TEMPLATE);
        assert_eq!(first.text_position, DEFAULT_TEXT_POSITION);
        let second = plan.for_page(1).unwrap();
        assert_eq!(second.template, "text_left");
        assert_eq!(second.text_position, DEFAULT_TEXT_POSITION);
        assert!(plan
            .pages
            .iter()
            .all(|p| p.font_scale == 1.0 && p.palette == "standard"));
    }

    #[tokio::test]
    async fn test_layout_accessibility_overrides() {
        let (_fx, stages) = coordinators().await;
        let mut prefs = preferences(2);
        prefs.accessibility = AccessibilityFlags {
            large_print: true,
            high_contrast: true,
            ..AccessibilityFlags::default()
        };

        let plan = stages
            .layout(BookId::new(), (0..2).map(page).collect(), prefs)
            .await
            .unwrap();

        assert!(plan
            .pages
            .iter()
            .all(|p| p.font_scale == LARGE_PRINT_SCALE && p.palette == "high_contrast"));
    }

    #[tokio::test]
    async fn test_manifest_sorted_by_page() {
        let (fx, stages) = coordinators().await;
        let mut state = BookCreationState::new(BookId::new(), false);
        assert!(matches!(
            stages.write_manifest(Arc::new(state.clone())).await,
            Err(StageError::MissingInput("title"))
        ));

        state
            .set_outline("Moon".to_string(), vec![page(2), page(0), page(1)])
            .unwrap();
        state.complete_page(2).unwrap();
        state.fail_page(0, "generator down".to_string()).unwrap();
        state.complete_page(1).unwrap();

        let path = stages.write_manifest(Arc::new(state.clone())).await.unwrap();
        assert_eq!(path, keys::manifest(state.book_id()));

        let manifest: Manifest =
            serde_json::from_slice(&fx.ctx.storage.read(&path).await.unwrap()).unwrap();
        assert_eq!(manifest.title, "Moon");
        let order: Vec<(u32, &str)> = manifest
            .pages
            .iter()
            .map(|p| (p.page_index, p.status.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (0, PagePhase::Failed.as_str()),
                (1, PagePhase::Done.as_str()),
                (2, PagePhase::Done.as_str()),
            ]
        );
        assert_eq!(manifest.pages[1].text, "Page 1.");
        assert_eq!(manifest.pages[0].error.as_deref(), Some("generator down"));
        assert_eq!(manifest.errors.len(), 1);
    }
}
