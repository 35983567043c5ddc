//! Book Context - Entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{BookId, PagePhase, RenderTarget};

/// 插画原图在 `artifact_paths` 中的 key
pub const ILLUSTRATION_KEY: &str = "illustration";
/// 低分辨率预览图在 `artifact_paths` 中的 key
pub const PREVIEW_KEY: &str = "preview";

/// 大纲中的一页
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpec {
    pub index: u32,
    pub text: String,
    pub illustration_prompt: String,
}

/// 单页任务状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTaskState {
    pub page_index: u32,
    pub phase: PagePhase,
    /// key: `illustration` / `preview` / 渲染目标名，value: 存储相对路径
    pub artifact_paths: BTreeMap<String, String>,
    pub last_error: Option<String>,
}

impl PageTaskState {
    pub fn queued(page_index: u32) -> Self {
        Self {
            page_index,
            phase: PagePhase::Queued,
            artifact_paths: BTreeMap::new(),
            last_error: None,
        }
    }

    pub fn illustration_path(&self) -> Option<&str> {
        self.artifact_paths.get(ILLUSTRATION_KEY).map(String::as_str)
    }

    pub fn render_path(&self, target: RenderTarget) -> Option<&str> {
        self.artifact_paths.get(target.as_str()).map(String::as_str)
    }
}

/// 进度事件（只追加，不改写）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: String,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<u32>,
}

/// 候选角色形象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterOption {
    pub file_ref: String,
}

/// 角色画风分析结果
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StyleProfile {
    pub summary: String,
    #[serde(default)]
    pub palette: Vec<String>,
    #[serde(default)]
    pub descriptors: Vec<String>,
}

/// 候选封面
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverOption {
    pub id: String,
    pub path: String,
}

/// 单页版式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub page_index: u32,
    pub template: String,
    pub text_position: String,
    pub font_scale: f32,
    pub palette: String,
}

/// 版式方案
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutPlan {
    pub pages: Vec<PageLayout>,
}

impl LayoutPlan {
    pub fn for_page(&self, page_index: u32) -> Option<&PageLayout> {
        self.pages.iter().find(|p| p.page_index == page_index)
    }
}

/// 清单中的一页
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPage {
    pub page_index: u32,
    pub status: String,
    pub text: String,
    pub artifact_paths: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 产物清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub book_id: BookId,
    pub title: String,
    pub character_file: Option<String>,
    pub cover: Option<String>,
    pub pages: Vec<ManifestPage>,
    pub errors: Vec<String>,
    pub generated_at: DateTime<Utc>,
}
