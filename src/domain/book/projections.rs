//! Book Context - Read Projections
//!
//! 供查询侧使用的只读投影，随时可计算（包括流程进行中）

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{BookCreationState, BookStatus, PagePhase, ProgressEvent, ILLUSTRATION_KEY};

/// 主流程里程碑数 + 清单 1 步
const FIXED_STEPS: usize = 6;
/// 每页计入的步数（插画 + 结束）
const STEPS_PER_PAGE: usize = 2;

/// 进度摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub step: String,
    pub errors: Vec<String>,
    pub file_paths: Vec<String>,
}

/// 面向不可信观察者的页面视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageView {
    pub page_index: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_paths: Option<BTreeMap<String, String>>,
}

/// 面向不可信观察者的流程视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowView {
    pub status: BookStatus,
    pub stage: String,
    pub updates: Vec<ProgressEvent>,
    pub pages: Vec<PageView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BookCreationState {
    /// 预计总步数：6 + 2 × 页数
    pub fn expected_steps(&self) -> usize {
        let page_count = if !self.pages().is_empty() {
            self.pages().len()
        } else {
            self.book_preferences()
                .map(|p| p.page_count as usize)
                .unwrap_or(0)
        };
        FIXED_STEPS + STEPS_PER_PAGE * page_count
    }

    /// 已完成步数，单调不减且不超过总步数
    pub fn completed_steps(&self) -> usize {
        let core = [
            self.character_spec().is_some(),
            self.chosen_character_file().is_some(),
            self.book_preferences().is_some(),
            !self.pages().is_empty(),
            self.layout().is_some(),
        ]
        .iter()
        .filter(|reached| **reached)
        .count();

        let pages: usize = self
            .page_tasks()
            .values()
            .map(|task| {
                if task.phase.is_settled() {
                    STEPS_PER_PAGE
                } else if task.artifact_paths.contains_key(ILLUSTRATION_KEY) {
                    1
                } else {
                    0
                }
            })
            .sum();

        let done = usize::from(self.status() == BookStatus::Completed);

        (core + pages + done).min(self.expected_steps())
    }

    /// 所有已产出文件的存储路径
    pub fn file_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        if let Some(path) = self.chosen_character_file() {
            paths.push(path.to_string());
        }
        if let Some(path) = self.selected_cover_path() {
            paths.push(path.to_string());
        }
        for task in self.page_tasks().values() {
            paths.extend(task.artifact_paths.values().cloned());
        }
        if let Some(path) = self.manifest_path() {
            paths.push(path.to_string());
        }
        paths
    }

    pub fn progress(&self) -> ProgressSnapshot {
        let step = self
            .progress_log()
            .last()
            .map(|e| e.step.clone())
            .unwrap_or_else(|| self.stage().as_str().to_string());

        ProgressSnapshot {
            total: self.expected_steps(),
            completed: self.completed_steps(),
            step,
            errors: self.errors().to_vec(),
            file_paths: self.file_paths(),
        }
    }

    /// 只读视图：路径改写为 `public_prefix` 下的 URL，不暴露存储根目录
    pub fn workflow_view(&self, public_prefix: &str) -> WorkflowView {
        let prefix = public_prefix.trim_end_matches('/');
        let pages = self
            .page_tasks()
            .values()
            .map(|task| {
                let artifact_paths = if task.artifact_paths.is_empty() {
                    None
                } else {
                    Some(
                        task.artifact_paths
                            .iter()
                            .map(|(k, v)| {
                                (k.clone(), format!("{}/{}", prefix, v.trim_start_matches('/')))
                            })
                            .collect(),
                    )
                };
                PageView {
                    page_index: task.page_index,
                    status: match task.phase {
                        PagePhase::RenderReady(target) => format!("render_ready:{}", target),
                        phase => phase.as_str().to_string(),
                    },
                    artifact_paths,
                }
            })
            .collect();

        WorkflowView {
            status: self.status(),
            stage: self.stage().as_str().to_string(),
            updates: self.progress_log().to_vec(),
            pages,
            error: self.failure().map(str::to_string),
        }
    }
}
