//! Book Context - Value Objects

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 绘本唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(Uuid);

impl BookId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for BookId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 角色设定（由用户提交，提交后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSpec {
    pub name: String,
    pub age: u8,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub palette: Vec<String>,
    pub style: String,
    /// 显式指定的角色类型（如 "child"、"animal"），缺省由生成器推断
    #[serde(default)]
    pub kind: Option<String>,
}

impl CharacterSpec {
    pub fn validate(&self) -> Result<(), &'static str> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("角色名不能为空");
        }
        if name.chars().count() > 80 {
            return Err("角色名长度不能超过80字符");
        }
        if self.age > 120 {
            return Err("角色年龄不能超过120");
        }
        if self.style.trim().is_empty() {
            return Err("画风不能为空");
        }
        Ok(())
    }
}

/// 读者年龄段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBand {
    /// 0-3 岁
    Toddler,
    /// 4-6 岁
    Early,
    /// 7-9 岁
    Middle,
    /// 10-12 岁
    Older,
}

impl AgeBand {
    pub fn from_age(age: u8) -> Self {
        match age {
            0..=3 => AgeBand::Toddler,
            4..=6 => AgeBand::Early,
            7..=9 => AgeBand::Middle,
            _ => AgeBand::Older,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeBand::Toddler => "toddler",
            AgeBand::Early => "early",
            AgeBand::Middle => "middle",
            AgeBand::Older => "older",
        }
    }
}

/// 无障碍选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessibilityFlags {
    #[serde(default)]
    pub dyslexia_friendly: bool,
    #[serde(default)]
    pub high_contrast: bool,
    #[serde(default)]
    pub large_print: bool,
}

/// 绘本偏好（由用户提交，提交后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPreferences {
    pub title: String,
    pub topic: String,
    pub page_count: u32,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default)]
    pub target_age: Option<u8>,
    #[serde(default)]
    pub age_band: Option<AgeBand>,
    #[serde(default)]
    pub accessibility: AccessibilityFlags,
}

fn default_tone() -> String {
    "warm".to_string()
}

pub const MAX_PAGE_COUNT: u32 = 40;

impl BookPreferences {
    pub fn validate(&self) -> Result<(), &'static str> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err("标题不能为空");
        }
        if title.chars().count() > 200 {
            return Err("标题长度不能超过200字符");
        }
        if self.page_count == 0 || self.page_count > MAX_PAGE_COUNT {
            return Err("页数必须在1到40之间");
        }
        Ok(())
    }

    /// 年龄段：显式指定优先，其次由目标年龄推断，默认 4-6 岁
    pub fn resolved_age_band(&self) -> AgeBand {
        self.age_band
            .or_else(|| self.target_age.map(AgeBand::from_age))
            .unwrap_or(AgeBand::Early)
    }
}

/// 绘本整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Running,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Running => "running",
            BookStatus::Paused => "paused",
            BookStatus::Cancelled => "cancelled",
            BookStatus::Completed => "completed",
            BookStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(BookStatus::Running),
            "paused" => Some(BookStatus::Paused),
            "cancelled" => Some(BookStatus::Cancelled),
            "completed" => Some(BookStatus::Completed),
            "failed" => Some(BookStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookStatus::Cancelled | BookStatus::Completed | BookStatus::Failed
        )
    }
}

/// 编排状态机所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Init,
    AwaitingCharacterSpec,
    AwaitingCharacterSelection,
    AwaitingPreferences,
    GeneratingCover,
    GeneratingOutline,
    GeneratingLayout,
    RenderingPages,
    WritingManifest,
    Completed,
    Cancelled,
    Failed,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::Init => "init",
            WorkflowStage::AwaitingCharacterSpec => "awaiting_character_spec",
            WorkflowStage::AwaitingCharacterSelection => "awaiting_character_selection",
            WorkflowStage::AwaitingPreferences => "awaiting_preferences",
            WorkflowStage::GeneratingCover => "generating_cover",
            WorkflowStage::GeneratingOutline => "generating_outline",
            WorkflowStage::GeneratingLayout => "generating_layout",
            WorkflowStage::RenderingPages => "rendering_pages",
            WorkflowStage::WritingManifest => "writing_manifest",
            WorkflowStage::Completed => "completed",
            WorkflowStage::Cancelled => "cancelled",
            WorkflowStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStage::Completed | WorkflowStage::Cancelled | WorkflowStage::Failed
        )
    }
}

/// 渲染输出目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderTarget {
    Screen,
    Proof,
    Print,
}

impl RenderTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderTarget::Screen => "screen",
            RenderTarget::Proof => "proof",
            RenderTarget::Print => "print",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "screen" => Some(RenderTarget::Screen),
            "proof" => Some(RenderTarget::Proof),
            "print" => Some(RenderTarget::Print),
            _ => None,
        }
    }
}

impl std::fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单页流水线阶段
///
/// 只能单调前进；`Failed` 对该页是终态，但不影响其他页
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "target", rename_all = "snake_case")]
pub enum PagePhase {
    Queued,
    Illustrating,
    IllustrationReady,
    Rendering,
    RenderReady(RenderTarget),
    Done,
    Failed,
}

impl PagePhase {
    pub fn rank(&self) -> u8 {
        match self {
            PagePhase::Queued => 0,
            PagePhase::Illustrating => 1,
            PagePhase::IllustrationReady => 2,
            PagePhase::Rendering => 3,
            PagePhase::RenderReady(_) => 4,
            PagePhase::Done => 5,
            PagePhase::Failed => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PagePhase::Queued => "queued",
            PagePhase::Illustrating => "illustrating",
            PagePhase::IllustrationReady => "illustration_ready",
            PagePhase::Rendering => "rendering",
            PagePhase::RenderReady(_) => "render_ready",
            PagePhase::Done => "done",
            PagePhase::Failed => "failed",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, PagePhase::Done | PagePhase::Failed)
    }

    /// 是否允许从当前阶段迁移到 `next`
    pub fn can_advance_to(&self, next: PagePhase) -> bool {
        if self.is_settled() {
            return false;
        }
        match (self, next) {
            (_, PagePhase::Failed) => true,
            // 多个渲染目标依次就绪
            (PagePhase::RenderReady(a), PagePhase::RenderReady(b)) => a != &b,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_band_from_age() {
        assert_eq!(AgeBand::from_age(2), AgeBand::Toddler);
        assert_eq!(AgeBand::from_age(5), AgeBand::Early);
        assert_eq!(AgeBand::from_age(8), AgeBand::Middle);
        assert_eq!(AgeBand::from_age(11), AgeBand::Older);
    }

    #[test]
    fn test_preferences_validation() {
        let mut prefs = BookPreferences {
            title: "Moon Trip".to_string(),
            topic: "space".to_string(),
            page_count: 4,
            tone: "warm".to_string(),
            target_age: Some(8),
            age_band: None,
            accessibility: AccessibilityFlags::default(),
        };
        assert!(prefs.validate().is_ok());
        assert_eq!(prefs.resolved_age_band(), AgeBand::Middle);

        prefs.page_count = 0;
        assert!(prefs.validate().is_err());
        prefs.page_count = 41;
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn test_page_phase_is_monotonic() {
        assert!(PagePhase::Queued.can_advance_to(PagePhase::Illustrating));
        assert!(PagePhase::Illustrating.can_advance_to(PagePhase::IllustrationReady));
        assert!(!PagePhase::IllustrationReady.can_advance_to(PagePhase::Illustrating));
        assert!(PagePhase::RenderReady(RenderTarget::Screen)
            .can_advance_to(PagePhase::RenderReady(RenderTarget::Print)));
        assert!(!PagePhase::RenderReady(RenderTarget::Screen)
            .can_advance_to(PagePhase::RenderReady(RenderTarget::Screen)));
        assert!(PagePhase::Rendering.can_advance_to(PagePhase::Failed));
        assert!(!PagePhase::Done.can_advance_to(PagePhase::Failed));
        assert!(!PagePhase::Failed.can_advance_to(PagePhase::Done));
    }

    #[test]
    fn test_status_terminal() {
        assert!(!BookStatus::Running.is_terminal());
        assert!(!BookStatus::Paused.is_terminal());
        assert!(BookStatus::Cancelled.is_terminal());
        assert!(BookStatus::Completed.is_terminal());
        assert!(BookStatus::Failed.is_terminal());
    }
}
