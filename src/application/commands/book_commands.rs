//! Book Commands
//!
//! 每个命令对应一个用户动作；校验通过后转换为投递给编排器的信号

use crate::application::error::ApplicationError;
use crate::application::ports::WorkflowSignal;
use crate::domain::book::{BookId, BookPreferences, CharacterSpec};

/// 创建绘本命令
#[derive(Debug, Clone, Default)]
pub struct CreateBook {
    /// 客户端可指定 ID（便于重试时去重）
    pub book_id: Option<BookId>,
}

/// 投递给已存在绘本的命令
pub trait BookCommand: Send {
    fn book_id(&self) -> BookId;

    /// 投递前的载荷校验
    fn validate(&self) -> Result<(), ApplicationError> {
        Ok(())
    }

    fn into_signal(self) -> WorkflowSignal;
}

/// 提交角色设定
#[derive(Debug, Clone)]
pub struct SubmitCharacterSpec {
    pub book_id: BookId,
    pub spec: CharacterSpec,
}

impl BookCommand for SubmitCharacterSpec {
    fn book_id(&self) -> BookId {
        self.book_id
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        self.spec.validate().map_err(ApplicationError::validation)
    }

    fn into_signal(self) -> WorkflowSignal {
        WorkflowSignal::SubmitCharacterSpec(self.spec)
    }
}

/// 选择角色形象
#[derive(Debug, Clone)]
pub struct SelectCharacter {
    pub book_id: BookId,
    pub file_ref: String,
}

impl BookCommand for SelectCharacter {
    fn book_id(&self) -> BookId {
        self.book_id
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        let file_ref = self.file_ref.trim();
        if file_ref.is_empty() {
            return Err(ApplicationError::validation("角色文件引用不能为空"));
        }
        // 只接受存储内的相对路径
        if file_ref.starts_with('/') || file_ref.split('/').any(|part| part == "..") {
            return Err(ApplicationError::validation("无效的角色文件引用"));
        }
        Ok(())
    }

    fn into_signal(self) -> WorkflowSignal {
        WorkflowSignal::SelectCharacter(self.file_ref.trim().to_string())
    }
}

/// 提交绘本偏好
#[derive(Debug, Clone)]
pub struct SubmitPreferences {
    pub book_id: BookId,
    pub preferences: BookPreferences,
}

impl BookCommand for SubmitPreferences {
    fn book_id(&self) -> BookId {
        self.book_id
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        self.preferences
            .validate()
            .map_err(ApplicationError::validation)
    }

    fn into_signal(self) -> WorkflowSignal {
        WorkflowSignal::SubmitPreferences(self.preferences)
    }
}

/// 选择封面
#[derive(Debug, Clone)]
pub struct SelectCover {
    pub book_id: BookId,
    pub option_id: String,
}

impl BookCommand for SelectCover {
    fn book_id(&self) -> BookId {
        self.book_id
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        if self.option_id.trim().is_empty() {
            return Err(ApplicationError::validation("封面选项不能为空"));
        }
        Ok(())
    }

    fn into_signal(self) -> WorkflowSignal {
        WorkflowSignal::SelectCover(self.option_id.trim().to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PauseBook {
    pub book_id: BookId,
}

impl BookCommand for PauseBook {
    fn book_id(&self) -> BookId {
        self.book_id
    }

    fn into_signal(self) -> WorkflowSignal {
        WorkflowSignal::Pause
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResumeBook {
    pub book_id: BookId,
}

impl BookCommand for ResumeBook {
    fn book_id(&self) -> BookId {
        self.book_id
    }

    fn into_signal(self) -> WorkflowSignal {
        WorkflowSignal::Resume
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CancelBook {
    pub book_id: BookId,
}

impl BookCommand for CancelBook {
    fn book_id(&self) -> BookId {
        self.book_id
    }

    fn into_signal(self) -> WorkflowSignal {
        WorkflowSignal::Cancel
    }
}
