//! Book Context - Errors

use thiserror::Error;

use super::BookId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookError {
    #[error("绘本已结束，状态不可再修改: {0}")]
    Terminal(BookId),

    #[error("大纲已生成，页面不可重置: {0}")]
    PagesAlreadySet(BookId),

    #[error("页面不存在: {0}")]
    PageNotFound(u32),

    #[error("无效的输入: {0}")]
    InvalidInput(String),
}
