//! Domain Layer - 领域层
//!
//! - Book Context: 绘本创作流程状态
//! - Age Rules: 分龄文本规则（纯函数）

pub mod book;

mod age_rules;

pub use age_rules::{clamp, validate, ValidationReport};
