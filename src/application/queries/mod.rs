//! 应用层 - 查询（读操作）
//!
//! CQRS 查询侧：处理所有读操作，任何时刻（包括流程进行中）都可应答

mod book_queries;

pub mod handlers;

pub use book_queries::*;
