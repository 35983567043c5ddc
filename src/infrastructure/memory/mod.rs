//! Memory Layer - In-Memory State Management
//!
//! 持有运行中绘本流程的句柄，路由命令并提供快照读取

mod book_registry;

pub use book_registry::InMemoryBookRegistry;
