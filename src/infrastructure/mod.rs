//! Infrastructure Layer - 基础设施层
//!
//! 提供所有端口的具体实现

pub mod adapters;
pub mod events;
pub mod http;
pub mod memory;
pub mod persistence;
pub mod resilience;
pub mod worker;

pub use events::EventPublisher;
pub use memory::InMemoryBookRegistry;
pub use persistence::{SledArtifactCache, SqliteBookRepository};
pub use resilience::GenerationService;
pub use worker::{BookWorker, WorkerContext, WorkflowSettings};
