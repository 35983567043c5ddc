//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod artifact_cache;
mod artifact_storage;
mod book_workflow;
mod failure;
mod generator;
mod renderer;
mod repositories;

pub use artifact_cache::{generate_cache_key, ArtifactCachePort, CacheError, CacheStats};
pub use artifact_storage::{keys, ArtifactStoragePort, StorageError};
pub use book_workflow::{BookWorkflowPort, WorkflowError, WorkflowSignal};
pub use failure::{classify_status, FailureClass, Retryable};
pub use generator::{
    ArtifactKind, GenerateRequest, GeneratedArtifact, GeneratorError, GeneratorPort, Heartbeat,
};
pub use renderer::{RenderError, RenderRequest, RendererPort};
pub use repositories::{BookStateRepositoryPort, BookSummary, RepositoryError};
