//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（Generator、Renderer、Storage、Cache、Repository、Workflow）
//! - commands: CQRS 命令及处理器
//! - queries: CQRS 查询及处理器
//! - error: 应用层错误定义

pub mod commands;
pub mod error;
pub mod ports;
pub mod queries;

// Re-exports
pub use commands::{
    handlers::{CreateBookHandler, CreateBookResponse, SignalAck, SignalBookHandler},
    BookCommand, CancelBook, CreateBook, PauseBook, ResumeBook, SelectCharacter, SelectCover,
    SubmitCharacterSpec, SubmitPreferences,
};

pub use error::ApplicationError;

pub use ports::{
    generate_cache_key, ArtifactCachePort, ArtifactKind, ArtifactStoragePort,
    BookStateRepositoryPort, BookSummary, BookWorkflowPort, CacheError, FailureClass,
    GenerateRequest, GeneratedArtifact, GeneratorError, GeneratorPort, Heartbeat, RenderError,
    RenderRequest, RendererPort, RepositoryError, Retryable, StorageError, WorkflowError,
    WorkflowSignal,
};

pub use queries::{
    handlers::{GetFullStateHandler, GetProgressHandler, GetWorkflowViewHandler, ListBooksHandler},
    GetFullState, GetProgress, GetWorkflowView, ListBooks,
};
