//! Picbook - 儿童绘本生成编排服务
//!
//! 架构设计: DDD + CQRS + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Book Context: BookCreationState 聚合（编排器的持久记忆）、页面任务、进度事件
//! - Age Rules: 按年龄段校验与截断文本
//!
//! 应用层 (application/):
//! - Ports: 端口定义（Generator, Renderer, ArtifactStorage, ArtifactCache, Repository, Workflow）
//! - Commands: CQRS 命令处理器
//! - Queries: CQRS 查询处理器
//!
//! 基础设施层 (infrastructure/):
//! - HTTP: RESTful API + WebSocket + 产物静态服务
//! - Worker: BookWorker 编排器、页面调度与流水线
//! - Memory: BookRegistry 内存实现
//! - Resilience: 限流、重试、心跳监督
//! - Persistence: SQLite + Sled 存储
//! - Adapters: Generator / Renderer 客户端、文件存储
//! - Events: WebSocket 事件发布

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
