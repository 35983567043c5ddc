//! Storage Adapter - 产物文件存储实现

mod file_storage;

pub use file_storage::FileArtifactStorage;
