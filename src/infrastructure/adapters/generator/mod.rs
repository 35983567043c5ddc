//! Generator Adapter - AI 生成服务客户端实现

mod fake_generator;
mod http_generator_client;

pub use fake_generator::{FakeGenerator, FakeGeneratorConfig};
pub use http_generator_client::{HttpGeneratorClient, HttpGeneratorClientConfig};
