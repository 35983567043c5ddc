//! Renderer Adapter - 排版渲染服务客户端实现

mod fake_renderer;
mod http_renderer_client;

pub use fake_renderer::FakeRenderer;
pub use http_renderer_client::HttpRendererClient;
