//! HTTP Renderer Client - 调用外部排版渲染服务
//!
//! 外部渲染 API:
//! POST {base_url}/api/render
//! Request: {"book_id", "page", "layout", "illustration_path", "targets"}  (JSON)
//! Response: {"artifacts": {"screen": "books/.../screen.png", ...}}

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::application::ports::{RenderError, RenderRequest, RendererPort};
use crate::domain::book::{BookId, PageLayout, PageSpec, RenderTarget};
use crate::infrastructure::resilience::parse_retry_after;

#[derive(Debug, Serialize)]
struct RenderHttpRequest<'a> {
    book_id: BookId,
    page: &'a PageSpec,
    layout: &'a PageLayout,
    illustration_path: &'a str,
    targets: &'a [RenderTarget],
}

#[derive(Debug, Deserialize)]
struct RenderHttpResponse {
    artifacts: BTreeMap<RenderTarget, String>,
}

/// HTTP Renderer 客户端
pub struct HttpRendererClient {
    client: Client,
    base_url: String,
}

impl HttpRendererClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, RenderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RenderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn render_url(&self) -> String {
        format!("{}/api/render", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl RendererPort for HttpRendererClient {
    async fn render(
        &self,
        request: RenderRequest,
    ) -> Result<BTreeMap<RenderTarget, String>, RenderError> {
        let body = RenderHttpRequest {
            book_id: request.book_id,
            page: &request.page,
            layout: &request.layout,
            illustration_path: &request.illustration_path,
            targets: &request.targets,
        };

        let response = self
            .client
            .post(self.render_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RenderError::Timeout
                } else {
                    RenderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            let message = response.text().await.unwrap_or_default();
            return Err(RenderError::Http {
                status: status.as_u16(),
                message,
                retry_after,
            });
        }

        let parsed: RenderHttpResponse = response
            .json()
            .await
            .map_err(|e| RenderError::InvalidResponse(e.to_string()))?;

        let missing: Vec<&RenderTarget> = request
            .targets
            .iter()
            .filter(|t| !parsed.artifacts.contains_key(t))
            .collect();
        if !missing.is_empty() {
            return Err(RenderError::InvalidResponse(format!(
                "missing targets: {:?}",
                missing
            )));
        }

        tracing::info!(
            book_id = %request.book_id,
            page_index = request.page.index,
            targets = parsed.artifacts.len(),
            "Page rendered"
        );

        Ok(parsed.artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let parsed: RenderHttpResponse = serde_json::from_str(
            r#"{"artifacts":{"screen":"books/a/pages/0/screen.png","print":"books/a/pages/0/print.png"}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.artifacts[&RenderTarget::Print],
            "books/a/pages/0/print.png"
        );
    }

    #[test]
    fn test_render_url() {
        let client = HttpRendererClient::new("http://render.local:8200/", 30).unwrap();
        assert_eq!(client.render_url(), "http://render.local:8200/api/render");
    }
}
