//! HTTP Generator Client - 调用外部 AI 生成服务
//!
//! 实现 GeneratorPort trait
//!
//! 外部生成 API:
//! POST {base_url}/api/generate
//! Headers: Idempotency-Key, Authorization: Bearer {api_key}（可选）
//! Request: {"kind": "...", "prompt": "...", "params": {...}}  (JSON)
//! Response: 图像二进制或 JSON，类型见 Content-Type；429/5xx 可带 Retry-After

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, Response};
use serde::Serialize;
use std::time::Duration;

use crate::application::ports::{
    GenerateRequest, GeneratedArtifact, GeneratorError, GeneratorPort, Heartbeat,
};
use crate::infrastructure::resilience::parse_retry_after;

/// 生成请求体 (JSON)
#[derive(Debug, Serialize)]
struct GenerateHttpRequest<'a> {
    kind: &'a str,
    prompt: &'a str,
    params: &'a serde_json::Value,
}

/// HTTP Generator 客户端配置
#[derive(Debug, Clone)]
pub struct HttpGeneratorClientConfig {
    /// 生成服务基础 URL
    pub base_url: String,
    pub api_key: Option<String>,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
    /// 等待响应期间的心跳间隔
    pub heartbeat_interval: Duration,
}

impl Default for HttpGeneratorClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8100".to_string(),
            api_key: None,
            timeout_secs: 180,
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl HttpGeneratorClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

/// HTTP Generator 客户端
pub struct HttpGeneratorClient {
    client: Client,
    config: HttpGeneratorClientConfig,
}

impl HttpGeneratorClient {
    pub fn new(config: HttpGeneratorClientConfig) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.config.base_url.trim_end_matches('/'))
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.config.base_url.trim_end_matches('/'))
    }

    fn map_send_error(e: reqwest::Error) -> GeneratorError {
        if e.is_timeout() {
            GeneratorError::Timeout
        } else if e.is_connect() {
            GeneratorError::Network(format!("Cannot connect to generator: {}", e))
        } else {
            GeneratorError::Network(e.to_string())
        }
    }

    async fn error_from_response(response: Response) -> GeneratorError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let message = response.text().await.unwrap_or_default();

        if status == 429 {
            GeneratorError::RateLimited { retry_after }
        } else {
            GeneratorError::Http {
                status,
                message,
                retry_after,
            }
        }
    }
}

#[async_trait]
impl GeneratorPort for HttpGeneratorClient {
    async fn generate(
        &self,
        request: GenerateRequest,
        heartbeat: &Heartbeat,
    ) -> Result<GeneratedArtifact, GeneratorError> {
        let body = GenerateHttpRequest {
            kind: request.kind.as_str(),
            prompt: &request.prompt,
            params: &request.params,
        };

        tracing::debug!(
            url = %self.generate_url(),
            kind = request.kind.as_str(),
            key = %request.idempotency_key,
            prompt_len = request.prompt.len(),
            "Sending generate request"
        );

        let mut builder = self
            .client
            .post(self.generate_url())
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        // 等待响应期间定期心跳
        let send = builder.send();
        tokio::pin!(send);
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        let response = loop {
            tokio::select! {
                result = &mut send => break result.map_err(Self::map_send_error)?,
                _ = ticker.tick() => heartbeat.beat(),
            }
        };

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut response = response;
        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(format!("Failed to read body: {}", e)))?
        {
            data.extend_from_slice(&chunk);
            heartbeat.beat();
        }

        if data.is_empty() {
            return Err(GeneratorError::InvalidResponse("empty body".to_string()));
        }

        tracing::info!(
            kind = request.kind.as_str(),
            key = %request.idempotency_key,
            content_type = %content_type,
            size = data.len(),
            "Generation completed"
        );

        Ok(GeneratedArtifact { data, content_type })
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.health_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpGeneratorClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8100");
        assert_eq!(config.timeout_secs, 180);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = HttpGeneratorClientConfig::new("http://gen.local:9000/")
            .with_timeout(60)
            .with_api_key(Some("secret".to_string()));
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.api_key.as_deref(), Some("secret"));

        let client = HttpGeneratorClient::new(config).unwrap();
        assert_eq!(client.generate_url(), "http://gen.local:9000/api/generate");
    }
}
