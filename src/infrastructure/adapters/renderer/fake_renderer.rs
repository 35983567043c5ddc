//! Fake Renderer - 离线开发与测试用的渲染器
//!
//! 读取插画并按目标写出占位产物，路径与真实渲染器一致

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::application::ports::{
    keys, ArtifactStoragePort, RenderError, RenderRequest, RendererPort,
};
use crate::domain::book::RenderTarget;

/// Fake Renderer
pub struct FakeRenderer {
    storage: Arc<dyn ArtifactStoragePort>,
    latency: Duration,
    /// page_index → 总是返回的错误
    failing_pages: Mutex<HashMap<u32, RenderError>>,
    calls: AtomicUsize,
}

impl FakeRenderer {
    pub fn new(storage: Arc<dyn ArtifactStoragePort>, latency: Duration) -> Self {
        Self {
            storage,
            latency,
            failing_pages: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 指定页面的渲染总是失败
    pub fn fail_page(&self, page_index: u32, error: RenderError) {
        if let Ok(mut pages) = self.failing_pages.lock() {
            pages.insert(page_index, error);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn injected_failure(&self, page_index: u32) -> Option<RenderError> {
        self.failing_pages
            .lock()
            .ok()
            .and_then(|pages| pages.get(&page_index).cloned())
    }
}

#[async_trait]
impl RendererPort for FakeRenderer {
    async fn render(
        &self,
        request: RenderRequest,
    ) -> Result<BTreeMap<RenderTarget, String>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if let Some(error) = self.injected_failure(request.page.index) {
            return Err(error);
        }

        let illustration = self
            .storage
            .read(&request.illustration_path)
            .await
            .map_err(|e| RenderError::MissingInput(e.to_string()))?;

        let mut outputs = BTreeMap::new();
        for target in &request.targets {
            let key = keys::rendered(request.book_id, request.page.index, *target);
            let mut data = illustration.clone();
            data.extend_from_slice(
                format!(
                    "|{}|{}|{}",
                    target, request.layout.template, request.page.text
                )
                .as_bytes(),
            );
            self.storage
                .put(&key, &data)
                .await
                .map_err(|e| RenderError::Network(e.to_string()))?;
            outputs.insert(*target, key);
        }

        tracing::debug!(
            book_id = %request.book_id,
            page_index = request.page.index,
            targets = outputs.len(),
            "FakeRenderer: page rendered"
        );

        Ok(outputs)
    }
}
