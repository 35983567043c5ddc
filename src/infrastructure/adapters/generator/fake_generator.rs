//! Fake Generator - 离线开发与测试用的生成服务
//!
//! 不调用任何模型：图像返回占位 PNG，JSON 类产物按参数生成结构化内容。
//! 支持注入失败、指定 JSON 输出、模拟延迟、并发统计和按类型挂起

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::application::ports::{
    ArtifactKind, GenerateRequest, GeneratedArtifact, GeneratorError, GeneratorPort, Heartbeat,
};

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Fake Generator 配置
#[derive(Debug, Clone)]
pub struct FakeGeneratorConfig {
    /// 每次调用的模拟延迟
    pub latency: Duration,
    /// 模拟延迟期间的心跳间隔
    pub heartbeat_interval: Duration,
}

impl Default for FakeGeneratorConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(100),
        }
    }
}

/// 注入的失败
#[derive(Debug, Default)]
struct FailurePlan {
    /// 按幂等 key 依次弹出的一次性失败
    scripted: HashMap<String, VecDeque<GeneratorError>>,
    /// 幂等 key 包含该片段时总是失败
    persistent: Vec<(String, GeneratorError)>,
}

/// Fake Generator
pub struct FakeGenerator {
    config: FakeGeneratorConfig,
    failures: Mutex<FailurePlan>,
    outputs: Mutex<HashMap<ArtifactKind, Value>>,
    calls: Mutex<Vec<GenerateRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    held_kinds: Mutex<HashSet<ArtifactKind>>,
    hold: watch::Sender<u64>,
}

impl FakeGenerator {
    pub fn new(config: FakeGeneratorConfig) -> Self {
        let (hold, _) = watch::channel(0);
        Self {
            config,
            failures: Mutex::new(FailurePlan::default()),
            outputs: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            held_kinds: Mutex::new(HashSet::new()),
            hold,
        }
    }

    /// 对指定幂等 key 依次注入一次性失败
    pub fn script_failures(&self, idempotency_key: &str, errors: Vec<GeneratorError>) {
        let mut plan = lock(&self.failures);
        plan.scripted
            .entry(idempotency_key.to_string())
            .or_default()
            .extend(errors);
    }

    /// 之后该类调用都返回 `body`
    pub fn script_output(&self, kind: ArtifactKind, body: Value) {
        lock(&self.outputs).insert(kind, body);
    }

    /// key 包含 `fragment` 的调用总是失败
    pub fn fail_always(&self, fragment: &str, error: GeneratorError) {
        lock(&self.failures)
            .persistent
            .push((fragment.to_string(), error));
    }

    /// 挂起某类调用，直到 `release` 被调用
    pub fn hold(&self, kind: ArtifactKind) {
        lock(&self.held_kinds).insert(kind);
    }

    pub fn release(&self, kind: ArtifactKind) {
        lock(&self.held_kinds).remove(&kind);
        self.hold.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub fn calls(&self) -> Vec<GenerateRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, kind: ArtifactKind) -> usize {
        lock(&self.calls).iter().filter(|r| r.kind == kind).count()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn is_held(&self, kind: ArtifactKind) -> bool {
        lock(&self.held_kinds).contains(&kind)
    }

    fn injected_failure(&self, key: &str) -> Option<GeneratorError> {
        let mut plan = lock(&self.failures);
        if let Some(queue) = plan.scripted.get_mut(key) {
            if let Some(error) = queue.pop_front() {
                return Some(error);
            }
        }
        plan.persistent
            .iter()
            .find(|(fragment, _)| key.contains(fragment.as_str()))
            .map(|(_, error)| error.clone())
    }

    async fn wait_while_held(&self, kind: ArtifactKind, heartbeat: &Heartbeat) {
        let mut released = self.hold.subscribe();
        while self.is_held(kind) {
            heartbeat.beat();
            let _ = tokio::time::timeout(self.config.heartbeat_interval, released.changed()).await;
        }
    }

    async fn simulate_latency(&self, heartbeat: &Heartbeat) {
        let mut remaining = self.config.latency;
        while !remaining.is_zero() {
            let step = remaining.min(self.config.heartbeat_interval.max(Duration::from_millis(1)));
            tokio::time::sleep(step).await;
            heartbeat.beat();
            remaining = remaining.saturating_sub(step);
        }
    }

    fn produce(request: &GenerateRequest) -> GeneratedArtifact {
        if request.kind.is_image() {
            let mut data = PNG_SIGNATURE.to_vec();
            data.extend_from_slice(request.kind.as_str().as_bytes());
            data.push(b':');
            data.extend_from_slice(request.idempotency_key.as_bytes());
            return GeneratedArtifact {
                data,
                content_type: "image/png".to_string(),
            };
        }

        let page_count = request
            .params
            .get("page_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(4);

        let body = match request.kind {
            ArtifactKind::StyleAnalysis => json!({
                "summary": format!("soft picture-book style for {}", request.prompt),
                "palette": ["sky blue", "warm yellow"],
                "descriptors": ["rounded shapes", "textured paper"],
            }),
            ArtifactKind::Outline => {
                let title = request
                    .params
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("A Little Adventure");
                let pages: Vec<_> = (0..page_count)
                    .map(|i| {
                        json!({
                            "text": format!("Page {} of the story. Our friend smiles.", i + 1),
                            "illustration_prompt": format!("scene {} of {}", i + 1, title),
                        })
                    })
                    .collect();
                json!({ "title": title, "pages": pages })
            }
            ArtifactKind::Layout => {
                let pages: Vec<_> = (0..page_count)
                    .map(|i| {
                        json!({
                            "page_index": i,
                            "template": if i % 2 == 0 { "full_bleed" } else { "text_left" },
                            "text_position": "bottom",
                        })
                    })
                    .collect();
                json!({ "pages": pages })
            }
            _ => json!({}),
        };

        GeneratedArtifact {
            data: body.to_string().into_bytes(),
            content_type: "application/json".to_string(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 调用结束时归还并发计数
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GeneratorPort for FakeGenerator {
    async fn generate(
        &self,
        request: GenerateRequest,
        heartbeat: &Heartbeat,
    ) -> Result<GeneratedArtifact, GeneratorError> {
        lock(&self.calls).push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        tracing::debug!(
            kind = request.kind.as_str(),
            key = %request.idempotency_key,
            "FakeGenerator: generating"
        );

        self.wait_while_held(request.kind, heartbeat).await;
        self.simulate_latency(heartbeat).await;

        if let Some(error) = self.injected_failure(&request.idempotency_key) {
            return Err(error);
        }

        if let Some(body) = lock(&self.outputs).get(&request.kind) {
            return Ok(GeneratedArtifact {
                data: body.to_string().into_bytes(),
                content_type: "application/json".to_string(),
            });
        }
        Ok(Self::produce(&request))
    }
}
