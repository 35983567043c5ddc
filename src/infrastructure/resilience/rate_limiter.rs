//! Rate Limiter - 生成服务出站准入控制
//!
//! 令牌桶（惰性补充）+ FIFO 公平的并发闸门，两者组合：先排队拿并发名额，再等令牌

use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// 令牌桶
///
/// 不变量：`0 ≤ tokens ≤ capacity`；补充在取令牌时计算，没有后台定时器
#[derive(Debug)]
pub struct RateBucket {
    capacity: f64,
    tokens: f64,
    refill_per_ms: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// 创建满桶
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_ms: refill_per_sec.max(0.0) / 1000.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_secs_f64() * 1000.0;
        self.tokens = (self.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
        self.last_refill = now;
    }

    /// 尝试消费一个令牌；不足时返回至少需要等待的时长
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        if self.refill_per_ms <= 0.0 {
            return Err(Duration::from_secs(1));
        }
        let deficit_ms = (1.0 - self.tokens) / self.refill_per_ms;
        Err(Duration::from_secs_f64(deficit_ms / 1000.0))
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// 闸门已关闭
#[derive(Debug, Error)]
#[error("Concurrency gate closed")]
pub struct GateClosed;

/// 并发闸门
///
/// 基于 tokio Semaphore，等待者严格按到达顺序获得名额
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    limit: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, GateClosed> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.limit.saturating_sub(self.semaphore.available_permits())
    }
}

/// 限流配置
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
    pub max_concurrent: usize,
    /// 令牌不足时的最短睡眠，避免忙等
    pub min_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_per_sec: 1.0,
            max_concurrent: 3,
            min_wait: Duration::from_millis(25),
        }
    }
}

/// 准入凭证，drop 时归还并发名额
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

/// Rate Limiter
///
/// 可在多本书之间共享
#[derive(Debug)]
pub struct RateLimiter {
    gate: ConcurrencyGate,
    bucket: Mutex<RateBucket>,
    min_wait: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            gate: ConcurrencyGate::new(config.max_concurrent.max(1)),
            bucket: Mutex::new(RateBucket::new(config.capacity, config.refill_per_sec)),
            min_wait: config.min_wait,
        }
    }

    /// 获取一次调用的准入
    pub async fn acquire(&self) -> Result<RatePermit, GateClosed> {
        let permit = self.gate.acquire().await?;

        loop {
            let wait = {
                let mut bucket = match self.bucket.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match bucket.try_acquire(Instant::now()) {
                    Ok(()) => return Ok(RatePermit { _permit: permit }),
                    Err(wait) => wait,
                }
            };
            let wait = wait.max(self.min_wait);
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limited, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills_lazily() {
        let mut bucket = RateBucket::new(2, 1.0);
        let start = Instant::now();
        assert!(bucket.try_acquire(start).is_ok());
        assert!(bucket.try_acquire(start).is_ok());

        let wait = bucket.try_acquire(start).unwrap_err();
        assert!(wait >= Duration::from_millis(999) && wait <= Duration::from_millis(1001));
        assert!(bucket.tokens() >= 0.0);

        // 500ms 后只补了半个令牌
        let wait = bucket
            .try_acquire(start + Duration::from_millis(500))
            .unwrap_err();
        assert!(wait <= Duration::from_millis(501));

        // 很久之后也不超过容量
        bucket.refill(start + Duration::from_secs(60));
        assert_eq!(bucket.tokens(), bucket.capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_waits_for_token() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 1,
            refill_per_sec: 2.0,
            max_concurrent: 4,
            min_wait: Duration::from_millis(25),
        });

        let start = Instant::now();
        drop(limiter.acquire().await.unwrap());
        drop(limiter.acquire().await.unwrap());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_bounds_in_flight() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            capacity: 100,
            refill_per_sec: 100.0,
            max_concurrent: 2,
            min_wait: Duration::from_millis(1),
        }));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.in_flight(), 0);
    }
}
