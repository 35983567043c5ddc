//! Retry Executor - 指数退避 + 抖动 + Retry-After
//!
//! 只有可重试失败会消耗重试次数；终止失败立即返回

use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::application::ports::Retryable;

/// 可信的 Retry-After 上限
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// 抖动上限，实际抖动幅度为 min(backoff, max_jitter)
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            multiplier: 1.8,
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// 第 `retry` 次重试（从 0 开始）前的基础退避
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }

    /// 叠加 ±min(backoff, max_jitter) 的随机抖动
    pub fn with_jitter(&self, backoff: Duration) -> Duration {
        let amplitude = backoff.min(self.max_jitter).as_millis() as i64;
        if amplitude == 0 {
            return backoff;
        }
        let offset = rand::thread_rng().gen_range(-amplitude..=amplitude);
        let millis = (backoff.as_millis() as i64 + offset).max(0);
        Duration::from_millis(millis as u64)
    }

    /// 计算下一次等待：合理的 Retry-After 优先，且不小于其字面值
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(delay) if delay < MAX_RETRY_AFTER => delay,
            _ => self.with_jitter(self.backoff(retry)),
        }
    }
}

/// 解析 `Retry-After` 头：秒数或 HTTP-date
///
/// 已过去的日期按 0 处理；不小于 1h 的值视为不合理，返回 None
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    let delay = if let Ok(seconds) = value.parse::<u64>() {
        Duration::from_secs(seconds)
    } else {
        let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
        (at - now).to_std().unwrap_or(Duration::ZERO)
    };
    (delay < MAX_RETRY_AFTER).then_some(delay)
}

/// 重试结果错误
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("{0}")]
    Terminal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Terminal(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Retry Executor
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 执行 `op`，传入从 1 开始的尝试序号
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::warn!(operation, attempt, error = %err, "Terminal failure, not retrying");
                return Err(RetryError::Terminal(err));
            }
            if attempt >= max_attempts {
                tracing::warn!(operation, attempts = attempt, error = %err, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.policy.delay_for(attempt - 1, err.retry_after());
            tracing::debug!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
