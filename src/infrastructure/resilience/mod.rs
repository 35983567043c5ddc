//! Resilience Layer - 外部调用防护
//!
//! - rate_limiter: 令牌桶 + 并发闸门
//! - retry: 指数退避重试（Retry-After 感知）
//! - heartbeat: 慢调用心跳监督
//! - generation: 组合以上能力的生成服务

mod generation;
mod heartbeat;
mod rate_limiter;
mod retry;

pub use generation::GenerationService;
pub use heartbeat::{supervise, SupervisionConfig};
pub use rate_limiter::{
    ConcurrencyGate, GateClosed, RateBucket, RateLimiter, RateLimiterConfig, RatePermit,
};
pub use retry::{parse_retry_after, RetryError, RetryExecutor, RetryPolicy, MAX_RETRY_AFTER};
