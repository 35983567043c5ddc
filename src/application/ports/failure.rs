//! Failure Classification - 外部调用失败分类
//!
//! Retry Executor 只依赖此 trait 判断是否重试

use std::time::Duration;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 可重试：429、5xx、网络错误、超时
    Retryable,
    /// 终止：其余 4xx、显式不可重试的业务错误
    Terminal,
}

/// 可分类的失败
pub trait Retryable {
    fn classify(&self) -> FailureClass;

    /// 服务端通过 `Retry-After` 给出的等待时间
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn is_retryable(&self) -> bool {
        self.classify() == FailureClass::Retryable
    }
}

/// 按 HTTP 状态码分类
pub fn classify_status(status: u16) -> FailureClass {
    match status {
        429 => FailureClass::Retryable,
        500..=599 => FailureClass::Retryable,
        _ => FailureClass::Terminal,
    }
}
