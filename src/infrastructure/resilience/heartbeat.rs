//! Heartbeat Supervision
//!
//! 调用与看门狗并发运行：看门狗只在一个窗口内没收到心跳时才判定卡死

use std::future::Future;
use std::time::Duration;

use crate::application::ports::{GeneratorError, Heartbeat};

/// 监督超时设置
#[derive(Debug, Clone, Copy)]
pub struct SupervisionConfig {
    /// 两次心跳之间允许的最长间隔
    pub stall_timeout: Duration,
    /// 整个调用的上限
    pub call_timeout: Duration,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(45),
            call_timeout: Duration::from_secs(180),
        }
    }
}

/// 在心跳监督下执行调用
///
/// 卡死返回 `Stalled`，整体超时返回 `Timeout`，两者都是可重试失败
pub async fn supervise<T, Fut>(
    call: Fut,
    heartbeat: &Heartbeat,
    config: SupervisionConfig,
) -> Result<T, GeneratorError>
where
    Fut: Future<Output = Result<T, GeneratorError>>,
{
    let mut beats = heartbeat.subscribe();
    let stall_timeout = config.stall_timeout;

    let watchdog = async move {
        loop {
            match tokio::time::timeout(stall_timeout, beats.changed()).await {
                Ok(Ok(())) => continue,
                // 发送端随 heartbeat 存活，不会走到这里
                Ok(Err(_)) => std::future::pending::<()>().await,
                Err(_) => return stall_timeout,
            }
        }
    };

    tokio::select! {
        biased;
        result = tokio::time::timeout(config.call_timeout, call) => match result {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Timeout),
        },
        stalled = watchdog => Err(GeneratorError::Stalled(stalled)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(stall_secs: u64, call_secs: u64) -> SupervisionConfig {
        SupervisionConfig {
            stall_timeout: Duration::from_secs(stall_secs),
            call_timeout: Duration::from_secs(call_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_healthy_call_succeeds() {
        let heartbeat = Heartbeat::new();
        let beater = heartbeat.clone();

        let call = async move {
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_secs(3)).await;
                beater.beat();
            }
            Ok::<_, GeneratorError>(42)
        };

        // 总共 30s，超过 stall 窗口，但心跳不断
        let result = supervise(call, &heartbeat, config(5, 60)).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_call_is_stalled() {
        let heartbeat = Heartbeat::new();
        let call = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, GeneratorError>(())
        };

        let result = supervise(call, &heartbeat, config(5, 60)).await;
        assert!(matches!(result, Err(GeneratorError::Stalled(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_even_with_heartbeats() {
        let heartbeat = Heartbeat::new();
        let beater = heartbeat.clone();
        let call = async move {
            for _ in 0..1000 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                beater.beat();
            }
            Ok::<(), GeneratorError>(())
        };

        let result = supervise(call, &heartbeat, config(5, 20)).await;
        assert!(matches!(result, Err(GeneratorError::Timeout)));
    }
}
