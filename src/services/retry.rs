//! 限流与重试
//!
//! 全局信号量限制在途的外部调用数量。许可只在调用期间持有，退避等待时归还，
//! 这样一个反复失败的任务不会占着名额让别人干等。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::SchedulerConfig;
use crate::error::Transient;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的等待时间：`base * 2^(attempt-1)`，不超过上限
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        self.base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl From<&SchedulerConfig> for RetryPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

/// 调用结果与实际尝试次数
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: usize,
}

/// 在信号量下执行一次外部调用，可重试的失败按策略退避重试
pub async fn call_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    semaphore: &Semaphore,
    context: &str,
    mut call: F,
) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = {
            // 信号量从不关闭，获取失败时照常调用
            let _permit = semaphore.acquire().await;
            call().await
        };

        match result {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let wait = policy.backoff(attempt);
                warn!(
                    "{} 第 {}/{} 次调用失败: {}，{} 毫秒后重试",
                    context,
                    attempt,
                    policy.max_attempts,
                    e,
                    wait.as_millis()
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}
