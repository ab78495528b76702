use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::CourierError;

/// 未配置最大间隔时的退避上限（24小时）
pub const UNBOUNDED_MAX_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含首次调用）
    pub max_attempts: u32,
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_factor: f64,
    /// 最大重试间隔（毫秒），为空表示不限制
    pub max_delay_ms: Option<u64>,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: None,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            backoff_factor,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }
        if !(self.backoff_factor >= 1.0) {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0到1之间"));
        }
        Ok(())
    }

    /// 第 `attempt` 次失败后的等待时间：`base * factor^(attempt-1)`
    ///
    /// 未配置 `max_delay_ms` 时以 [`UNBOUNDED_MAX_DELAY_MS`] 为上限。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap_ms = self.max_delay_ms.unwrap_or(UNBOUNDED_MAX_DELAY_MS) as f64;
        let mut delay_ms = (self.base_delay_ms as f64 * self.backoff_factor.powi(exponent)).min(cap_ms);

        if self.jitter_factor > 0.0 && delay_ms > 0.0 {
            let spread = delay_ms * self.jitter_factor;
            delay_ms += rand::rng().random_range(-spread..=spread);
        }

        Duration::from_millis(delay_ms.max(0.0).round() as u64)
    }
}

/// 重试执行器
///
/// 只负责计时和计数，操作本身的幂等性由调用方保证。
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

    /// 按默认规则重试：只有可重试错误才会再次尝试
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, CourierError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CourierError>>,
    {
        self.execute_with(operation, CourierError::is_retryable, |_, _| {})
            .await
    }

    /// 执行操作，`should_retry` 判定错误是否值得重试，`on_retry` 在每次等待前调用
    ///
    /// 尝试次数从1开始。最后一次失败的错误原样返回。
    pub async fn execute_with<F, Fut, T, E, P, O>(
        &self,
        mut operation: F,
        should_retry: P,
        mut on_retry: O,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        O: FnMut(&E, u32),
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= max_attempts || !should_retry(&error) {
                        return Err(error);
                    }

                    on_retry(&error, attempt);
                    let delay = self.policy.delay_for(attempt);
                    debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "等待后重试");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_delay_formula() {
        let policy = RetryPolicy::new(5, 100, 2.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_by_max_delay() {
        let policy = RetryPolicy {
            max_delay_ms: Some(250),
            ..RetryPolicy::new(5, 100, 2.0)
        };
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicy {
            jitter_factor: 0.1,
            ..RetryPolicy::new(3, 1000, 1.0)
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1).as_millis();
            assert!((900..=1100).contains(&delay));
        }
    }

    #[test]
    fn test_large_attempt_without_max_delay_is_capped() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..RetryPolicy::new(u32::MAX, 1000, 10.0)
        };
        let delay = policy.delay_for(5_000).as_millis() as u64;
        assert!(delay <= UNBOUNDED_MAX_DELAY_MS + UNBOUNDED_MAX_DELAY_MS / 2);
        assert!(delay >= UNBOUNDED_MAX_DELAY_MS / 2);

        let no_jitter = RetryPolicy::new(u32::MAX, 1000, 10.0);
        assert_eq!(
            no_jitter.delay_for(u32::MAX),
            Duration::from_millis(UNBOUNDED_MAX_DELAY_MS)
        );
        assert_eq!(RetryPolicy::new(3, 0, 10.0).delay_for(500), Duration::ZERO);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::new(0, 100, 1.0).validate().is_err());
        assert!(RetryPolicy::new(3, 100, 0.5).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let executor = RetryExecutor::new(RetryPolicy::new(3, 1000, 1.0));
        let invocations = AtomicU32::new(0);
        let failures = Mutex::new(Vec::new());
        let started = tokio::time::Instant::now();

        let result = executor
            .execute_with(
                |attempt| {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(CourierError::connection("refused"))
                        } else {
                            Ok("sent")
                        }
                    }
                },
                CourierError::is_retryable,
                |_, attempt| failures.lock().unwrap().push(attempt),
            )
            .await;

        assert_eq!(result.unwrap(), "sent");
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(*failures.lock().unwrap(), vec![1, 2]);
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_error_returned_unmodified() {
        let executor = RetryExecutor::new(RetryPolicy::new(2, 10, 1.0));
        let result: Result<(), CourierError> = executor
            .execute(|attempt| async move {
                Err(CourierError::transport("amqp", format!("attempt {attempt}")))
            })
            .await;

        match result {
            Err(CourierError::Transport { message, .. }) => assert_eq!(message, "attempt 2"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let executor = RetryExecutor::new(RetryPolicy::new(5, 10, 1.0));
        let invocations = AtomicU32::new(0);
        let observed = AtomicU32::new(0);

        let result: Result<(), CourierError> = executor
            .execute_with(
                |_| {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    async { Err(CourierError::validation("missing id")) }
                },
                CourierError::is_retryable,
                |_, _| {
                    observed.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert!(matches!(result, Err(CourierError::Validation(_))));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(observed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_error_type() {
        let executor = RetryExecutor::new(RetryPolicy::new(3, 5, 2.0));
        let result: Result<u32, &str> = executor
            .execute_with(
                |attempt| async move { if attempt == 2 { Ok(attempt) } else { Err("boom") } },
                |_| true,
                |_, _| {},
            )
            .await;
        assert_eq!(result, Ok(2));
    }
}
