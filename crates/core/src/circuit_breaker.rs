use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::traits::{MonitoringSink, NoopMonitoringSink};
use crate::{CourierError, CourierResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - calls are blocked
    Open,
    /// Circuit is half-open - probing whether the operation has recovered
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is admitted
    pub reset_timeout_ms: u64,
    /// Number of successful probes in half-open before closing circuit
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.failure_threshold == 0 {
            return Err(anyhow::anyhow!("熔断失败阈值必须大于0"));
        }
        if self.half_open_success_threshold == 0 {
            return Err(anyhow::anyhow!("半开状态成功阈值必须大于0"));
        }
        Ok(())
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    /// Failures since the circuit last closed
    pub failure_count: u32,
    /// Successful probes while half-open
    pub half_open_success_count: u32,
    pub last_failure_at: Option<Instant>,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
}

impl CircuitBreakerStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_success_count: 0,
            last_failure_at: None,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

struct BreakerInner {
    stats: CircuitBreakerStats,
    probe_in_flight: bool,
}

/// Circuit breaker guarding a single operation owner.
///
/// Only calls made through [`CircuitBreaker::execute`] observe outcomes. While a
/// half-open probe is in flight every other caller is rejected as if the circuit
/// were still open, so at most one probe runs at a time.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    monitoring: Arc<dyn MonitoringSink>,
}

impl CircuitBreaker {
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> Self {
        Self::with_monitoring(name, config, Arc::new(NoopMonitoringSink))
    }

    pub fn with_monitoring<S: Into<String>>(
        name: S,
        config: CircuitBreakerConfig,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                stats: CircuitBreakerStats::new(),
                probe_in_flight: false,
            })),
            monitoring,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute operation with circuit breaker protection
    pub async fn execute<F, Fut, T>(&self, operation: F) -> CourierResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CourierResult<T>>,
    {
        let mut permit = self.acquire()?;
        let result = operation().await;
        permit.complete(result.as_ref().err());
        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) -> CourierResult<CallPermit<'_>> {
        let mut inner = self.lock();
        let now = Instant::now();

        let probe = match inner.stats.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = inner
                    .stats
                    .last_failure_at
                    .map(|at| now.duration_since(at));
                match elapsed {
                    Some(elapsed) if elapsed <= self.config.reset_timeout() => {
                        return Err(self.reject(&mut inner));
                    }
                    _ => {
                        inner.stats.state = CircuitState::HalfOpen;
                        inner.stats.half_open_success_count = 0;
                        info!(breaker = %self.name, "熔断器进入半开状态，允许探测调用");
                        self.monitoring
                            .increment("circuit_breaker_half_open", &[("breaker", self.name.clone())]);
                        true
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.reject(&mut inner));
                }
                true
            }
        };

        if probe {
            inner.probe_in_flight = true;
        }
        inner.stats.total_calls += 1;

        Ok(CallPermit {
            breaker: self,
            probe,
            completed: false,
        })
    }

    fn reject(&self, inner: &mut BreakerInner) -> CourierError {
        inner.stats.rejected_calls += 1;
        debug!(breaker = %self.name, state = inner.stats.state.as_str(), "熔断器拒绝调用");
        self.monitoring
            .increment("circuit_breaker_rejected", &[("breaker", self.name.clone())]);
        CourierError::circuit_open(self.name.clone())
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        inner.stats.successful_calls += 1;
        if !probe {
            return;
        }
        inner.probe_in_flight = false;

        if inner.stats.state == CircuitState::HalfOpen {
            inner.stats.half_open_success_count += 1;
            if inner.stats.half_open_success_count >= self.config.half_open_success_threshold {
                inner.stats.state = CircuitState::Closed;
                inner.stats.failure_count = 0;
                inner.stats.half_open_success_count = 0;
                inner.stats.last_failure_at = None;
                info!(breaker = %self.name, "熔断器已恢复为关闭状态");
                self.monitoring
                    .increment("circuit_breaker_closed", &[("breaker", self.name.clone())]);
            }
        }
    }

    fn record_failure(&self, probe: bool, error: &CourierError) {
        let mut inner = self.lock();
        inner.stats.failed_calls += 1;
        if probe {
            inner.probe_in_flight = false;
        }

        match inner.stats.state {
            CircuitState::Closed if !probe => {
                inner.stats.failure_count += 1;
                if inner.stats.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner, error);
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.stats.failure_count += 1;
                inner.stats.half_open_success_count = 0;
                self.open(&mut inner, error);
            }
            _ => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner, error: &CourierError) {
        inner.stats.state = CircuitState::Open;
        inner.stats.last_failure_at = Some(Instant::now());
        warn!(
            breaker = %self.name,
            failure_count = inner.stats.failure_count,
            error = %error,
            "熔断器已打开"
        );
        self.monitoring
            .increment("circuit_breaker_opened", &[("breaker", self.name.clone())]);
    }

    fn release(&self, probe: bool) {
        if probe {
            self.lock().probe_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().stats.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.lock().stats.clone()
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.stats = CircuitBreakerStats::new();
        inner.probe_in_flight = false;
    }

    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.stats.state = CircuitState::Open;
        inner.stats.last_failure_at = Some(Instant::now());
        inner.probe_in_flight = false;
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission for one call. Dropping it without completing (a cancelled call)
/// frees the probe slot without a state transition.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    completed: bool,
}

impl CallPermit<'_> {
    fn complete(&mut self, error: Option<&CourierError>) {
        self.completed = true;
        match error {
            None => self.breaker.record_success(self.probe),
            // 致命错误与通道健康无关
            Some(error) if error.is_fatal() => self.breaker.release(self.probe),
            Some(error) => self.breaker.record_failure(self.probe, error),
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.release(self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(failure_threshold: u32, reset_ms: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                reset_timeout_ms: reset_ms,
                half_open_success_threshold: success_threshold,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> CourierResult<()> {
        cb.execute(|| async { Err(CourierError::connection("refused")) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> CourierResult<()> {
        cb.execute(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_state() {
        let cb = breaker(3, 100, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking_operation() {
        let cb = breaker(3, 1_000, 1);
        for _ in 0..3 {
            assert!(fail(&cb).await.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = cb
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CourierError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.stats().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_reset_timeout() {
        let cb = breaker(2, 100, 2);
        for _ in 0..2 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().half_open_success_count, 1);

        assert!(succeed(&cb).await.is_ok());
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.half_open_success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 100, 2);
        let _ = fail(&cb).await;
        let first_opened = cb.stats().last_failure_at.unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(fail(&cb).await.is_err());

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert!(stats.last_failure_at.unwrap() > first_opened);
        assert!(matches!(
            succeed(&cb).await,
            Err(CourierError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_probe_admitted() {
        let cb = Arc::new(breaker(1, 100, 1));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_cb = cb.clone();
        let probe = tokio::spawn(async move {
            probe_cb
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let invoked = AtomicU32::new(0);
        let concurrent = cb
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(concurrent, Err(CourierError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        assert!(probe.await.unwrap().is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_fatal_errors_do_not_trip_breaker() {
        let cb = breaker(1, 100, 1);
        let result: CourierResult<()> = cb
            .execute(|| async { Err(CourierError::validation("bad message")) })
            .await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn test_success_does_not_reset_failure_count_while_closed() {
        let cb = breaker(3, 100, 1);
        let _ = fail(&cb).await;
        let _ = succeed(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.stats().failure_count, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_and_force_open() {
        let cb = breaker(3, 60_000, 1);
        cb.force_open();
        assert!(succeed(&cb).await.is_err());

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_ok());
    }
}
