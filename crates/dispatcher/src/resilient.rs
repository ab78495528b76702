use std::sync::Arc;
use std::time::Duration;

use courier_core::circuit_breaker::CircuitBreakerConfig;
use courier_core::{
    CircuitBreaker, CourierError, CourierResult, Message, MonitoringSink, RetryExecutor,
    RetryPolicy, Transport,
};
use tracing::{debug, warn};

/// 通道角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRole {
    Primary,
    Fallback,
}

impl SlotRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotRole::Primary => "primary",
            SlotRole::Fallback => "fallback",
        }
    }
}

/// 单个通道的重试、熔断和超时参数
#[derive(Debug, Clone)]
pub struct SlotSettings {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub send_timeout: Duration,
}

/// 一次投递的内容，单条消息或整个批次
#[derive(Debug, Clone, Copy)]
pub enum Delivery<'a> {
    Single(&'a Message),
    Batch(&'a [Message]),
}

impl Delivery<'_> {
    pub fn len(&self) -> usize {
        match self {
            Delivery::Single(_) => 1,
            Delivery::Batch(messages) => messages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 带熔断器和重试执行器的传输通道
///
/// 每次尝试依次经过：重试（外层）→ 熔断器 → 发送超时。熔断器打开时拒绝错误不可重试，
/// 重试循环会立即结束。
pub struct ResilientTransport {
    transport: Arc<dyn Transport>,
    role: SlotRole,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
    send_timeout: Duration,
    monitoring: Arc<dyn MonitoringSink>,
}

impl ResilientTransport {
    pub fn new(
        transport: Arc<dyn Transport>,
        role: SlotRole,
        settings: SlotSettings,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> Self {
        let breaker_name = format!("{}-{}", transport.name(), role.as_str());
        Self {
            breaker: CircuitBreaker::with_monitoring(
                breaker_name,
                settings.circuit_breaker,
                Arc::clone(&monitoring),
            ),
            retry: RetryExecutor::new(settings.retry),
            send_timeout: settings.send_timeout,
            transport,
            role,
            monitoring,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn name(&self) -> &str {
        self.transport.name()
    }

    pub fn role(&self) -> SlotRole {
        self.role
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// 投递消息，返回最后一次尝试的错误
    pub async fn deliver(&self, destination: &str, delivery: Delivery<'_>) -> CourierResult<()> {
        let labels = [
            ("destination", destination.to_string()),
            ("transport", self.name().to_string()),
            ("role", self.role.as_str().to_string()),
        ];

        self.retry
            .execute_with(
                move |attempt| async move {
                    if attempt > 1 {
                        debug!(transport = self.name(), attempt, "重新尝试投递");
                    }
                    self.breaker
                        .execute(|| self.attempt(destination, delivery))
                        .await
                },
                CourierError::is_retryable,
                |error, attempt| {
                    warn!(
                        transport = self.name(),
                        role = self.role.as_str(),
                        attempt,
                        error = %error,
                        "投递失败，准备重试"
                    );
                    self.monitoring.increment("dispatch_retry", &labels);
                },
            )
            .await
    }

    async fn attempt(&self, destination: &str, delivery: Delivery<'_>) -> CourierResult<()> {
        let send = async {
            match delivery {
                Delivery::Single(message) => self.transport.send_message(destination, message).await,
                Delivery::Batch(messages) => self.transport.send_batch(destination, messages).await,
            }
        };

        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(CourierError::timeout(format!(
                "{} 通道发送超过 {}ms 未完成",
                self.name(),
                self.send_timeout.as_millis()
            ))),
        }
    }
}

impl std::fmt::Debug for ResilientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientTransport")
            .field("transport", &self.name())
            .field("role", &self.role)
            .field("breaker", &self.breaker)
            .field("send_timeout", &self.send_timeout)
            .finish()
    }
}
