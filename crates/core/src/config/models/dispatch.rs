use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;

use super::TransportKind;

/// 批量发送时中间件失败的处理策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchMiddlewarePolicy {
    /// 跳过未通过中间件的消息，其余消息照常发送
    #[default]
    SkipInvalid,
    /// 任意一条消息失败则整个批次失败
    AllOrNothing,
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// 单次传输调用的超时时间（毫秒）
    pub send_timeout_ms: u64,
    pub batch_policy: BatchMiddlewarePolicy,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 5000,
            batch_policy: BatchMiddlewarePolicy::default(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1000,
                backoff_factor: 1.0,
                max_delay_ms: None,
                jitter_factor: 0.0,
            },
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.send_timeout_ms == 0 {
            return Err(anyhow::anyhow!("发送超时时间必须大于0"));
        }
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        Ok(())
    }
}

/// Fallback configuration
///
/// 未单独配置重试和熔断参数时沿用 `dispatch` 段的设置，但备用通道始终拥有独立的实例。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub transport: Option<TransportKind>,
    pub retry: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transport: Some(TransportKind::Amqp),
            retry: None,
            circuit_breaker: None,
        }
    }
}

impl FallbackConfig {
    /// 生效的备用通道类型
    pub fn active_transport(&self) -> Option<TransportKind> {
        if self.enabled {
            self.transport
        } else {
            None
        }
    }

    pub fn validate(&self, primary: TransportKind) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.transport {
            None => Err(anyhow::anyhow!("启用备用通道时必须指定通道类型")),
            Some(kind) if kind == primary => {
                Err(anyhow::anyhow!("备用通道不能与主通道相同: {}", kind.as_str()))
            }
            Some(_) => {
                if let Some(retry) = &self.retry {
                    retry.validate()?;
                }
                if let Some(circuit_breaker) = &self.circuit_breaker {
                    circuit_breaker.validate()?;
                }
                Ok(())
            }
        }
    }
}
