use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Transport type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Http,
    Amqp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::Amqp => "amqp",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.to_lowercase().as_str() {
            "http" | "api" => Ok(TransportKind::Http),
            "amqp" | "rabbitmq" => Ok(TransportKind::Amqp),
            _ => Err(anyhow::anyhow!(
                "不支持的传输类型: {value}，支持的类型: http, amqp"
            )),
        }
    }
}

/// HTTP health check configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            path: "health".to_string(),
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpTransportConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub health_check: HealthCheckConfig,
    /// 每个请求附带的固定请求头
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout_ms: 5000,
            health_check: HealthCheckConfig::default(),
            headers: BTreeMap::new(),
        }
    }
}

impl HttpTransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.is_empty() {
            return Err(anyhow::anyhow!("HTTP基础地址不能为空"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!("HTTP基础地址必须以http://或https://开头"));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow::anyhow!("HTTP请求超时时间必须大于0"));
        }
        if self.health_check.enabled && self.health_check.interval_ms == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }
        Ok(())
    }
}

/// Queue declaration options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueOptions {
    pub durable: bool,
    pub max_priority: Option<u8>,
    pub message_ttl_ms: Option<u64>,
    pub dead_letter_exchange: Option<String>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            max_priority: Some(10),
            message_ttl_ms: Some(86_400_000), // 24小时
            dead_letter_exchange: Some("dlx".to_string()),
        }
    }
}

/// AMQP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AmqpConfig {
    pub url: String,
    pub heartbeat_secs: u16,
    /// 通道预取数量（basic.qos），0表示不设置
    pub prefetch_count: u16,
    pub connection_timeout_ms: u64,
    pub queue: QueueOptions,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost".to_string(),
            heartbeat_secs: 30,
            prefetch_count: 1,
            connection_timeout_ms: 10_000,
            queue: QueueOptions::default(),
        }
    }
}

impl AmqpConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("RabbitMQ URL不能为空"));
        }
        if !self.url.starts_with("amqp://") && !self.url.starts_with("amqps://") {
            return Err(anyhow::anyhow!("RabbitMQ URL必须是AMQP格式"));
        }
        if self.connection_timeout_ms == 0 {
            return Err(anyhow::anyhow!("RabbitMQ连接超时时间必须大于0"));
        }
        if matches!(self.queue.max_priority, Some(p) if p > 10) {
            return Err(anyhow::anyhow!("队列最大优先级不能超过10"));
        }
        Ok(())
    }
}
