pub mod app_config;
pub mod dispatch;
pub mod observability;
pub mod transport;

pub use app_config::AppConfig;
pub use dispatch::{BatchMiddlewarePolicy, DispatchConfig, FallbackConfig};
pub use observability::{LogFormat, LoggingConfig, MonitoringConfig};
pub use transport::{AmqpConfig, HealthCheckConfig, HttpTransportConfig, QueueOptions, TransportKind};
