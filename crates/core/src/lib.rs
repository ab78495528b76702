pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod models;
pub mod retry;
pub mod traits;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use config::{AppConfig, BatchMiddlewarePolicy, TransportKind};
pub use errors::*;
pub use models::{DispatchContext, Message, MessageMetadata, Payload};
pub use retry::{RetryExecutor, RetryPolicy};
pub use traits::{
    Middleware, MiddlewareDescriptor, MonitoringSink, Next, NoopMonitoringSink, Transport,
};
