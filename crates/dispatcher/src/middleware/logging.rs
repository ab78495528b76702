use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use courier_core::{CourierResult, DispatchContext, Middleware, MonitoringSink, Next};
use tracing::{debug, warn};

/// 记录消息处理的开始、大小和耗时
pub struct LoggingMiddleware {
    monitoring: Arc<dyn MonitoringSink>,
}

impl LoggingMiddleware {
    pub const PRIORITY: i32 = 200;

    /// 写入 `scratch` 的处理开始时间（Unix 毫秒）
    pub const PROCESSING_START: &'static str = "processingStart";

    pub fn new(monitoring: Arc<dyn MonitoringSink>) -> Self {
        Self { monitoring }
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn handle(&self, context: &mut DispatchContext, next: Next<'_>) -> CourierResult<()> {
        let labels = [("destination", context.destination().to_string())];
        let started = Instant::now();

        self.monitoring.increment("message_processing_started", &labels);
        context.scratch.insert(
            Self::PROCESSING_START.to_string(),
            serde_json::Value::from(Utc::now().timestamp_millis()),
        );

        let size = serde_json::to_vec(context.message())?.len();
        self.monitoring.histogram("message_size", size as f64, &labels);
        debug!(
            message_id = %context.message().id,
            destination = context.destination(),
            size,
            "开始处理消息"
        );

        let result = next.run(context).await;
        match &result {
            Ok(()) => {
                self.monitoring.histogram(
                    "message_processing_ms",
                    started.elapsed().as_secs_f64() * 1000.0,
                    &labels,
                );
            }
            Err(error) => {
                warn!(message_id = %context.message().id, error = %error, "消息处理失败");
                self.monitoring.increment(
                    "message_processing_error",
                    &[
                        ("destination", context.destination().to_string()),
                        ("error", error.to_string()),
                    ],
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Message;
    use courier_testing_utils::{FailingMiddleware, InMemoryMonitoringSink};
    use courier_core::MiddlewareDescriptor;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_start_and_size() {
        let monitoring = InMemoryMonitoringSink::new();
        let middleware = LoggingMiddleware::new(Arc::new(monitoring.clone()));
        let mut context = DispatchContext::new("orders", Message::from_value(json!({"a": 1})));

        middleware.handle(&mut context, Next::new(&[])).await.unwrap();

        assert!(context.scratch.contains_key(LoggingMiddleware::PROCESSING_START));
        assert_eq!(
            monitoring.get_metric_count_with("message_processing_started", &[("destination", "orders")]),
            1
        );
        let sizes = monitoring.histogram_values("message_size");
        assert_eq!(sizes.len(), 1);
        assert!(sizes[0] > 0.0);
    }

    #[tokio::test]
    async fn test_downstream_error_is_counted_and_propagated() {
        let monitoring = InMemoryMonitoringSink::new();
        let middleware = LoggingMiddleware::new(Arc::new(monitoring.clone()));
        let rest = vec![MiddlewareDescriptor::new(Arc::new(FailingMiddleware::new("bad")))];
        let mut context = DispatchContext::new("orders", Message::from_value(json!({})));

        let result = middleware.handle(&mut context, Next::new(&rest)).await;
        assert!(result.is_err());
        assert_eq!(monitoring.get_metric_count("message_processing_error"), 1);
    }
}
