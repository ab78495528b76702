use async_trait::async_trait;
use chrono::Utc;
use courier_core::{CourierResult, DispatchContext, Middleware, Next};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// 写入服务标识类请求头
///
/// `x-request-id` 每条消息重新生成，`x-timestamp` 为处理时刻。
pub struct CustomHeadersMiddleware {
    service_name: String,
    environment: String,
}

impl CustomHeadersMiddleware {
    pub const PRIORITY: i32 = 100;
    pub const ENVIRONMENT_VAR: &'static str = "COURIER_ENVIRONMENT";

    pub fn new<S: Into<String>, E: Into<String>>(service_name: S, environment: E) -> Self {
        Self {
            service_name: service_name.into(),
            environment: environment.into(),
        }
    }

    /// 环境名取自 `COURIER_ENVIRONMENT`，未设置时为 `development`
    pub fn from_env<S: Into<String>>(service_name: S) -> Self {
        let environment =
            std::env::var(Self::ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());
        Self::new(service_name, environment)
    }
}

#[async_trait]
impl Middleware for CustomHeadersMiddleware {
    fn name(&self) -> &str {
        "custom_headers"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn handle(&self, context: &mut DispatchContext, next: Next<'_>) -> CourierResult<()> {
        context.metadata_mut().merge_headers([
            ("x-service-name", Value::from(self.service_name.clone())),
            ("x-request-id", Value::from(Uuid::new_v4().to_string())),
            ("x-timestamp", Value::from(Utc::now().to_rfc3339())),
            ("x-environment", Value::from(self.environment.clone())),
        ]);
        debug!(message_id = %context.message().id, "已添加自定义请求头");

        next.run(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Message;
    use serde_json::json;

    #[tokio::test]
    async fn test_adds_service_headers() {
        let middleware = CustomHeadersMiddleware::new("messaging", "staging");
        let mut first = DispatchContext::new("orders", Message::from_value(json!({})));
        let mut second = DispatchContext::new("orders", Message::from_value(json!({})));

        middleware.handle(&mut first, Next::new(&[])).await.unwrap();
        middleware.handle(&mut second, Next::new(&[])).await.unwrap();

        let headers = &first.message().metadata.as_ref().unwrap().headers;
        assert_eq!(headers["x-service-name"], "messaging");
        assert_eq!(headers["x-environment"], "staging");
        assert!(headers.contains_key("x-timestamp"));

        let request_id = |context: &DispatchContext| {
            context.message().metadata.as_ref().unwrap().header_str("x-request-id").map(str::to_string)
        };
        assert_ne!(request_id(&first), request_id(&second));
    }
}
