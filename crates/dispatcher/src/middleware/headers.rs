use async_trait::async_trait;
use courier_core::{CourierResult, DispatchContext, Middleware, Next};
use serde_json::Value;

/// 写入 `x-message-id`、`x-timestamp` 和 `x-destination` 请求头
pub struct HeadersMiddleware;

impl HeadersMiddleware {
    pub const PRIORITY: i32 = 100;
}

#[async_trait]
impl Middleware for HeadersMiddleware {
    fn name(&self) -> &str {
        "headers"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn handle(&self, context: &mut DispatchContext, next: Next<'_>) -> CourierResult<()> {
        let message_id = context.message().id.clone();
        let timestamp = context.message().timestamp.to_rfc3339();
        let destination = context.destination().to_string();

        context.metadata_mut().merge_headers([
            ("x-message-id", Value::from(message_id)),
            ("x-timestamp", Value::from(timestamp)),
            ("x-destination", Value::from(destination)),
        ]);

        next.run(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{Message, MessageMetadata};
    use serde_json::json;

    #[tokio::test]
    async fn test_headers_are_merged_into_existing_metadata() {
        let mut metadata = MessageMetadata {
            priority: Some(4),
            ..Default::default()
        };
        metadata.headers.insert("x-tenant".to_string(), json!("acme"));
        let message = Message::with_id("msg-42", Default::default()).with_metadata(metadata);
        let timestamp = message.timestamp.to_rfc3339();
        let mut context = DispatchContext::new("orders", message);

        HeadersMiddleware.handle(&mut context, Next::new(&[])).await.unwrap();

        let metadata = context.message().metadata.as_ref().unwrap();
        assert_eq!(metadata.priority, Some(4));
        assert_eq!(metadata.header_str("x-tenant"), Some("acme"));
        assert_eq!(metadata.header_str("x-message-id"), Some("msg-42"));
        assert_eq!(metadata.header_str("x-destination"), Some("orders"));
        assert_eq!(metadata.header_str("x-timestamp"), Some(timestamp.as_str()));
        assert_eq!(context.message().id, "msg-42");
    }
}
