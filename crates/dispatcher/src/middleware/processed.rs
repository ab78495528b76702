use async_trait::async_trait;
use courier_core::{CourierResult, DispatchContext, Middleware, Next};

/// 将消息标记为已处理
pub struct ProcessedMarkerMiddleware;

impl ProcessedMarkerMiddleware {
    pub const PRIORITY: i32 = 100;
}

#[async_trait]
impl Middleware for ProcessedMarkerMiddleware {
    fn name(&self) -> &str {
        "processed_marker"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn handle(&self, context: &mut DispatchContext, next: Next<'_>) -> CourierResult<()> {
        context.metadata_mut().processed = Some(true);
        next.run(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Message;
    use serde_json::json;

    #[tokio::test]
    async fn test_sets_processed_flag() {
        let message = Message::from_value(json!({"a": 1}));
        let payload = message.payload.clone();
        let mut context = DispatchContext::new("orders", message);

        ProcessedMarkerMiddleware
            .handle(&mut context, Next::new(&[]))
            .await
            .unwrap();

        let message = context.into_message();
        assert_eq!(message.metadata.and_then(|m| m.processed), Some(true));
        assert_eq!(message.payload, payload);
    }
}
