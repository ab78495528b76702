use async_trait::async_trait;
use courier_core::{CourierError, CourierResult, DispatchContext, Middleware, Next};

/// 消息结构校验
pub struct ValidationMiddleware;

impl ValidationMiddleware {
    pub const PRIORITY: i32 = 300;
    const MAX_PRIORITY: u8 = 10;

    fn validate(context: &DispatchContext) -> CourierResult<()> {
        let message = context.message();

        if context.destination().trim().is_empty() {
            return Err(CourierError::validation("目标地址不能为空"));
        }
        if message.id.trim().is_empty() {
            return Err(CourierError::validation("消息ID不能为空"));
        }

        if let Some(metadata) = &message.metadata {
            if let Some(priority) = metadata.priority {
                if priority > Self::MAX_PRIORITY {
                    return Err(CourierError::validation(format!(
                        "消息优先级必须在0到{}之间: {priority}",
                        Self::MAX_PRIORITY
                    )));
                }
            }
            if matches!(&metadata.content_type, Some(content_type) if content_type.trim().is_empty()) {
                return Err(CourierError::validation("内容类型不能为空字符串"));
            }
            if matches!(&metadata.dead_letter_queue, Some(queue) if queue.trim().is_empty()) {
                return Err(CourierError::validation("死信队列名称不能为空字符串"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn handle(&self, context: &mut DispatchContext, next: Next<'_>) -> CourierResult<()> {
        Self::validate(context)?;
        next.run(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{Message, MessageMetadata};
    use serde_json::json;

    async fn run(destination: &str, message: Message) -> CourierResult<()> {
        let mut context = DispatchContext::new(destination, message);
        ValidationMiddleware.handle(&mut context, Next::new(&[])).await
    }

    fn with_metadata(metadata: MessageMetadata) -> Message {
        Message::from_value(json!({"ok": true})).with_metadata(metadata)
    }

    #[tokio::test]
    async fn test_accepts_well_formed_message() {
        let message = with_metadata(MessageMetadata {
            priority: Some(10),
            content_type: Some("application/json".to_string()),
            ..Default::default()
        });
        assert!(run("orders", message).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_priority() {
        let message = with_metadata(MessageMetadata {
            priority: Some(11),
            ..Default::default()
        });
        let error = run("orders", message).await.unwrap_err();
        assert!(matches!(error, CourierError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejects_empty_id_and_destination() {
        let message = Message::with_id("  ", Default::default());
        assert!(run("orders", message).await.is_err());

        let message = Message::from_value(json!({}));
        assert!(run("", message).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_blank_content_type() {
        let message = with_metadata(MessageMetadata {
            content_type: Some(String::new()),
            ..Default::default()
        });
        assert!(run("orders", message).await.is_err());
    }
}
