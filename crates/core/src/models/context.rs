use std::collections::HashMap;

use super::{Message, MessageMetadata};

/// 单条消息在中间件管道中的上下文
///
/// 只在管道执行期间存在，分发完成后丢弃。消息的 `id` 和 `payload`
/// 不提供可变访问，中间件只能修改元数据和 `scratch`。
#[derive(Debug, Clone)]
pub struct DispatchContext {
    destination: String,
    message: Message,
    /// 中间件之间传递的临时数据
    pub scratch: HashMap<String, serde_json::Value>,
}

impl DispatchContext {
    pub fn new<S: Into<String>>(destination: S, message: Message) -> Self {
        Self {
            destination: destination.into(),
            message,
            scratch: HashMap::new(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn metadata_mut(&mut self) -> &mut MessageMetadata {
        self.message.metadata_mut()
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}
