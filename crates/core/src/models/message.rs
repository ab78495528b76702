use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息负载，任意键值结构
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// 消息元数据
///
/// 中间件只能向元数据中追加或合并字段，消息本身的 `id` 和 `payload` 保持不变。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// 优先级 0-10
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// 延迟投递时间（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_queue: Option<String>,
    /// 是否已经过中间件处理
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
}

impl MessageMetadata {
    /// 合并请求头，已存在的键会被覆盖
    pub fn merge_headers<I, K>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        for (key, value) in headers {
            self.headers.insert(key.into(), value);
        }
    }

    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|value| value.as_str())
    }
}

/// 应用消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    /// 使用随机ID和当前时间创建消息
    pub fn new(payload: Payload) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    pub fn with_id<S: Into<String>>(id: S, payload: Payload) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            payload,
            metadata: None,
        }
    }

    /// 从任意JSON值创建消息，非对象值包装在 `value` 字段下
    pub fn from_value(value: serde_json::Value) -> Self {
        let payload = match value {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = Payload::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self::new(payload)
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// 获取可变元数据，不存在时创建默认值
    pub fn metadata_mut(&mut self) -> &mut MessageMetadata {
        self.metadata.get_or_insert_with(MessageMetadata::default)
    }

    pub fn priority(&self) -> Option<u8> {
        self.metadata.as_ref().and_then(|m| m.priority)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.correlation_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serializes_camel_case() {
        let mut message = Message::with_id("msg-1", Payload::new());
        message.metadata_mut().correlation_id = Some("corr-1".to_string());
        message.metadata_mut().delay_ms = Some(500);

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["id"], "msg-1");
        assert_eq!(value["metadata"]["correlationId"], "corr-1");
        assert_eq!(value["metadata"]["delayMs"], 500);
        assert!(value["metadata"].get("headers").is_none());
    }

    #[test]
    fn test_from_value_wraps_scalars() {
        let message = Message::from_value(json!(42));
        assert_eq!(message.payload["value"], json!(42));

        let message = Message::from_value(json!({"order": 7}));
        assert_eq!(message.payload["order"], json!(7));
        assert!(!message.id.is_empty());
    }

    #[test]
    fn test_merge_headers_overrides_existing_keys() {
        let mut metadata = MessageMetadata::default();
        metadata.merge_headers([("x-a", json!("1")), ("x-b", json!("2"))]);
        metadata.merge_headers([("x-a", json!("3"))]);

        assert_eq!(metadata.header_str("x-a"), Some("3"));
        assert_eq!(metadata.header_str("x-b"), Some("2"));
    }
}
