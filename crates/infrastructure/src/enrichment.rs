use chrono::Utc;
use courier_core::Message;

/// 交给传输通道前刷新消息时间戳，ID、负载和元数据保持不变
pub fn stamp_timestamp(message: &Message) -> Message {
    let mut stamped = message.clone();
    stamped.timestamp = Utc::now();
    stamped
}
