use async_trait::async_trait;

use crate::{models::Message, CourierResult};

/// 消息传输通道抽象接口
///
/// 每个具体实现（HTTP、AMQP）自行对错误分类：网络和超时错误返回可重试错误，
/// 消息格式或验证问题返回致命错误。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 通道名称，用于日志和监控标签
    fn name(&self) -> &str;

    /// 初始化通道，重复调用无副作用
    async fn init(&self) -> CourierResult<()>;

    /// 释放通道资源，重复调用无副作用
    async fn dispose(&self) -> CourierResult<()>;

    /// 发送单条消息到指定目标
    async fn send_message(&self, destination: &str, message: &Message) -> CourierResult<()>;

    /// 批量发送消息，整个批次作为一个投递单元
    async fn send_batch(&self, destination: &str, messages: &[Message]) -> CourierResult<()>;
}
