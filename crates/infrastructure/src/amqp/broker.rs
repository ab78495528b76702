//! 消息代理抽象
//!
//! 连接管理器只依赖这里的三个特征。生产环境由 [`super::lapin_adapter`] 实现，
//! 测试中可以替换为内存实现。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::config::QueueOptions;
use courier_core::CourierResult;

/// 连接或通道异常时的回调
pub type ErrorObserver = Arc<dyn Fn(String) + Send + Sync>;

/// 一次发布所需的全部属性
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub body: Vec<u8>,
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub priority: Option<u8>,
    pub content_type: String,
    /// Unix 时间戳（秒）
    pub timestamp: u64,
    pub headers: BTreeMap<String, serde_json::Value>,
    pub persistent: bool,
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// 设置通道预取数量（basic.qos）
    async fn set_prefetch(&self, count: u16) -> CourierResult<()>;

    async fn declare_queue(&self, queue: &str, options: &QueueOptions) -> CourierResult<()>;

    /// 发布到默认交换机并等待代理确认
    async fn publish(&self, queue: &str, request: PublishRequest) -> CourierResult<()>;

    async fn close(&self) -> CourierResult<()>;

    fn is_open(&self) -> bool;

    fn on_error(&self, observer: ErrorObserver);
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> CourierResult<Box<dyn BrokerChannel>>;

    async fn close(&self) -> CourierResult<()>;

    fn is_connected(&self) -> bool;

    fn on_error(&self, observer: ErrorObserver);
}

/// 建立物理连接
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> CourierResult<Box<dyn BrokerConnection>>;
}
