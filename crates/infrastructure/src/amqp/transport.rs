use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use courier_core::config::{AmqpConfig, QueueOptions};
use courier_core::{CourierResult, Message, MonitoringSink, Transport};
use tracing::{debug, info, instrument, warn};

use super::broker::PublishRequest;
use super::connection_manager::{ConnectionLease, ConnectionManager, ConnectionSettings};
use super::lapin_adapter::LapinConnector;
use crate::enrichment::stamp_timestamp;

const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Default)]
struct DeclaredQueues {
    generation: u64,
    queues: HashSet<String>,
}

/// RabbitMQ 传输通道
///
/// 目标地址即队列名。队列在每一代连接上首次使用时声明。
pub struct AmqpTransport {
    manager: ConnectionManager,
    queue_options: QueueOptions,
    declared: Mutex<DeclaredQueues>,
    initialized: AtomicBool,
    monitoring: Arc<dyn MonitoringSink>,
}

impl AmqpTransport {
    pub fn new(
        manager: ConnectionManager,
        queue_options: QueueOptions,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> Self {
        Self {
            manager,
            queue_options,
            declared: Mutex::new(DeclaredQueues::default()),
            initialized: AtomicBool::new(false),
            monitoring,
        }
    }

    pub fn from_config(config: &AmqpConfig, monitoring: Arc<dyn MonitoringSink>) -> Self {
        let manager = ConnectionManager::with_monitoring(
            Arc::new(LapinConnector::new(config)),
            ConnectionSettings::from(config),
            Arc::clone(&monitoring),
        );
        Self::new(manager, config.queue.clone(), monitoring)
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.manager
    }

    fn is_declared(&self, generation: u64, queue: &str) -> bool {
        let declared = self.declared.lock().unwrap_or_else(PoisonError::into_inner);
        declared.generation == generation && declared.queues.contains(queue)
    }

    fn mark_declared(&self, generation: u64, queue: &str) {
        let mut declared = self.declared.lock().unwrap_or_else(PoisonError::into_inner);
        if declared.generation != generation {
            declared.generation = generation;
            declared.queues.clear();
        }
        declared.queues.insert(queue.to_string());
    }

    async fn ensure_queue(&self, lease: &ConnectionLease, queue: &str) -> CourierResult<()> {
        let generation = lease.generation();
        if self.is_declared(generation, queue) {
            return Ok(());
        }
        lease.channel().declare_queue(queue, &self.queue_options).await?;
        self.mark_declared(generation, queue);
        Ok(())
    }

    /// 在同一个租约上依次发布，任一失败即中止
    async fn publish(&self, queue: &str, messages: &[Message]) -> CourierResult<()> {
        let requests = messages
            .iter()
            .map(|message| build_request(&stamp_timestamp(message)))
            .collect::<CourierResult<Vec<_>>>()?;

        let lease = self.manager.lease().await?;
        let outcome: CourierResult<()> = async {
            self.ensure_queue(&lease, queue).await?;
            for request in requests {
                lease.channel().publish(queue, request).await?;
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                lease.complete();
                Ok(())
            }
            Err(error) => {
                if error.is_fatal() {
                    lease.complete();
                }
                warn!(queue, error = %error, "发布消息失败");
                self.monitoring
                    .increment("amqp_publish_errors", &[("destination", queue.to_string())]);
                Err(error)
            }
        }
    }
}

fn build_request(message: &Message) -> CourierResult<PublishRequest> {
    let body = serde_json::to_vec(message)?;
    let metadata = message.metadata.as_ref();

    let mut headers = metadata.map(|m| m.headers.clone()).unwrap_or_default();
    if let Some(delay_ms) = metadata.and_then(|m| m.delay_ms) {
        headers.insert("x-delay".to_string(), serde_json::Value::from(delay_ms));
    }

    Ok(PublishRequest {
        body,
        message_id: message.id.clone(),
        correlation_id: message.correlation_id().map(str::to_string),
        priority: message.priority(),
        content_type: metadata
            .and_then(|m| m.content_type.clone())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        timestamp: u64::try_from(message.timestamp.timestamp()).unwrap_or_default(),
        headers,
        persistent: true,
    })
}

#[async_trait]
impl Transport for AmqpTransport {
    fn name(&self) -> &str {
        "amqp"
    }

    async fn init(&self) -> CourierResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.manager.activate();
        if let Err(error) = self.manager.connect().await {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(error);
        }

        info!("AMQP传输通道初始化完成");
        self.monitoring.increment("amqp_initialized", &[]);
        Ok(())
    }

    async fn dispose(&self) -> CourierResult<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.manager.dispose().await;
        info!("AMQP传输通道已释放");
        self.monitoring.increment("amqp_disposed", &[]);
        Ok(())
    }

    #[instrument(skip(self, message), fields(message_id = %message.id))]
    async fn send_message(&self, destination: &str, message: &Message) -> CourierResult<()> {
        self.publish(destination, std::slice::from_ref(message)).await?;

        debug!("消息已发布到队列: {}", destination);
        self.monitoring.increment(
            "amqp_messages_published",
            &[("destination", destination.to_string())],
        );
        Ok(())
    }

    #[instrument(skip(self, messages), fields(batch_size = messages.len()))]
    async fn send_batch(&self, destination: &str, messages: &[Message]) -> CourierResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        self.publish(destination, messages).await?;

        debug!("{} 条消息已发布到队列: {}", messages.len(), destination);
        self.monitoring.increment(
            "amqp_batches_published",
            &[("destination", destination.to_string())],
        );
        Ok(())
    }
}
