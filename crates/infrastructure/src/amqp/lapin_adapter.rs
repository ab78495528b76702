use std::str::FromStr;

use async_trait::async_trait;
use courier_core::config::{AmqpConfig, QueueOptions};
use courier_core::{CourierError, CourierResult};
use lapin::options::{
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::debug;

use super::broker::{BrokerChannel, BrokerConnection, BrokerConnector, ErrorObserver, PublishRequest};

/// RabbitMQ 连接器
#[derive(Debug, Clone)]
pub struct LapinConnector {
    url: String,
    heartbeat_secs: u16,
}

impl LapinConnector {
    pub fn new(config: &AmqpConfig) -> Self {
        Self {
            url: config.url.clone(),
            heartbeat_secs: config.heartbeat_secs,
        }
    }

    fn uri(&self) -> CourierResult<AMQPUri> {
        let mut uri = AMQPUri::from_str(&self.url)
            .map_err(|e| CourierError::config_error(format!("无效的RabbitMQ地址 {}: {e}", self.url)))?;
        if self.heartbeat_secs > 0 {
            uri.query.heartbeat = Some(self.heartbeat_secs);
        }
        Ok(uri)
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    async fn connect(&self) -> CourierResult<Box<dyn BrokerConnection>> {
        let uri = self.uri()?;
        let connection = Connection::connect_uri(uri, ConnectionProperties::default())
            .await
            .map_err(|e| CourierError::connection(format!("连接RabbitMQ失败: {e}")))?;

        debug!("成功连接到RabbitMQ: {}", self.url);
        Ok(Box::new(LapinConnection { connection }))
    }
}

pub struct LapinConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn create_channel(&self) -> CourierResult<Box<dyn BrokerChannel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| CourierError::connection(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| CourierError::connection(format!("开启发布确认失败: {e}")))?;

        Ok(Box::new(LapinChannel { channel }))
    }

    async fn close(&self) -> CourierResult<()> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| CourierError::connection(format!("关闭连接失败: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    fn on_error(&self, observer: ErrorObserver) {
        self.connection
            .on_error(move |error| observer(format!("RabbitMQ连接错误: {error}")));
    }
}

pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn set_prefetch(&self, count: u16) -> CourierResult<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| CourierError::connection(format!("设置预取数量失败: {e}")))
    }

    async fn declare_queue(&self, queue: &str, options: &QueueOptions) -> CourierResult<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: options.durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                queue_arguments(options),
            )
            .await
            .map_err(|e| CourierError::transport("amqp", format!("声明队列 {queue} 失败: {e}")))?;

        debug!("队列 {} 声明成功", queue);
        Ok(())
    }

    async fn publish(&self, queue: &str, request: PublishRequest) -> CourierResult<()> {
        let mut properties = BasicProperties::default()
            .with_message_id(ShortString::from(request.message_id))
            .with_content_type(ShortString::from(request.content_type))
            .with_timestamp(request.timestamp)
            .with_headers(header_table(&request.headers));
        if request.persistent {
            properties = properties.with_delivery_mode(2); // 2 = persistent
        }
        if let Some(priority) = request.priority {
            properties = properties.with_priority(priority);
        }
        if let Some(correlation_id) = request.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id));
        }

        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &request.body,
                properties,
            )
            .await
            .map_err(|e| CourierError::transport("amqp", format!("发布消息到队列 {queue} 失败: {e}")))?;

        let confirmation = confirm
            .await
            .map_err(|e| CourierError::transport("amqp", format!("消息发布确认失败: {e}")))?;
        if confirmation.is_nack() {
            return Err(CourierError::transport(
                "amqp",
                format!("代理拒绝了发布到队列 {queue} 的消息"),
            ));
        }
        Ok(())
    }

    async fn close(&self) -> CourierResult<()> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(200, "正常关闭")
            .await
            .map_err(|e| CourierError::connection(format!("关闭通道失败: {e}")))
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    fn on_error(&self, observer: ErrorObserver) {
        self.channel
            .on_error(move |error| observer(format!("RabbitMQ通道错误: {error}")));
    }
}

fn queue_arguments(options: &QueueOptions) -> FieldTable {
    let mut arguments = FieldTable::default();
    if let Some(max_priority) = options.max_priority {
        arguments.insert(
            ShortString::from("x-max-priority"),
            AMQPValue::ShortShortUInt(max_priority),
        );
    }
    if let Some(ttl) = options.message_ttl_ms {
        arguments.insert(
            ShortString::from("x-message-ttl"),
            AMQPValue::LongLongInt(i64::try_from(ttl).unwrap_or(i64::MAX)),
        );
    }
    if let Some(exchange) = &options.dead_letter_exchange {
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from(exchange.clone())),
        );
    }
    arguments
}

fn header_table(headers: &std::collections::BTreeMap<String, serde_json::Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(ShortString::from(key.clone()), amqp_value(value));
    }
    table
}

fn amqp_value(value: &serde_json::Value) -> AMQPValue {
    match value {
        serde_json::Value::Bool(flag) => AMQPValue::Boolean(*flag),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(integer) => AMQPValue::LongLongInt(integer),
            None => AMQPValue::Double(number.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(text) => AMQPValue::LongString(LongString::from(text.clone())),
        other => AMQPValue::LongString(LongString::from(other.to_string())),
    }
}
