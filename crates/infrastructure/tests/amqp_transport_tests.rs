use std::sync::Arc;

use courier_core::config::QueueOptions;
use courier_core::Transport;
use courier_infrastructure::amqp::{AmqpTransport, ConnectionManager, ConnectionSettings};
use courier_testing_utils::{message_batch, InMemoryMonitoringSink, MessageBuilder, MockBroker};
use serde_json::json;

fn transport_for(broker: &MockBroker) -> (AmqpTransport, InMemoryMonitoringSink) {
    let monitoring = InMemoryMonitoringSink::new();
    let manager = ConnectionManager::new(Arc::new(broker.clone()), ConnectionSettings::default());
    let transport = AmqpTransport::new(manager, QueueOptions::default(), Arc::new(monitoring.clone()));
    (transport, monitoring)
}

#[tokio::test]
async fn test_send_message_publishes_with_properties() {
    let broker = MockBroker::new();
    let (transport, monitoring) = transport_for(&broker);

    let message = MessageBuilder::new()
        .with_id("msg-1")
        .with_priority(7)
        .with_delay_ms(250)
        .with_correlation_id("corr-9")
        .build();
    transport.send_message("orders", &message).await.unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 1);
    let (queue, request) = &published[0];
    assert_eq!(queue, "orders");
    assert_eq!(request.message_id, "msg-1");
    assert_eq!(request.priority, Some(7));
    assert_eq!(request.correlation_id.as_deref(), Some("corr-9"));
    assert_eq!(request.headers.get("x-delay"), Some(&json!(250)));
    assert!(request.persistent);

    assert_eq!(broker.declared_queues(), vec!["orders".to_string()]);
    assert_eq!(
        monitoring.get_metric_count_with("amqp_messages_published", &[("destination", "orders")]),
        1
    );
}

#[tokio::test]
async fn test_queue_declared_once_per_connection() {
    let broker = MockBroker::new();
    let (transport, _) = transport_for(&broker);

    for message in message_batch("m", 3) {
        transport.send_message("orders", &message).await.unwrap();
    }

    assert_eq!(broker.declared_queues().len(), 1);
    assert_eq!(broker.connect_count(), 1);
}

#[tokio::test]
async fn test_batch_publishes_every_message_in_order() {
    let broker = MockBroker::new();
    let (transport, monitoring) = transport_for(&broker);

    let messages = message_batch("b", 3);
    transport.send_batch("events", &messages).await.unwrap();

    let ids: Vec<String> = broker
        .published()
        .into_iter()
        .map(|(_, request)| request.message_id)
        .collect();
    assert_eq!(ids, vec!["b-0", "b-1", "b-2"]);
    assert_eq!(monitoring.get_metric_count("amqp_batches_published"), 1);
}

#[tokio::test]
async fn test_empty_batch_does_not_connect() {
    let broker = MockBroker::new();
    let (transport, _) = transport_for(&broker);

    transport.send_batch("events", &[]).await.unwrap();
    assert_eq!(broker.connect_count(), 0);
}

#[tokio::test]
async fn test_publish_failure_invalidates_connection() {
    let broker = MockBroker::new();
    let (transport, monitoring) = transport_for(&broker);
    let message = MessageBuilder::new().build();

    transport.send_message("orders", &message).await.unwrap();
    broker.fail_next_publishes(1);

    let error = transport.send_message("orders", &message).await.unwrap_err();
    assert!(error.is_retryable());
    assert!(!transport.connection_manager().is_connected());
    assert_eq!(monitoring.get_metric_count("amqp_publish_errors"), 1);

    transport.send_message("orders", &message).await.unwrap();
    assert_eq!(broker.connect_count(), 2);
    assert_eq!(broker.declared_queues().len(), 2);
}

#[tokio::test]
async fn test_init_and_dispose_are_idempotent() {
    let broker = MockBroker::new();
    let (transport, monitoring) = transport_for(&broker);

    transport.init().await.unwrap();
    transport.init().await.unwrap();
    assert_eq!(broker.connect_count(), 1);
    assert_eq!(monitoring.get_metric_count("amqp_initialized"), 1);

    transport.dispose().await.unwrap();
    transport.dispose().await.unwrap();
    assert_eq!(monitoring.get_metric_count("amqp_disposed"), 1);
    assert_eq!(broker.connection_close_calls(0), 1);
}

#[tokio::test]
async fn test_failed_init_can_be_retried() {
    let broker = MockBroker::new();
    broker.fail_next_connects(1);
    let (transport, _) = transport_for(&broker);

    assert!(transport.init().await.is_err());
    transport.init().await.unwrap();
    assert_eq!(broker.connect_count(), 2);
}
