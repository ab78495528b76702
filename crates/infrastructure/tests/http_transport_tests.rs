use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use courier_core::config::{HealthCheckConfig, HttpTransportConfig};
use courier_core::{CourierError, Transport};
use courier_infrastructure::HttpTransport;
use courier_testing_utils::{eventually, message_batch, InMemoryMonitoringSink, MessageBuilder};
use serde_json::Value;

type Received = Arc<Mutex<Vec<Value>>>;

async fn record(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
    received.lock().unwrap().push(body);
    StatusCode::OK
}

async fn unavailable() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn bad_request() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, "missing field")
}

async fn slow() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK
}

async fn healthy() -> StatusCode {
    StatusCode::OK
}

async fn start_server() -> (SocketAddr, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/orders", post(record))
        .route("/unavailable", post(unavailable))
        .route("/bad", post(bad_request))
        .route("/slow", post(slow))
        .route("/health", post(healthy))
        .with_state(Arc::clone(&received));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, received)
}

fn transport(addr: SocketAddr, timeout_ms: u64) -> (HttpTransport, InMemoryMonitoringSink) {
    let monitoring = InMemoryMonitoringSink::new();
    let config = HttpTransportConfig {
        base_url: format!("http://{addr}"),
        timeout_ms,
        health_check: HealthCheckConfig {
            enabled: true,
            interval_ms: 20,
            path: "health".to_string(),
        },
        ..Default::default()
    };
    let http = HttpTransport::new(config, Arc::new(monitoring.clone())).unwrap();
    (http, monitoring)
}

#[tokio::test]
async fn test_send_message_posts_json_object() {
    let (addr, received) = start_server().await;
    let (http, monitoring) = transport(addr, 1000);

    let message = MessageBuilder::new()
        .with_id("order-1")
        .with_field("amount", Value::from(42))
        .with_priority(3)
        .build();
    http.send_message("orders", &message).await.unwrap();

    let received = received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["id"], "order-1");
    assert_eq!(received[0]["payload"]["amount"], 42);
    assert_eq!(received[0]["metadata"]["priority"], 3);
    assert_eq!(
        monitoring.get_metric_count_with("http_messages_sent", &[("destination", "orders")]),
        1
    );
}

#[tokio::test]
async fn test_batch_is_one_request_with_array_body() {
    let (addr, received) = start_server().await;
    let (http, _) = transport(addr, 1000);

    http.send_batch("orders", &message_batch("b", 2)).await.unwrap();

    let received = received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    let items = received[0].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], "b-0");
    assert_eq!(items[1]["id"], "b-1");
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let (addr, _) = start_server().await;
    let (http, monitoring) = transport(addr, 1000);

    let error = http
        .send_message("unavailable", &MessageBuilder::new().build())
        .await
        .unwrap_err();

    assert!(matches!(error, CourierError::Transport { .. }));
    assert!(error.is_retryable());
    assert_eq!(monitoring.get_metric_count("http_messages_failed"), 1);
}

#[tokio::test]
async fn test_client_error_is_fatal() {
    let (addr, _) = start_server().await;
    let (http, _) = transport(addr, 1000);

    let error = http
        .send_message("bad", &MessageBuilder::new().build())
        .await
        .unwrap_err();

    match error {
        CourierError::Rejected { status, message, .. } => {
            assert_eq!(status, 400);
            assert_eq!(message, "missing field");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let (addr, _) = start_server().await;
    let (http, _) = transport(addr, 100);

    let error = http
        .send_message("slow", &MessageBuilder::new().build())
        .await
        .unwrap_err();

    assert!(matches!(error, CourierError::Timeout(_)));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_unreachable_server_is_retryable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (http, _) = transport(addr, 1000);
    let error = http
        .send_message("orders", &MessageBuilder::new().build())
        .await
        .unwrap_err();

    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_health_check_runs_between_init_and_dispose() {
    let (addr, _) = start_server().await;
    let (http, monitoring) = transport(addr, 1000);

    assert!(http.check_health().await);

    http.init().await.unwrap();
    http.init().await.unwrap();
    assert!(
        eventually(
            || monitoring.gauge_value("api_provider_health") == Some(1.0),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(monitoring.get_metric_count("http_initialized"), 1);

    http.dispose().await.unwrap();
    http.dispose().await.unwrap();
    assert_eq!(monitoring.get_metric_count("http_disposed"), 1);
}
