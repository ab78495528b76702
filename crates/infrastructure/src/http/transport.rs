use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::config::HttpTransportConfig;
use courier_core::{CourierError, CourierResult, Message, MonitoringSink, Transport};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::enrichment::stamp_timestamp;

/// HTTP 传输通道
///
/// 单条消息以 JSON 对象 POST 到 `{base_url}/{destination}`，批量消息作为一个 JSON 数组发送。
/// 绝对地址形式的目标直接使用。
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    config: HttpTransportConfig,
    monitoring: Arc<dyn MonitoringSink>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig, monitoring: Arc<dyn MonitoringSink>) -> CourierResult<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| CourierError::config_error(format!("无效的HTTP基础地址 {}: {e}", config.base_url)))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(|e| CourierError::config_error(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url,
            config,
            monitoring,
            health_task: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self, destination: &str) -> CourierResult<Url> {
        let resolved = if destination.starts_with("http://") || destination.starts_with("https://") {
            Url::parse(destination)
        } else {
            self.base_url.join(destination.trim_start_matches('/'))
        };
        resolved.map_err(|e| CourierError::validation(format!("无效的目标地址 {destination}: {e}")))
    }

    /// 立即执行一次健康检查
    pub async fn check_health(&self) -> bool {
        match self.base_url.join(&self.config.health_check.path) {
            Ok(url) => probe(&self.client, url).await,
            Err(_) => false,
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, destination: &str, body: &T) -> CourierResult<()> {
        let url = self.endpoint(destination)?;
        let bytes = serde_json::to_vec(body)?;
        let labels = [("destination", destination.to_string())];

        let outcome = match self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    let text = response.text().await.unwrap_or_default();
                    Err(classify_status(status, text))
                }
            }
            Err(error) => Err(classify_request_error(&error, self.config.timeout())),
        };

        match &outcome {
            Ok(()) => self.monitoring.increment("http_messages_sent", &labels),
            Err(error) => {
                warn!(destination, error = %error, "HTTP发送失败");
                self.monitoring.increment("http_messages_failed", &labels);
            }
        }
        outcome
    }

    fn start_health_check(&self) {
        if !self.config.health_check.enabled {
            return;
        }
        let url = match self.base_url.join(&self.config.health_check.path) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "健康检查地址无效，跳过健康检查");
                return;
            }
        };

        let client = self.client.clone();
        let monitoring = Arc::clone(&self.monitoring);
        let interval = Duration::from_millis(self.config.health_check.interval_ms);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let healthy = probe(&client, url.clone()).await;
                if !healthy {
                    warn!(url = %url, "HTTP服务健康检查失败");
                }
                monitoring.gauge("api_provider_health", if healthy { 1.0 } else { 0.0 }, &[]);
            }
        });

        let previous = self
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_health_check(&self) {
        let task = self
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.stop_health_check();
    }
}

fn default_headers(config: &HttpTransportConfig) -> CourierResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CourierError::config_error(format!("无效的请求头名称 {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CourierError::config_error(format!("无效的请求头取值: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

async fn probe(client: &Client, url: Url) -> bool {
    matches!(client.post(url).send().await, Ok(response) if response.status().is_success())
}

fn classify_status(status: StatusCode, body: String) -> CourierError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        CourierError::transport("http", format!("服务端返回 {status}: {body}"))
    } else {
        CourierError::Rejected {
            transport: "http".to_string(),
            status: status.as_u16(),
            message: body,
        }
    }
}

fn classify_request_error(error: &reqwest::Error, timeout: Duration) -> CourierError {
    if error.is_timeout() {
        CourierError::timeout(format!("HTTP请求超过 {}ms 未完成", timeout.as_millis()))
    } else if error.is_builder() {
        CourierError::validation(format!("构建HTTP请求失败: {error}"))
    } else {
        CourierError::transport("http", format!("HTTP请求失败: {error}"))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn init(&self) -> CourierResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.start_health_check();
        info!(base_url = %self.base_url, "HTTP传输通道初始化完成");
        self.monitoring.increment("http_initialized", &[]);
        Ok(())
    }

    async fn dispose(&self) -> CourierResult<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_health_check();
        info!("HTTP传输通道已释放");
        self.monitoring.increment("http_disposed", &[]);
        Ok(())
    }

    #[instrument(skip(self, message), fields(message_id = %message.id))]
    async fn send_message(&self, destination: &str, message: &Message) -> CourierResult<()> {
        self.post(destination, &stamp_timestamp(message)).await?;
        debug!("消息已发送到: {}", destination);
        Ok(())
    }

    #[instrument(skip(self, messages), fields(batch_size = messages.len()))]
    async fn send_batch(&self, destination: &str, messages: &[Message]) -> CourierResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let stamped: Vec<Message> = messages.iter().map(stamp_timestamp).collect();
        self.post(destination, &stamped).await?;
        debug!("{} 条消息已发送到: {}", messages.len(), destination);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::NoopMonitoringSink;

    fn transport(base_url: &str) -> HttpTransport {
        let config = HttpTransportConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        HttpTransport::new(config, Arc::new(NoopMonitoringSink)).unwrap()
    }

    #[test]
    fn test_endpoint_resolution() {
        let http = transport("http://localhost:3000/api");
        assert_eq!(
            http.endpoint("orders").unwrap().as_str(),
            "http://localhost:3000/api/orders"
        );
        assert_eq!(
            http.endpoint("/orders/bulk").unwrap().as_str(),
            "http://localhost:3000/api/orders/bulk"
        );
        assert_eq!(
            http.endpoint("https://hooks.example.com/in").unwrap().as_str(),
            "https://hooks.example.com/in"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        let rejected = classify_status(StatusCode::BAD_REQUEST, "bad".to_string());
        assert!(rejected.is_fatal());
        assert!(matches!(rejected, CourierError::Rejected { status: 400, .. }));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = HttpTransportConfig::default();
        config.headers.insert("bad header".to_string(), "x".to_string());
        assert!(HttpTransport::new(config, Arc::new(NoopMonitoringSink)).is_err());
    }
}
