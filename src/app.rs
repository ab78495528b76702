use std::sync::Arc;

use anyhow::{Context, Result};
use courier_core::{AppConfig, Message, MonitoringSink};
use courier_dispatcher::{
    BatchReport, CustomHeadersMiddleware, Dispatcher, HeadersMiddleware, LoggingMiddleware,
    ProcessedMarkerMiddleware, ValidationMiddleware,
};
use courier_infrastructure::{monitoring_sink, TransportFactory};
use tracing::info;

/// 写入 `x-service-name` 的服务名
pub const SERVICE_NAME: &str = "courier";

/// 主应用程序
///
/// 所有组件在 [`Application::build`] 中显式装配。
pub struct Application {
    config: AppConfig,
    dispatcher: Arc<Dispatcher>,
    monitoring: Arc<dyn MonitoringSink>,
}

impl Application {
    pub fn build(config: AppConfig) -> Result<Self> {
        let monitoring = monitoring_sink(&config.monitoring);
        let (primary, fallback) = TransportFactory::create_pair(&config, Arc::clone(&monitoring))
            .context("创建传输通道失败")?;

        info!(
            primary = primary.name(),
            fallback = fallback.as_ref().map(|t| t.name()).unwrap_or("none"),
            "装配消息分发器"
        );

        let dispatcher = Dispatcher::from_config(
            &config.dispatch,
            &config.fallback,
            primary,
            fallback,
            Arc::clone(&monitoring),
        );
        dispatcher.add_middleware(Arc::new(ValidationMiddleware));
        dispatcher.add_middleware(Arc::new(LoggingMiddleware::new(Arc::clone(&monitoring))));
        dispatcher.add_middleware(Arc::new(HeadersMiddleware));
        dispatcher.add_middleware(Arc::new(CustomHeadersMiddleware::from_env(SERVICE_NAME)));
        dispatcher.add_middleware(Arc::new(ProcessedMarkerMiddleware));

        Ok(Self {
            config,
            dispatcher: Arc::new(dispatcher),
            monitoring,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn monitoring(&self) -> &Arc<dyn MonitoringSink> {
        &self.monitoring
    }

    pub async fn start(&self) -> Result<()> {
        self.dispatcher.init().await.context("初始化传输通道失败")?;
        info!("应用程序已启动");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.dispatcher.dispose().await.context("释放传输通道失败")?;
        info!("应用程序已关闭");
        Ok(())
    }

    pub async fn send(&self, destination: &str, message: Message) -> Result<()> {
        let message_id = message.id.clone();
        self.dispatcher
            .send_message(destination, message)
            .await
            .with_context(|| format!("发送消息失败: {message_id}"))?;
        info!(message_id = %message_id, destination, "消息已发送");
        Ok(())
    }

    pub async fn send_batch(&self, destination: &str, messages: Vec<Message>) -> Result<BatchReport> {
        let count = messages.len();
        let report = self
            .dispatcher
            .send_batch(destination, messages)
            .await
            .with_context(|| format!("批量发送 {count} 条消息失败"))?;
        info!(
            destination,
            delivered = report.delivered,
            rejected = report.rejected.len(),
            "批量消息已发送"
        );
        Ok(report)
    }
}
