//! Observability module
//!
//! - 基于 `metrics` 门面的监控接收端
//! - `tracing` 日志初始化
//! - Prometheus 指标导出

pub mod logging;
pub mod metrics_sink;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use courier_core::config::MonitoringConfig;
use courier_core::{MonitoringSink, NoopMonitoringSink};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub use logging::init_logging;
pub use metrics_sink::MetricsMonitoringSink;

/// 根据配置创建监控接收端，监控关闭时丢弃所有数据
pub fn monitoring_sink(config: &MonitoringConfig) -> Arc<dyn MonitoringSink> {
    if config.enabled {
        Arc::new(MetricsMonitoringSink::new(config.metrics_prefix.clone()))
    } else {
        Arc::new(NoopMonitoringSink)
    }
}

/// 安装 Prometheus recorder 并在指定地址提供 `/metrics`
///
/// 需要在 tokio 运行时内调用。
pub fn install_prometheus_exporter(listen: &str) -> Result<()> {
    let address: SocketAddr = listen
        .parse()
        .with_context(|| format!("无效的Prometheus监听地址: {listen}"))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("安装Prometheus导出器失败")?;

    info!(%address, "Prometheus指标导出已启动");
    Ok(())
}
