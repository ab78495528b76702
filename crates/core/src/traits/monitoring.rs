/// 监控标签
pub type MetricLabels<'a> = &'a [(&'a str, String)];

/// 监控数据接收端
///
/// 核心组件在状态转换时调用（熔断器开关、重试、启用备用通道、连接建立/断开），
/// 不规定具体后端。
pub trait MonitoringSink: Send + Sync {
    fn increment(&self, metric: &str, labels: MetricLabels<'_>);

    fn gauge(&self, metric: &str, value: f64, labels: MetricLabels<'_>);

    fn histogram(&self, metric: &str, value: f64, labels: MetricLabels<'_>);
}

/// 丢弃所有监控数据
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitoringSink;

impl MonitoringSink for NoopMonitoringSink {
    fn increment(&self, _metric: &str, _labels: MetricLabels<'_>) {}

    fn gauge(&self, _metric: &str, _value: f64, _labels: MetricLabels<'_>) {}

    fn histogram(&self, _metric: &str, _value: f64, _labels: MetricLabels<'_>) {}
}
