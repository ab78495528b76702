use courier_core::traits::{MetricLabels, MonitoringSink};
use metrics::Label;

/// 基于 `metrics` 门面的监控实现
///
/// 指标名统一加前缀，例如前缀 `messaging` 下的 `dispatch_success`
/// 记录为 `messaging_dispatch_success`。实际导出由安装的 recorder 决定。
#[derive(Debug, Clone)]
pub struct MetricsMonitoringSink {
    prefix: String,
}

impl MetricsMonitoringSink {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn metric_name(&self, metric: &str) -> String {
        if self.prefix.is_empty() {
            metric.to_string()
        } else {
            format!("{}_{}", self.prefix, metric)
        }
    }

    fn labels(labels: MetricLabels<'_>) -> Vec<Label> {
        labels
            .iter()
            .map(|(key, value)| Label::new(key.to_string(), value.clone()))
            .collect()
    }
}

impl MonitoringSink for MetricsMonitoringSink {
    fn increment(&self, metric: &str, labels: MetricLabels<'_>) {
        metrics::counter!(self.metric_name(metric), Self::labels(labels)).increment(1);
    }

    fn gauge(&self, metric: &str, value: f64, labels: MetricLabels<'_>) {
        metrics::gauge!(self.metric_name(metric), Self::labels(labels)).set(value);
    }

    fn histogram(&self, metric: &str, value: f64, labels: MetricLabels<'_>) {
        metrics::histogram!(self.metric_name(metric), Self::labels(labels)).record(value);
    }
}
