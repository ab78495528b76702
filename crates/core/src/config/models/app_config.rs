use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    dispatch::{DispatchConfig, FallbackConfig},
    observability::{LoggingConfig, MonitoringConfig},
    transport::{AmqpConfig, HttpTransportConfig, TransportKind},
};

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/courier.toml",
    "courier.toml",
    "/etc/courier/config.toml",
];

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub primary: TransportKind,
    pub fallback: FallbackConfig,
    pub dispatch: DispatchConfig,
    pub http: HttpTransportConfig,
    pub amqp: AmqpConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: `COURIER__`, separator: `__`)
    ///
    /// An explicit `config_path` must exist. Without one the default paths are
    /// probed and a missing file is not an error.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("COURIER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 当前生效的备用通道
    pub fn fallback_transport(&self) -> Option<TransportKind> {
        self.fallback.active_transport()
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate().context("分发配置验证失败")?;
        self.fallback
            .validate(self.primary)
            .context("备用通道配置验证失败")?;

        let uses = |kind: TransportKind| {
            self.primary == kind || self.fallback_transport() == Some(kind)
        };
        if uses(TransportKind::Http) {
            self.http.validate().context("HTTP传输配置验证失败")?;
        }
        if uses(TransportKind::Amqp) {
            self.amqp.validate().context("AMQP传输配置验证失败")?;
        }

        self.monitoring.validate().context("监控配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{BatchMiddlewarePolicy, LogFormat};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.primary, TransportKind::Http);
        assert_eq!(config.fallback_transport(), Some(TransportKind::Amqp));
        assert_eq!(config.http.base_url, "http://localhost:3000");
        assert_eq!(config.http.timeout_ms, 5000);
        assert_eq!(config.amqp.url, "amqp://localhost");
        assert_eq!(config.amqp.prefetch_count, 1);
        assert_eq!(config.amqp.queue.max_priority, Some(10));
        assert_eq!(config.amqp.queue.message_ttl_ms, Some(86_400_000));
        assert_eq!(config.dispatch.retry.max_attempts, 3);
        assert_eq!(config.dispatch.retry.base_delay_ms, 1000);
        assert_eq!(config.dispatch.batch_policy, BatchMiddlewarePolicy::SkipInvalid);
        assert_eq!(config.monitoring.metrics_prefix, "messaging");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial_overrides() {
        let config = AppConfig::from_toml(
            r#"
primary = "amqp"

[fallback]
transport = "http"

[dispatch]
send_timeout_ms = 2500
batch_policy = "all_or_nothing"

[dispatch.retry]
max_attempts = 5

[amqp]
url = "amqps://broker.internal"

[logging]
format = "json"
"#,
        )
        .unwrap();

        assert_eq!(config.primary, TransportKind::Amqp);
        assert_eq!(config.fallback_transport(), Some(TransportKind::Http));
        assert_eq!(config.dispatch.send_timeout_ms, 2500);
        assert_eq!(config.dispatch.batch_policy, BatchMiddlewarePolicy::AllOrNothing);
        assert_eq!(config.dispatch.retry.max_attempts, 5);
        assert_eq!(config.dispatch.retry.base_delay_ms, 1000);
        assert_eq!(config.amqp.url, "amqps://broker.internal");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_fallback_must_differ_from_primary() {
        let result = AppConfig::from_toml(
            r#"
primary = "http"

[fallback]
transport = "http"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_disabled_fallback_skips_unused_transport_validation() {
        let config = AppConfig::from_toml(
            r#"
[fallback]
enabled = false

[amqp]
url = "not-a-broker"
"#,
        )
        .unwrap();
        assert_eq!(config.fallback_transport(), None);
    }

    #[test]
    fn test_invalid_amqp_url_rejected_when_used() {
        let mut config = AppConfig::default();
        config.amqp.url = "redis://localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_preserves_values() {
        let mut config = AppConfig::default();
        config.http.headers.insert("x-api-key".to_string(), "secret".to_string());
        config.monitoring.prometheus_listen = Some("127.0.0.1:9000".to_string());

        let rendered = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[http]
base_url = "https://api.example.com"
timeout_ms = 1500
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.http.base_url, "https://api.example.com");
        assert_eq!(config.http.timeout_ms, 1500);
        assert_eq!(config.amqp.url, "amqp://localhost");
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let result = AppConfig::load(Some("/nonexistent/courier.toml"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("配置文件不存在"));
    }
}
