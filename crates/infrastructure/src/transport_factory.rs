use std::sync::Arc;

use courier_core::config::{AppConfig, TransportKind};
use courier_core::{CourierResult, MonitoringSink, Transport};
use tracing::{debug, info};

use crate::{AmqpTransport, HttpTransport};

pub struct TransportFactory;

impl TransportFactory {
    pub fn create(
        kind: TransportKind,
        config: &AppConfig,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> CourierResult<Arc<dyn Transport>> {
        debug!("Creating transport with type: {:?}", kind);

        match kind {
            TransportKind::Http => {
                info!("Initializing HTTP transport: {}", config.http.base_url);
                let http = HttpTransport::new(config.http.clone(), monitoring)?;
                Ok(Arc::new(http))
            }
            TransportKind::Amqp => {
                info!("Initializing AMQP transport: {}", config.amqp.url);
                Ok(Arc::new(AmqpTransport::from_config(&config.amqp, monitoring)))
            }
        }
    }

    /// 按配置创建主通道和可选的备用通道
    pub fn create_pair(
        config: &AppConfig,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> CourierResult<(Arc<dyn Transport>, Option<Arc<dyn Transport>>)> {
        let primary = Self::create(config.primary, config, Arc::clone(&monitoring))?;
        let fallback = config
            .fallback_transport()
            .map(|kind| Self::create(kind, config, monitoring))
            .transpose()?;
        Ok((primary, fallback))
    }
}
