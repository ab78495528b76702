pub mod amqp;
pub mod enrichment;
pub mod http;
pub mod observability;
pub mod transport_factory;

pub use amqp::{AmqpTransport, ConnectionManager, ConnectionSettings, LapinConnector};
pub use enrichment::stamp_timestamp;
pub use http::HttpTransport;
pub use observability::{init_logging, install_prometheus_exporter, monitoring_sink, MetricsMonitoringSink};
pub use transport_factory::TransportFactory;
