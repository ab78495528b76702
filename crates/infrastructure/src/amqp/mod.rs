pub mod broker;
pub mod connection_manager;
pub mod lapin_adapter;
pub mod transport;

pub use broker::{BrokerChannel, BrokerConnection, BrokerConnector, ErrorObserver, PublishRequest};
pub use connection_manager::{ConnectionHandle, ConnectionLease, ConnectionManager, ConnectionSettings};
pub use lapin_adapter::LapinConnector;
pub use transport::AmqpTransport;
