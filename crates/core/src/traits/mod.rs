pub mod middleware;
pub mod monitoring;
pub mod transport;

pub use middleware::*;
pub use monitoring::*;
pub use transport::*;
