//! 中间件管道及内置中间件
//!
//! | 中间件 | 优先级 |
//! |---|---|
//! | [`ValidationMiddleware`] | 300 |
//! | [`LoggingMiddleware`] | 200 |
//! | [`HeadersMiddleware`] | 100 |
//! | [`CustomHeadersMiddleware`] | 100 |
//! | [`ProcessedMarkerMiddleware`] | 100 |

pub mod chain;
pub mod custom_headers;
pub mod headers;
pub mod logging;
pub mod processed;
pub mod validation;

pub use chain::MiddlewareChain;
pub use custom_headers::CustomHeadersMiddleware;
pub use headers::HeadersMiddleware;
pub use logging::LoggingMiddleware;
pub use processed::ProcessedMarkerMiddleware;
pub use validation::ValidationMiddleware;
