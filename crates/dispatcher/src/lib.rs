//! # Courier Dispatcher
//!
//! 消息分发：中间件管道、主备通道切换、每个通道独立的重试和熔断。
//!
//! ```no_run
//! use std::sync::Arc;
//! use courier_core::{Message, Transport};
//! use courier_dispatcher::{Dispatcher, ValidationMiddleware};
//!
//! # async fn demo(http: Arc<dyn Transport>, amqp: Arc<dyn Transport>) -> courier_core::CourierResult<()> {
//! let dispatcher = Dispatcher::builder(http)
//!     .fallback(amqp)
//!     .middleware(Arc::new(ValidationMiddleware))
//!     .build();
//!
//! dispatcher.init().await?;
//! dispatcher
//!     .send_message("orders", Message::from_value(serde_json::json!({"orderId": 7})))
//!     .await?;
//! dispatcher.dispose().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod middleware;
pub mod resilient;

pub use dispatcher::{BatchReport, Dispatcher, DispatcherBuilder, RejectedMessage};
pub use middleware::{
    CustomHeadersMiddleware, HeadersMiddleware, LoggingMiddleware, MiddlewareChain,
    ProcessedMarkerMiddleware, ValidationMiddleware,
};
pub use resilient::{Delivery, ResilientTransport, SlotRole, SlotSettings};
