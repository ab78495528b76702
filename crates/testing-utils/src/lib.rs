//! # Courier Testing Utils
//!
//! Shared test doubles for the courier workspace: recording transports,
//! an in-memory monitoring sink, an in-memory AMQP broker and message builders.
//!
//! ```toml
//! [dev-dependencies]
//! courier-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
