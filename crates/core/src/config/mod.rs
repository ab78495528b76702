//! 配置模块
//!
//! 配置按以下顺序叠加：内置默认值、TOML 配置文件、`COURIER__` 前缀的环境变量。
//! 例如 `COURIER__DISPATCH__SEND_TIMEOUT_MS=2000` 覆盖 `dispatch.send_timeout_ms`。
//!
//! ```rust,no_run
//! use courier_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/courier.toml"))?;
//! println!("primary transport: {}", config.primary.as_str());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod models;

pub use models::*;
