//! # 数据模型
//!
//! 消息分发层的核心数据结构。
//!
//! ### Message - 应用消息
//! 调用方创建、只被消费一次的消息，包含唯一ID、时间戳、任意键值负载和可选元数据。
//!
//! ### DispatchContext - 分发上下文
//! 单条消息经过中间件管道时的临时包装，携带目标地址和中间件之间共享的临时数据。
//!
//! ## 设计原则
//! - 时间字段使用 `DateTime<Utc>`
//! - 序列化为 camelCase JSON，与下游服务约定的消息格式一致
//! - 中间件只能合并元数据，不能替换消息ID或负载

pub mod context;
pub mod message;

pub use context::*;
pub use message::*;
