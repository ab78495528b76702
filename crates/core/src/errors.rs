use thiserror::Error;

/// 错误分类
///
/// 调用方只需要根据分类决定后续动作：可重试、直接失败、熔断拒绝或主备通道均失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 瞬时错误（网络、超时、连接），允许重试并计入熔断统计
    Retryable,
    /// 致命错误（验证失败、消息格式错误），不重试
    Fatal,
    /// 熔断器拒绝调用，底层操作未被执行
    CircuitOpen,
    /// 主通道和备用通道均已耗尽
    AggregateFailure,
}

/// 消息分发错误类型定义
#[derive(Debug, Clone, Error)]
pub enum CourierError {
    #[error("连接错误: {0}")]
    Connection(String),

    #[error("传输错误 [{transport}]: {message}")]
    Transport { transport: String, message: String },

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("消息验证失败: {0}")]
    Validation(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("消息被拒绝 [{transport}] 状态码 {status}: {message}")]
    Rejected {
        transport: String,
        status: u16,
        message: String,
    },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("熔断器已打开: {breaker}")]
    CircuitOpen { breaker: String },

    #[error("{}", aggregate_message(.primary, .fallback.as_deref()))]
    AggregateFailure {
        primary: Box<CourierError>,
        fallback: Option<Box<CourierError>>,
    },

    #[error("内部错误: {0}")]
    Internal(String),
}

fn aggregate_message(primary: &CourierError, fallback: Option<&CourierError>) -> String {
    match fallback {
        Some(fallback) => format!("主通道和备用通道均发送失败: 主通道: {primary}; 备用通道: {fallback}"),
        None => format!("主通道发送失败且未配置备用通道: {primary}"),
    }
}

/// 统一的Result类型
pub type CourierResult<T> = std::result::Result<T, CourierError>;

impl CourierError {
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    pub fn transport<T: Into<String>, S: Into<String>>(transport: T, msg: S) -> Self {
        Self::Transport {
            transport: transport.into(),
            message: msg.into(),
        }
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn circuit_open<S: Into<String>>(breaker: S) -> Self {
        Self::CircuitOpen {
            breaker: breaker.into(),
        }
    }

    pub fn aggregate(primary: CourierError, fallback: Option<CourierError>) -> Self {
        Self::AggregateFailure {
            primary: Box::new(primary),
            fallback: fallback.map(Box::new),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::Connection(_)
            | CourierError::Transport { .. }
            | CourierError::Timeout(_) => ErrorKind::Retryable,
            CourierError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            CourierError::AggregateFailure { .. } => ErrorKind::AggregateFailure,
            CourierError::Validation(_)
            | CourierError::Serialization(_)
            | CourierError::Rejected { .. }
            | CourierError::Configuration(_)
            | CourierError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    pub fn is_circuit_open(&self) -> bool {
        self.kind() == ErrorKind::CircuitOpen
    }

    /// 主通道错误（仅对 AggregateFailure 有意义）
    pub fn primary_cause(&self) -> Option<&CourierError> {
        match self {
            CourierError::AggregateFailure { primary, .. } => Some(primary),
            _ => None,
        }
    }

    /// 备用通道错误，未配置备用通道时为 None
    pub fn fallback_cause(&self) -> Option<&CourierError> {
        match self {
            CourierError::AggregateFailure { fallback, .. } => fallback.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CourierError {
    fn from(err: anyhow::Error) -> Self {
        CourierError::Configuration(format!("{err:#}"))
    }
}
