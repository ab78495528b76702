use std::sync::{Arc, PoisonError, RwLock};

use courier_core::config::{DispatchConfig, FallbackConfig};
use courier_core::{
    BatchMiddlewarePolicy, CircuitBreakerConfig, CourierError, CourierResult, DispatchContext,
    ErrorKind, Message, Middleware, MonitoringSink, NoopMonitoringSink, RetryPolicy, Transport,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::middleware::MiddlewareChain;
use crate::resilient::{Delivery, ResilientTransport, SlotRole, SlotSettings};

/// 因中间件失败而未发送的消息
#[derive(Debug, Clone)]
pub struct RejectedMessage {
    pub id: String,
    pub error: CourierError,
}

/// 批量发送结果
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// 实际投递的消息数量
    pub delivered: usize,
    pub rejected: Vec<RejectedMessage>,
    /// 完成投递的通道，未发生投递时为 None
    pub role: Option<SlotRole>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// 消息分发器
///
/// 中间件管道处理后经主通道投递，主通道耗尽重试或熔断后转由备用通道投递。
/// 通道和中间件管道均以 `Arc` 快照方式读取，替换不会影响正在进行的发送。
pub struct Dispatcher {
    primary: RwLock<Arc<ResilientTransport>>,
    fallback: RwLock<Option<Arc<ResilientTransport>>>,
    chain: RwLock<Arc<MiddlewareChain>>,
    primary_settings: SlotSettings,
    fallback_settings: SlotSettings,
    batch_policy: BatchMiddlewarePolicy,
    monitoring: Arc<dyn MonitoringSink>,
    initialized: Mutex<bool>,
}

impl Dispatcher {
    pub fn builder(primary: Arc<dyn Transport>) -> DispatcherBuilder {
        DispatcherBuilder::new(primary)
    }

    /// 按配置创建分发器，未启用备用通道时忽略 `fallback`
    pub fn from_config(
        dispatch: &DispatchConfig,
        fallback_config: &FallbackConfig,
        primary: Arc<dyn Transport>,
        fallback: Option<Arc<dyn Transport>>,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> Self {
        let mut builder = DispatcherBuilder::new(primary)
            .config(dispatch.clone())
            .monitoring(monitoring);
        if let Some(retry) = &fallback_config.retry {
            builder = builder.fallback_retry(retry.clone());
        }
        if let Some(circuit_breaker) = &fallback_config.circuit_breaker {
            builder = builder.fallback_circuit_breaker(circuit_breaker.clone());
        }
        if let Some(fallback) = fallback.filter(|_| fallback_config.enabled) {
            builder = builder.fallback(fallback);
        }
        builder.build()
    }

    fn primary_slot(&self) -> Arc<ResilientTransport> {
        Arc::clone(&self.primary.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn fallback_slot(&self) -> Option<Arc<ResilientTransport>> {
        self.fallback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn chain_snapshot(&self) -> Arc<MiddlewareChain> {
        Arc::clone(&self.chain.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn primary_transport(&self) -> Arc<dyn Transport> {
        Arc::clone(self.primary_slot().transport())
    }

    pub fn fallback_transport(&self) -> Option<Arc<dyn Transport>> {
        self.fallback_slot().map(|slot| Arc::clone(slot.transport()))
    }

    /// 当前主通道（含熔断器状态）
    pub fn primary(&self) -> Arc<ResilientTransport> {
        self.primary_slot()
    }

    pub fn fallback(&self) -> Option<Arc<ResilientTransport>> {
        self.fallback_slot()
    }

    pub fn middleware_names(&self) -> Vec<String> {
        self.chain_snapshot().names()
    }

    /// 替换主通道，返回被替换的通道
    ///
    /// 新通道使用新的熔断器。通道的初始化和释放由调用方负责。
    pub fn set_strategy(&self, transport: Arc<dyn Transport>) -> Arc<dyn Transport> {
        let slot = Arc::new(ResilientTransport::new(
            transport,
            SlotRole::Primary,
            self.primary_settings.clone(),
            Arc::clone(&self.monitoring),
        ));
        info!(transport = slot.name(), "切换主通道");
        let previous = std::mem::replace(
            &mut *self.primary.write().unwrap_or_else(PoisonError::into_inner),
            slot,
        );
        Arc::clone(previous.transport())
    }

    pub fn set_fallback_strategy(&self, transport: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        let slot = Arc::new(ResilientTransport::new(
            transport,
            SlotRole::Fallback,
            self.fallback_settings.clone(),
            Arc::clone(&self.monitoring),
        ));
        info!(transport = slot.name(), "设置备用通道");
        self.fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(slot)
            .map(|previous| Arc::clone(previous.transport()))
    }

    pub fn clear_fallback_strategy(&self) -> Option<Arc<dyn Transport>> {
        let previous = self
            .fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            info!("已移除备用通道");
        }
        previous.map(|previous| Arc::clone(previous.transport()))
    }

    /// 注册中间件，正在执行的管道不受影响
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.update_chain(|chain| chain.add(middleware));
    }

    pub fn add_middleware_with_priority(&self, middleware: Arc<dyn Middleware>, priority: i32) {
        self.update_chain(|chain| chain.add_with_priority(middleware, priority));
    }

    fn update_chain(&self, update: impl FnOnce(&mut MiddlewareChain)) {
        let mut guard = self.chain.write().unwrap_or_else(PoisonError::into_inner);
        let mut chain = MiddlewareChain::clone(&guard);
        update(&mut chain);
        *guard = Arc::new(chain);
    }

    /// 初始化主通道和备用通道，已初始化时直接返回
    ///
    /// 备用通道初始化失败时会释放已初始化的主通道，再返回备用通道的错误。
    pub async fn init(&self) -> CourierResult<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        let primary = self.primary_slot();
        primary.transport().init().await?;
        if let Some(fallback) = self.fallback_slot() {
            if let Err(e) = fallback.transport().init().await {
                warn!(transport = fallback.name(), error = %e, "备用通道初始化失败，释放主通道");
                if let Err(dispose_error) = primary.transport().dispose().await {
                    warn!(transport = primary.name(), error = %dispose_error, "释放主通道失败");
                }
                return Err(e);
            }
        }

        *initialized = true;
        info!(primary = primary.name(), "消息分发器初始化完成");
        Ok(())
    }

    /// 先释放备用通道再释放主通道，未初始化时直接返回
    ///
    /// 两个通道都会尝试释放，返回遇到的第一个错误。
    pub async fn dispose(&self) -> CourierResult<()> {
        let mut initialized = self.initialized.lock().await;
        if !*initialized {
            return Ok(());
        }

        let mut first_error = None;
        if let Some(fallback) = self.fallback_slot() {
            if let Err(e) = fallback.transport().dispose().await {
                warn!(transport = fallback.name(), error = %e, "释放备用通道失败");
                first_error = Some(e);
            }
        }
        let primary = self.primary_slot();
        if let Err(e) = primary.transport().dispose().await {
            warn!(transport = primary.name(), error = %e, "释放主通道失败");
            first_error.get_or_insert(e);
        }

        *initialized = false;
        info!("消息分发器已释放");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub async fn send_message(&self, destination: &str, message: Message) -> CourierResult<()> {
        let started = Instant::now();
        let chain = self.chain_snapshot();

        let message = match run_chain(&chain, destination, message).await {
            Ok(message) => message,
            Err(e) => {
                let e = middleware_failure(e);
                self.record_failure(destination, &e);
                return Err(e);
            }
        };

        self.deliver(destination, Delivery::Single(&message), started)
            .await
            .map(|_| ())
    }

    /// 批量发送
    ///
    /// 每条消息独立经过中间件管道，通过的消息作为一个批次投递。
    #[instrument(skip(self, messages), fields(batch_size = messages.len()))]
    pub async fn send_batch(&self, destination: &str, messages: Vec<Message>) -> CourierResult<BatchReport> {
        if messages.is_empty() {
            return Ok(BatchReport::default());
        }

        let started = Instant::now();
        let chain = self.chain_snapshot();
        let mut accepted = Vec::with_capacity(messages.len());
        let mut rejected = Vec::new();

        for message in messages {
            let id = message.id.clone();
            match run_chain(&chain, destination, message).await {
                Ok(message) => accepted.push(message),
                Err(e) => {
                    let e = middleware_failure(e);
                    if self.batch_policy == BatchMiddlewarePolicy::AllOrNothing {
                        warn!(message_id = %id, error = %e, "批次中的消息未通过中间件，整个批次失败");
                        self.record_failure(destination, &e);
                        return Err(e);
                    }
                    warn!(message_id = %id, error = %e, "跳过未通过中间件的消息");
                    rejected.push(RejectedMessage { id, error: e });
                }
            }
        }

        if accepted.is_empty() {
            debug!(rejected = rejected.len(), "批次中没有可投递的消息");
            return Ok(BatchReport {
                delivered: 0,
                rejected,
                role: None,
            });
        }

        let role = self
            .deliver(destination, Delivery::Batch(&accepted), started)
            .await?;
        Ok(BatchReport {
            delivered: accepted.len(),
            rejected,
            role: Some(role),
        })
    }

    async fn deliver(
        &self,
        destination: &str,
        delivery: Delivery<'_>,
        started: Instant,
    ) -> CourierResult<SlotRole> {
        let primary = self.primary_slot();
        let fallback = self.fallback_slot();

        let primary_error = match primary.deliver(destination, delivery).await {
            Ok(()) => {
                self.record_success(destination, &primary, started);
                return Ok(SlotRole::Primary);
            }
            Err(e) => e,
        };

        // 致命错误换通道也无法成功
        if primary_error.is_fatal() {
            warn!(transport = primary.name(), error = %primary_error, "主通道返回致命错误");
            self.record_failure(destination, &primary_error);
            return Err(primary_error);
        }

        let Some(fallback) = fallback else {
            let e = CourierError::aggregate(primary_error, None);
            error!(destination, error = %e, "消息投递失败");
            self.record_failure(destination, &e);
            return Err(e);
        };

        warn!(
            primary = primary.name(),
            fallback = fallback.name(),
            error = %primary_error,
            "主通道投递失败，启用备用通道"
        );
        self.monitoring.increment(
            "dispatch_fallback_engaged",
            &[
                ("destination", destination.to_string()),
                ("transport", fallback.name().to_string()),
            ],
        );

        match fallback.deliver(destination, delivery).await {
            Ok(()) => {
                self.record_success(destination, &fallback, started);
                Ok(SlotRole::Fallback)
            }
            Err(fallback_error) => {
                let e = CourierError::aggregate(primary_error, Some(fallback_error));
                error!(destination, error = %e, "主通道和备用通道均投递失败");
                self.record_failure(destination, &e);
                Err(e)
            }
        }
    }

    fn record_success(&self, destination: &str, slot: &ResilientTransport, started: Instant) {
        let labels = [
            ("destination", destination.to_string()),
            ("transport", slot.name().to_string()),
            ("role", slot.role().as_str().to_string()),
        ];
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(destination, transport = slot.name(), elapsed_ms, "消息投递成功");
        self.monitoring.increment("dispatch_success", &labels);
        self.monitoring
            .histogram("dispatch_duration_ms", elapsed_ms, &labels);
    }

    fn record_failure(&self, destination: &str, error: &CourierError) {
        let kind = match error.kind() {
            ErrorKind::Retryable => "retryable",
            ErrorKind::Fatal => "fatal",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::AggregateFailure => "aggregate_failure",
        };
        self.monitoring.increment(
            "dispatch_failure",
            &[
                ("destination", destination.to_string()),
                ("kind", kind.to_string()),
            ],
        );
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("primary", &self.primary_slot())
            .field("fallback", &self.fallback_slot())
            .field("middlewares", &self.middleware_names())
            .field("batch_policy", &self.batch_policy)
            .finish()
    }
}

async fn run_chain(chain: &MiddlewareChain, destination: &str, message: Message) -> CourierResult<Message> {
    let mut context = DispatchContext::new(destination, message);
    chain.execute(&mut context).await?;
    Ok(context.into_message())
}

/// 中间件错误一律按致命错误处理
fn middleware_failure(error: CourierError) -> CourierError {
    if error.is_fatal() {
        error
    } else {
        CourierError::Internal(format!("中间件执行失败: {error}"))
    }
}

/// [`Dispatcher`] 构建器
pub struct DispatcherBuilder {
    primary: Arc<dyn Transport>,
    fallback: Option<Arc<dyn Transport>>,
    config: DispatchConfig,
    fallback_retry: Option<RetryPolicy>,
    fallback_circuit_breaker: Option<CircuitBreakerConfig>,
    chain: MiddlewareChain,
    monitoring: Arc<dyn MonitoringSink>,
}

impl DispatcherBuilder {
    pub fn new(primary: Arc<dyn Transport>) -> Self {
        Self {
            primary,
            fallback: None,
            config: DispatchConfig::default(),
            fallback_retry: None,
            fallback_circuit_breaker: None,
            chain: MiddlewareChain::new(),
            monitoring: Arc::new(NoopMonitoringSink),
        }
    }

    pub fn fallback(mut self, fallback: Arc<dyn Transport>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// 备用通道单独的重试策略，默认与主通道相同
    pub fn fallback_retry(mut self, retry: RetryPolicy) -> Self {
        self.fallback_retry = Some(retry);
        self
    }

    pub fn fallback_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.fallback_circuit_breaker = Some(config);
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.chain.add(middleware);
        self
    }

    pub fn monitoring(mut self, monitoring: Arc<dyn MonitoringSink>) -> Self {
        self.monitoring = monitoring;
        self
    }

    pub fn build(self) -> Dispatcher {
        let primary_settings = SlotSettings {
            retry: self.config.retry.clone(),
            circuit_breaker: self.config.circuit_breaker.clone(),
            send_timeout: self.config.send_timeout(),
        };
        let fallback_settings = SlotSettings {
            retry: self
                .fallback_retry
                .unwrap_or_else(|| self.config.retry.clone()),
            circuit_breaker: self
                .fallback_circuit_breaker
                .unwrap_or_else(|| self.config.circuit_breaker.clone()),
            send_timeout: self.config.send_timeout(),
        };

        let primary = ResilientTransport::new(
            self.primary,
            SlotRole::Primary,
            primary_settings.clone(),
            Arc::clone(&self.monitoring),
        );
        let fallback = self.fallback.map(|transport| {
            Arc::new(ResilientTransport::new(
                transport,
                SlotRole::Fallback,
                fallback_settings.clone(),
                Arc::clone(&self.monitoring),
            ))
        });

        Dispatcher {
            primary: RwLock::new(Arc::new(primary)),
            fallback: RwLock::new(fallback),
            chain: RwLock::new(Arc::new(self.chain)),
            primary_settings,
            fallback_settings,
            batch_policy: self.config.batch_policy,
            monitoring: self.monitoring,
            initialized: Mutex::new(false),
        }
    }
}
