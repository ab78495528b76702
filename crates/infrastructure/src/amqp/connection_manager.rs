use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use courier_core::config::AmqpConfig;
use courier_core::{CourierError, CourierResult, MonitoringSink, NoopMonitoringSink};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle as RuntimeHandle;
use tracing::{debug, info, warn};

use super::broker::{BrokerChannel, BrokerConnection, BrokerConnector, ErrorObserver};

/// 连接管理器参数
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// 通道预取数量，0表示不设置
    pub prefetch_count: u16,
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            prefetch_count: 1,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AmqpConfig> for ConnectionSettings {
    fn from(config: &AmqpConfig) -> Self {
        Self {
            prefetch_count: config.prefetch_count,
            connect_timeout: config.connection_timeout(),
        }
    }
}

/// 一个已建立的连接及其通道
///
/// 同一时刻每个管理器只缓存一个有效句柄。使用方只能使其失效，由管理器负责关闭。
pub struct ConnectionHandle {
    generation: u64,
    connection: Box<dyn BrokerConnection>,
    channel: Box<dyn BrokerChannel>,
    valid: AtomicBool,
}

impl ConnectionHandle {
    fn new(
        generation: u64,
        connection: Box<dyn BrokerConnection>,
        channel: Box<dyn BrokerChannel>,
    ) -> Self {
        Self {
            generation,
            connection,
            channel,
            valid: AtomicBool::new(true),
        }
    }

    /// 连接代数，每次物理连接递增
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn channel(&self) -> &dyn BrokerChannel {
        self.channel.as_ref()
    }

    pub fn connection(&self) -> &dyn BrokerConnection {
        self.connection.as_ref()
    }

    /// 未被标记失效，且连接和通道都处于打开状态
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire) && self.connection.is_connected() && self.channel.is_open()
    }

    fn mark_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// 先关闭通道再关闭连接，关闭错误只记录日志
    async fn close(&self) {
        if let Err(e) = self.channel.close().await {
            debug!(generation = self.generation, error = %e, "关闭AMQP通道失败");
        }
        if let Err(e) = self.connection.close().await {
            debug!(generation = self.generation, error = %e, "关闭AMQP连接失败");
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("generation", &self.generation)
            .field("valid", &self.valid.load(Ordering::Acquire))
            .finish()
    }
}

type ConnectAttempt = Shared<BoxFuture<'static, CourierResult<Arc<ConnectionHandle>>>>;

enum ConnectionState {
    Idle,
    Connecting {
        generation: u64,
        attempt: ConnectAttempt,
    },
    Open(Arc<ConnectionHandle>),
    Disposed,
}

struct ManagerInner {
    connector: Arc<dyn BrokerConnector>,
    settings: ConnectionSettings,
    state: Mutex<ConnectionState>,
    generations: AtomicU64,
    monitoring: Arc<dyn MonitoringSink>,
}

/// AMQP 连接生命周期管理
///
/// 并发调用 [`connect`](Self::connect) 时只会发起一次物理连接，所有等待方得到同一个结果。
/// 连接或通道报告错误、租约异常结束、句柄检查失败时缓存被清空，下一次调用重新连接。
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, settings: ConnectionSettings) -> Self {
        Self::with_monitoring(connector, settings, Arc::new(NoopMonitoringSink))
    }

    pub fn with_monitoring(
        connector: Arc<dyn BrokerConnector>,
        settings: ConnectionSettings,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connector,
                settings,
                state: Mutex::new(ConnectionState::Idle),
                generations: AtomicU64::new(0),
                monitoring,
            }),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// 获取有效连接，必要时建立新连接
    pub async fn connect(&self) -> CourierResult<Arc<ConnectionHandle>> {
        let attempt = {
            let mut state = self.inner.lock_state();
            match &*state {
                ConnectionState::Disposed => {
                    return Err(CourierError::connection("连接管理器已释放"));
                }
                ConnectionState::Open(handle) if handle.is_valid() => {
                    return Ok(Arc::clone(handle));
                }
                ConnectionState::Connecting { attempt, .. } => attempt.clone(),
                _ => self.inner.begin_connect(&mut state),
            }
        };

        attempt.await
    }

    /// 在已有连接上创建新通道
    ///
    /// 通道创建失败视同连接失败，句柄随之失效。
    pub async fn create_channel(
        &self,
        handle: &ConnectionHandle,
    ) -> CourierResult<Box<dyn BrokerChannel>> {
        match open_channel(handle.connection(), self.inner.settings.prefetch_count).await {
            Ok(channel) => {
                channel.on_error(self.inner.observer(handle.generation()));
                Ok(channel)
            }
            Err(error) => {
                self.invalidate(handle, "创建通道失败");
                Err(error)
            }
        }
    }

    /// 使句柄失效，仅当它仍是当前缓存的句柄时才清空缓存
    pub fn invalidate(&self, handle: &ConnectionHandle, reason: &str) {
        handle.mark_invalid();
        self.inner.invalidate_generation(handle.generation(), reason, None);
    }

    /// 获取连接租约
    ///
    /// 租约在未调用 [`ConnectionLease::complete`] 的情况下被释放（出错、超时或任务取消），
    /// 对应的连接会被视为不可用。
    pub async fn lease(&self) -> CourierResult<ConnectionLease> {
        let handle = self.connect().await?;
        Ok(ConnectionLease {
            handle,
            manager: Arc::downgrade(&self.inner),
            completed: false,
        })
    }

    pub fn is_connected(&self) -> bool {
        matches!(&*self.inner.lock_state(), ConnectionState::Open(handle) if handle.is_valid())
    }

    pub fn is_disposed(&self) -> bool {
        matches!(&*self.inner.lock_state(), ConnectionState::Disposed)
    }

    /// 释放后重新允许建立连接
    pub fn activate(&self) {
        let mut state = self.inner.lock_state();
        if matches!(&*state, ConnectionState::Disposed) {
            *state = ConnectionState::Idle;
        }
    }

    /// 关闭当前连接，重复调用无副作用
    pub async fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.inner.lock_state(), ConnectionState::Disposed);

        match previous {
            ConnectionState::Open(handle) => {
                handle.mark_invalid();
                handle.close().await;
                self.inner.monitoring.gauge("amqp_connection_open", 0.0, &[]);
                info!(generation = handle.generation(), "AMQP连接已关闭");
            }
            ConnectionState::Connecting { generation, .. } => {
                debug!(generation, "放弃进行中的连接尝试");
            }
            ConnectionState::Idle | ConnectionState::Disposed => {}
        }
    }
}

impl ManagerInner {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_connect(self: &Arc<Self>, state: &mut ConnectionState) -> ConnectAttempt {
        if let ConnectionState::Open(stale) = std::mem::replace(state, ConnectionState::Idle) {
            stale.mark_invalid();
            self.retire(stale, "缓存的连接已失效", None);
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let attempt = Arc::clone(self).establish(generation).boxed().shared();
        *state = ConnectionState::Connecting {
            generation,
            attempt: attempt.clone(),
        };
        attempt
    }

    fn is_connecting(state: &ConnectionState, generation: u64) -> bool {
        matches!(state, ConnectionState::Connecting { generation: current, .. } if *current == generation)
    }

    async fn establish(self: Arc<Self>, generation: u64) -> CourierResult<Arc<ConnectionHandle>> {
        debug!(generation, "正在建立AMQP连接");

        let opened = match tokio::time::timeout(self.settings.connect_timeout, self.open()).await {
            Ok(result) => result.map_err(into_connection_error),
            Err(_) => Err(CourierError::connection(format!(
                "建立AMQP连接超时: {}ms",
                self.settings.connect_timeout.as_millis()
            ))),
        };

        match opened {
            Ok((connection, channel)) => {
                let handle = Arc::new(ConnectionHandle::new(generation, connection, channel));
                let accepted = {
                    let mut state = self.lock_state();
                    let current = Self::is_connecting(&state, generation);
                    if current {
                        *state = ConnectionState::Open(Arc::clone(&handle));
                    }
                    current
                };

                if !accepted {
                    handle.mark_invalid();
                    handle.close().await;
                    return Err(CourierError::connection("连接在建立过程中被释放"));
                }

                let observer = self.observer(generation);
                handle.connection.on_error(Arc::clone(&observer));
                handle.channel.on_error(observer);

                info!(generation, "AMQP连接已建立");
                self.monitoring.increment("amqp_connection_established", &[]);
                self.monitoring.gauge("amqp_connection_open", 1.0, &[]);
                Ok(handle)
            }
            Err(error) => {
                {
                    let mut state = self.lock_state();
                    if Self::is_connecting(&state, generation) {
                        *state = ConnectionState::Idle;
                    }
                }
                warn!(generation, error = %error, "建立AMQP连接失败");
                self.monitoring.increment("amqp_connection_failed", &[]);
                Err(error)
            }
        }
    }

    async fn open(&self) -> CourierResult<(Box<dyn BrokerConnection>, Box<dyn BrokerChannel>)> {
        let connection = self.connector.connect().await?;
        match open_channel(connection.as_ref(), self.settings.prefetch_count).await {
            Ok(channel) => Ok((connection, channel)),
            Err(error) => {
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "关闭未完成初始化的连接失败");
                }
                Err(error)
            }
        }
    }

    /// 注册到连接和通道上的错误回调，只影响创建它的那一代连接
    fn observer(self: &Arc<Self>, generation: u64) -> ErrorObserver {
        let inner: Weak<ManagerInner> = Arc::downgrade(self);
        let runtime = RuntimeHandle::try_current().ok();

        Arc::new(move |reason: String| {
            if let Some(inner) = inner.upgrade() {
                inner.invalidate_generation(generation, &reason, runtime.clone());
            }
        })
    }

    fn invalidate_generation(&self, generation: u64, reason: &str, runtime: Option<RuntimeHandle>) {
        let stale = {
            let mut state = self.lock_state();
            let current =
                matches!(&*state, ConnectionState::Open(handle) if handle.generation() == generation);
            if !current {
                return;
            }
            match std::mem::replace(&mut *state, ConnectionState::Idle) {
                ConnectionState::Open(handle) => handle,
                _ => return,
            }
        };

        stale.mark_invalid();
        self.retire(stale, reason, runtime);
    }

    /// 在后台关闭已从缓存移除的句柄
    fn retire(&self, handle: Arc<ConnectionHandle>, reason: &str, runtime: Option<RuntimeHandle>) {
        warn!(generation = handle.generation(), reason, "AMQP连接已失效");
        self.monitoring.increment("amqp_connection_lost", &[]);
        self.monitoring.gauge("amqp_connection_open", 0.0, &[]);

        match runtime.or_else(|| RuntimeHandle::try_current().ok()) {
            Some(runtime) => {
                runtime.spawn(async move { handle.close().await });
            }
            None => debug!(generation = handle.generation(), "没有可用的运行时，直接丢弃失效连接"),
        }
    }
}

async fn open_channel(
    connection: &dyn BrokerConnection,
    prefetch_count: u16,
) -> CourierResult<Box<dyn BrokerChannel>> {
    let channel = connection.create_channel().await.map_err(into_connection_error)?;
    if prefetch_count > 0 {
        if let Err(error) = channel.set_prefetch(prefetch_count).await {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "关闭通道失败");
            }
            return Err(into_connection_error(error));
        }
    }
    Ok(channel)
}

fn into_connection_error(error: CourierError) -> CourierError {
    match error {
        CourierError::Connection(_) => error,
        other => CourierError::connection(other.to_string()),
    }
}

/// 连接租约
///
/// 操作成功后调用 [`complete`](Self::complete)；否则释放时连接被标记为失效。
pub struct ConnectionLease {
    handle: Arc<ConnectionHandle>,
    manager: Weak<ManagerInner>,
    completed: bool,
}

impl ConnectionLease {
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn channel(&self) -> &dyn BrokerChannel {
        self.handle.channel()
    }

    pub fn generation(&self) -> u64 {
        self.handle.generation()
    }

    /// 操作正常结束，连接保持可用
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.handle.mark_invalid();
        if let Some(inner) = self.manager.upgrade() {
            inner.invalidate_generation(self.handle.generation(), "连接租约异常结束", None);
        }
    }
}
