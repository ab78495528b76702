//! Mock implementations of the transport, monitoring and broker traits
//!
//! All mocks are cheap to clone; clones share the same recorded state so a test
//! can hand one copy to the code under test and inspect another.

use async_trait::async_trait;
use courier_core::config::QueueOptions;
use courier_core::traits::MetricLabels;
use courier_core::{
    CourierError, CourierResult, DispatchContext, Message, Middleware, MonitoringSink, Next,
    Transport,
};
use courier_infrastructure::amqp::{
    BrokerChannel, BrokerConnection, BrokerConnector, ErrorObserver, PublishRequest,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared, ordered log of lifecycle events across several mocks
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// A single call received by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSend {
    pub destination: String,
    pub messages: Vec<Message>,
    pub batch: bool,
}

#[derive(Default)]
struct MockTransportState {
    attempts: Vec<RecordedSend>,
    delivered: Vec<RecordedSend>,
    scripted_failures: VecDeque<CourierError>,
    persistent_failure: Option<CourierError>,
    delay: Option<Duration>,
    init_calls: usize,
    dispose_calls: usize,
    fail_init: Option<CourierError>,
}

/// Mock implementation of Transport for testing
///
/// Failures are taken from the scripted queue first, then from the persistent
/// failure if one is set.
#[derive(Clone)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockTransportState>>,
    events: Option<EventLog>,
}

impl MockTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockTransportState::default())),
            events: None,
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Fail the next call with `error`
    pub fn fail_next(&self, error: CourierError) {
        self.state.lock().unwrap().scripted_failures.push_back(error);
    }

    /// Fail every call with `error` until [`clear_failures`](Self::clear_failures)
    pub fn fail_always(&self, error: CourierError) {
        self.state.lock().unwrap().persistent_failure = Some(error);
    }

    pub fn fail_init(&self, error: CourierError) {
        self.state.lock().unwrap().fail_init = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.scripted_failures.clear();
        state.persistent_failure = None;
    }

    /// Every send waits for `delay` before completing
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    /// Number of send calls received, failed ones included
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    pub fn attempts(&self) -> Vec<RecordedSend> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Successfully completed sends
    pub fn delivered(&self) -> Vec<RecordedSend> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn delivered_messages(&self) -> Vec<Message> {
        self.delivered()
            .into_iter()
            .flat_map(|send| send.messages)
            .collect()
    }

    pub fn init_count(&self) -> usize {
        self.state.lock().unwrap().init_calls
    }

    pub fn dispose_count(&self) -> usize {
        self.state.lock().unwrap().dispose_calls
    }

    fn log_event(&self, event: &str) {
        if let Some(events) = &self.events {
            events.lock().unwrap().push(format!("{}:{}", event, self.name));
        }
    }

    async fn record(&self, send: RecordedSend) -> CourierResult<()> {
        let (delay, failure) = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push(send.clone());
            let failure = state
                .scripted_failures
                .pop_front()
                .or_else(|| state.persistent_failure.clone());
            (state.delay, failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(error) => Err(error),
            None => {
                self.state.lock().unwrap().delivered.push(send);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> CourierResult<()> {
        let failure = {
            let mut state = self.state.lock().unwrap();
            state.init_calls += 1;
            state.fail_init.take()
        };
        self.log_event("init");
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn dispose(&self) -> CourierResult<()> {
        self.state.lock().unwrap().dispose_calls += 1;
        self.log_event("dispose");
        Ok(())
    }

    async fn send_message(&self, destination: &str, message: &Message) -> CourierResult<()> {
        self.record(RecordedSend {
            destination: destination.to_string(),
            messages: vec![message.clone()],
            batch: false,
        })
        .await
    }

    async fn send_batch(&self, destination: &str, messages: &[Message]) -> CourierResult<()> {
        self.record(RecordedSend {
            destination: destination.to_string(),
            messages: messages.to_vec(),
            batch: true,
        })
        .await
    }
}

type LabelSet = Vec<(String, String)>;

#[derive(Default)]
struct RecordedMetrics {
    counters: Vec<(String, LabelSet)>,
    gauges: HashMap<String, f64>,
    histograms: Vec<(String, f64)>,
}

/// Monitoring sink that keeps everything in memory
#[derive(Clone, Default)]
pub struct InMemoryMonitoringSink {
    metrics: Arc<Mutex<RecordedMetrics>>,
}

impl InMemoryMonitoringSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a counter was incremented
    pub fn get_metric_count(&self, metric: &str) -> usize {
        self.metrics
            .lock()
            .unwrap()
            .counters
            .iter()
            .filter(|(name, _)| name == metric)
            .count()
    }

    /// Counter increments whose labels contain every pair in `labels`
    pub fn get_metric_count_with(&self, metric: &str, labels: &[(&str, &str)]) -> usize {
        self.metrics
            .lock()
            .unwrap()
            .counters
            .iter()
            .filter(|(name, recorded)| {
                name == metric
                    && labels.iter().all(|(key, value)| {
                        recorded.iter().any(|(k, v)| k == key && v == value)
                    })
            })
            .count()
    }

    pub fn gauge_value(&self, metric: &str) -> Option<f64> {
        self.metrics.lock().unwrap().gauges.get(metric).copied()
    }

    pub fn histogram_values(&self, metric: &str) -> Vec<f64> {
        self.metrics
            .lock()
            .unwrap()
            .histograms
            .iter()
            .filter(|(name, _)| name == metric)
            .map(|(_, value)| *value)
            .collect()
    }

    pub fn reset(&self) {
        *self.metrics.lock().unwrap() = RecordedMetrics::default();
    }
}

fn owned_labels(labels: MetricLabels<'_>) -> LabelSet {
    labels
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

impl MonitoringSink for InMemoryMonitoringSink {
    fn increment(&self, metric: &str, labels: MetricLabels<'_>) {
        self.metrics
            .lock()
            .unwrap()
            .counters
            .push((metric.to_string(), owned_labels(labels)));
    }

    fn gauge(&self, metric: &str, value: f64, _labels: MetricLabels<'_>) {
        self.metrics
            .lock()
            .unwrap()
            .gauges
            .insert(metric.to_string(), value);
    }

    fn histogram(&self, metric: &str, value: f64, _labels: MetricLabels<'_>) {
        self.metrics
            .lock()
            .unwrap()
            .histograms
            .push((metric.to_string(), value));
    }
}

/// Middleware that appends its name to a shared log
///
/// With `stop` set it does not call the rest of the chain.
pub struct RecordingMiddleware {
    name: String,
    priority: i32,
    log: EventLog,
    stop: bool,
}

impl RecordingMiddleware {
    pub fn new(name: &str, priority: i32, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            priority,
            log,
            stop: false,
        }
    }

    pub fn stopping(mut self) -> Self {
        self.stop = true;
        self
    }
}

#[async_trait]
impl Middleware for RecordingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn handle(&self, context: &mut DispatchContext, next: Next<'_>) -> CourierResult<()> {
        self.log.lock().unwrap().push(self.name.clone());
        if self.stop {
            return Ok(());
        }
        next.run(context).await
    }
}

/// Middleware that always fails with a validation error
pub struct FailingMiddleware {
    reason: String,
}

impl FailingMiddleware {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Middleware for FailingMiddleware {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _context: &mut DispatchContext, _next: Next<'_>) -> CourierResult<()> {
        Err(CourierError::validation(self.reason.clone()))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
struct Link {
    open: AtomicBool,
    close_calls: AtomicUsize,
    observers: Mutex<Vec<ErrorObserver>>,
}

impl Link {
    fn opened() -> Arc<Self> {
        let link = Self::default();
        link.open.store(true, Ordering::SeqCst);
        Arc::new(link)
    }

    /// Simulate a broker-side failure: mark closed and notify observers
    fn fail(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers {
            observer(reason.to_string());
        }
    }
}

#[derive(Default)]
struct BrokerState {
    connect_calls: AtomicUsize,
    connect_failures: AtomicUsize,
    channel_failures: AtomicUsize,
    publish_failures: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    publish_delay: Mutex<Option<Duration>>,
    connections: Mutex<Vec<Arc<Link>>>,
    channels: Mutex<Vec<Arc<Link>>>,
    prefetch: Mutex<Vec<u16>>,
    declared: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, PublishRequest)>>,
}

/// In-memory broker implementing the connector, connection and channel traits
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every physical connect waits for `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_publish_delay(&self, delay: Duration) {
        *self.state.publish_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_channels(&self, count: usize) {
        self.state.channel_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_publishes(&self, count: usize) {
        self.state.publish_failures.store(count, Ordering::SeqCst);
    }

    /// Physical connection attempts, failed ones included
    pub fn connect_count(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.lock().unwrap().len()
    }

    pub fn channel_count(&self) -> usize {
        self.state.channels.lock().unwrap().len()
    }

    pub fn is_connection_open(&self, index: usize) -> bool {
        self.state.connections.lock().unwrap()[index]
            .open
            .load(Ordering::SeqCst)
    }

    pub fn connection_close_calls(&self, index: usize) -> usize {
        self.state.connections.lock().unwrap()[index]
            .close_calls
            .load(Ordering::SeqCst)
    }

    pub fn channel_close_calls(&self, index: usize) -> usize {
        self.state.channels.lock().unwrap()[index]
            .close_calls
            .load(Ordering::SeqCst)
    }

    /// Drop the connection at `index` from the broker side
    pub fn fail_connection(&self, index: usize, reason: &str) {
        let link = Arc::clone(&self.state.connections.lock().unwrap()[index]);
        link.fail(reason);
    }

    /// Close the channel at `index` from the broker side
    pub fn fail_channel(&self, index: usize, reason: &str) {
        let link = Arc::clone(&self.state.channels.lock().unwrap()[index]);
        link.fail(reason);
    }

    pub fn prefetch_settings(&self) -> Vec<u16> {
        self.state.prefetch.lock().unwrap().clone()
    }

    pub fn declared_queues(&self) -> Vec<String> {
        self.state.declared.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, PublishRequest)> {
        self.state.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    async fn connect(&self) -> CourierResult<Box<dyn BrokerConnection>> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.state.connect_failures) {
            return Err(CourierError::connection("mock broker refused connection"));
        }

        let link = Link::opened();
        self.state.connections.lock().unwrap().push(Arc::clone(&link));
        Ok(Box::new(MockConnection {
            link,
            broker: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    link: Arc<Link>,
    broker: Arc<BrokerState>,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn create_channel(&self) -> CourierResult<Box<dyn BrokerChannel>> {
        if !self.link.open.load(Ordering::SeqCst) {
            return Err(CourierError::connection("connection is closed"));
        }
        if take_one(&self.broker.channel_failures) {
            return Err(CourierError::connection("mock broker refused channel"));
        }

        let link = Link::opened();
        self.broker.channels.lock().unwrap().push(Arc::clone(&link));
        Ok(Box::new(MockChannel {
            link,
            connection: Arc::clone(&self.link),
            broker: Arc::clone(&self.broker),
        }))
    }

    async fn close(&self) -> CourierResult<()> {
        self.link.close_calls.fetch_add(1, Ordering::SeqCst);
        self.link.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.open.load(Ordering::SeqCst)
    }

    fn on_error(&self, observer: ErrorObserver) {
        self.link.observers.lock().unwrap().push(observer);
    }
}

struct MockChannel {
    link: Arc<Link>,
    connection: Arc<Link>,
    broker: Arc<BrokerState>,
}

impl MockChannel {
    fn ensure_open(&self) -> CourierResult<()> {
        if self.link.open.load(Ordering::SeqCst) && self.connection.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CourierError::transport("amqp", "channel is closed"))
        }
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn set_prefetch(&self, count: u16) -> CourierResult<()> {
        self.ensure_open()?;
        self.broker.prefetch.lock().unwrap().push(count);
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, _options: &QueueOptions) -> CourierResult<()> {
        self.ensure_open()?;
        self.broker.declared.lock().unwrap().push(queue.to_string());
        Ok(())
    }

    async fn publish(&self, queue: &str, request: PublishRequest) -> CourierResult<()> {
        self.ensure_open()?;

        let delay = *self.broker.publish_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.broker.publish_failures) {
            return Err(CourierError::transport("amqp", "mock broker nacked publish"));
        }
        self.broker
            .published
            .lock()
            .unwrap()
            .push((queue.to_string(), request));
        Ok(())
    }

    async fn close(&self) -> CourierResult<()> {
        self.link.close_calls.fetch_add(1, Ordering::SeqCst);
        self.link.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.link.open.load(Ordering::SeqCst) && self.connection.open.load(Ordering::SeqCst)
    }

    fn on_error(&self, observer: ErrorObserver) {
        self.link.observers.lock().unwrap().push(observer);
    }
}
