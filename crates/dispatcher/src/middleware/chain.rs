use std::sync::Arc;

use courier_core::{CourierResult, DispatchContext, Middleware, MiddlewareDescriptor, Next};

/// 按优先级排序的中间件管道
///
/// 优先级越高越先执行，相同优先级保持注册顺序。
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<MiddlewareDescriptor>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用中间件自身声明的优先级注册
    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.insert(MiddlewareDescriptor::new(middleware));
    }

    pub fn add_with_priority(&mut self, middleware: Arc<dyn Middleware>, priority: i32) {
        self.insert(MiddlewareDescriptor::with_priority(middleware, priority));
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.add(middleware);
        self
    }

    fn insert(&mut self, descriptor: MiddlewareDescriptor) {
        self.middlewares.push(descriptor);
        // sort_by 是稳定排序
        self.middlewares.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// 按执行顺序列出中间件名称
    pub fn names(&self) -> Vec<String> {
        self.middlewares
            .iter()
            .map(|descriptor| descriptor.handler.name().to_string())
            .collect()
    }

    pub async fn execute(&self, context: &mut DispatchContext) -> CourierResult<()> {
        Next::new(&self.middlewares).run(context).await
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.middlewares.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Message;
    use courier_testing_utils::{EventLog, FailingMiddleware, RecordingMiddleware};
    use serde_json::json;
    use std::sync::Mutex;

    fn context() -> DispatchContext {
        DispatchContext::new("orders", Message::from_value(json!({"n": 1})))
    }

    fn recorder(name: &str, priority: i32, log: &EventLog) -> Arc<dyn Middleware> {
        Arc::new(RecordingMiddleware::new(name, priority, Arc::clone(log)))
    }

    #[tokio::test]
    async fn test_runs_in_descending_priority() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add(recorder("p1", 1, &log));
        chain.add(recorder("p3", 3, &log));
        chain.add(recorder("p2", 2, &log));

        chain.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["p3", "p2", "p1"]);
    }

    #[tokio::test]
    async fn test_equal_priorities_keep_registration_order() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .with(recorder("first", 100, &log))
            .with(recorder("second", 100, &log))
            .with(recorder("top", 200, &log));

        assert_eq!(chain.names(), vec!["top", "first", "second"]);
        chain.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["top", "first", "second"]);
    }

    #[tokio::test]
    async fn test_explicit_priority_overrides_declared_one() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add(recorder("declared-high", 50, &log));
        chain.add_with_priority(recorder("declared-low", 1, &log), 99);

        chain.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["declared-low", "declared-high"]);
    }

    #[tokio::test]
    async fn test_handler_not_calling_next_stops_chain() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add(recorder("high", 10, &log));
        chain.add(Arc::new(
            RecordingMiddleware::new("gate", 5, Arc::clone(&log)).stopping(),
        ));
        chain.add(recorder("low", 1, &log));

        chain.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["high", "gate"]);
    }

    #[tokio::test]
    async fn test_error_aborts_remaining_handlers() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add_with_priority(Arc::new(FailingMiddleware::new("rejected")), 10);
        chain.add(recorder("after", 1, &log));

        let error = chain.execute(&mut context()).await.unwrap_err();
        assert!(error.is_fatal());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_chain_is_noop() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        chain.execute(&mut context()).await.unwrap();
    }
}
