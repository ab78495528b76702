use std::sync::Arc;

use async_trait::async_trait;

use crate::{models::DispatchContext, CourierResult};

/// 消息处理中间件
///
/// 中间件在消息交给传输通道之前执行，可以补充元数据或验证消息。
/// 不调用 `next.run(context)` 即终止后续中间件的执行。
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// 优先级，数值越大越先执行
    fn priority(&self) -> i32 {
        0
    }

    async fn handle(&self, context: &mut DispatchContext, next: Next<'_>) -> CourierResult<()>;
}

/// 已注册的中间件及其生效优先级
#[derive(Clone)]
pub struct MiddlewareDescriptor {
    pub priority: i32,
    pub handler: Arc<dyn Middleware>,
}

impl MiddlewareDescriptor {
    pub fn new(handler: Arc<dyn Middleware>) -> Self {
        Self {
            priority: handler.priority(),
            handler,
        }
    }

    pub fn with_priority(handler: Arc<dyn Middleware>, priority: i32) -> Self {
        Self { priority, handler }
    }
}

impl std::fmt::Debug for MiddlewareDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareDescriptor")
            .field("name", &self.handler.name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// 管道中剩余的中间件
pub struct Next<'a> {
    remaining: &'a [MiddlewareDescriptor],
}

impl<'a> Next<'a> {
    pub fn new(remaining: &'a [MiddlewareDescriptor]) -> Self {
        Self { remaining }
    }

    /// 执行下一个中间件，管道末尾直接返回
    pub async fn run(self, context: &mut DispatchContext) -> CourierResult<()> {
        match self.remaining.split_first() {
            Some((current, rest)) => current.handler.handle(context, Next::new(rest)).await,
            None => Ok(()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}
