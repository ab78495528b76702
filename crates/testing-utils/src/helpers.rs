//! Test helper utilities

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Poll `condition` until it holds or `timeout` elapses
///
/// Uses tokio time so it also works under a paused clock.
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

/// Synchronous variant of [`wait_for`] for conditions that do not await
pub async fn eventually<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    wait_for(move || std::future::ready(condition()), timeout).await
}
