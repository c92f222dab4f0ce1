//! Deadline wrapper for a single async handler.

use latchkey_core::{LatchkeyResult, TaskError};
use std::future::Future;
use std::time::Duration;

/// Await `handler`, failing with `TaskError::TimedOut` if it has not settled
/// within `timeout`. The handler is dropped on timeout.
pub async fn run_with_timeout<Fut, T>(handler: Fut, timeout: Duration) -> LatchkeyResult<T>
where
    Fut: Future<Output = LatchkeyResult<T>>,
{
    match tokio::time::timeout(timeout, handler).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Task timed out");
            Err(TaskError::TimedOut { timeout }.into())
        }
    }
}
