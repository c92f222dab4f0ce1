//! Bounded retry executor.
//!
//! Runs a fallible async task up to `max_attempts` times with a fixed pause
//! between attempts. The attempt budget belongs to the executor: once it
//! is spent, running again is `RetryError::AlreadyRun`.

use latchkey_core::{LatchkeyError, LatchkeyResult, OperationResult, RetryConfig, RetryError};
use std::future::Future;
use std::time::Duration;

type EachFailureHook<'a> = Box<dyn FnMut(&LatchkeyError) + Send + 'a>;
type AllFailedHook<'a> = Box<dyn FnOnce(&LatchkeyError) + Send + 'a>;

/// Optional callbacks invoked by the executor.
#[derive(Default)]
pub struct RetryHooks<'a> {
    on_each_failure: Option<EachFailureHook<'a>>,
    on_all_failed: Option<AllFailedHook<'a>>,
}

impl<'a> RetryHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the error of every failed attempt.
    pub fn on_each_failure<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&LatchkeyError) + Send + 'a,
    {
        self.on_each_failure = Some(Box::new(hook));
        self
    }

    /// Called once with the exhaustion error when it is raised as an error.
    pub fn on_all_failed<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&LatchkeyError) + Send + 'a,
    {
        self.on_all_failed = Some(Box::new(hook));
        self
    }
}

/// Retry executor for one named task.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    task_name: String,
    max_attempts: u32,
    attempts_remaining: u32,
    interval: Duration,
    return_result_object: bool,
}

impl RetryExecutor {
    pub fn new(task_name: impl Into<String>, config: &RetryConfig) -> Self {
        Self {
            task_name: task_name.into(),
            max_attempts: config.max_attempts,
            attempts_remaining: config.max_attempts,
            interval: config.interval,
            return_result_object: config.return_result_object,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `task` and return its value. Exhaustion is an error.
    pub async fn run<F, Fut, T>(&mut self, task: F) -> LatchkeyResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LatchkeyResult<T>>,
    {
        self.run_with_hooks(task, RetryHooks::default()).await
    }

    pub async fn run_with_hooks<F, Fut, T>(
        &mut self,
        task: F,
        mut hooks: RetryHooks<'_>,
    ) -> LatchkeyResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LatchkeyResult<T>>,
    {
        self.ensure_runnable()?;
        match self.attempt_all(task, &mut hooks).await {
            Ok(value) => Ok(value),
            Err(exhausted) => Err(self.raise(exhausted, hooks)),
        }
    }

    /// Run a task that reports failure as `OperationResult { success: false }`.
    ///
    /// An unsuccessful result is retried like an error. With
    /// `return_result_object`, exhaustion resolves to a failed result
    /// instead of an error.
    pub async fn run_operation<F, Fut, T>(
        &mut self,
        mut task: F,
        mut hooks: RetryHooks<'_>,
    ) -> LatchkeyResult<OperationResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LatchkeyResult<OperationResult<T>>>,
    {
        self.ensure_runnable()?;
        let checked = || {
            let attempt = task();
            async move {
                attempt.await.and_then(|result| {
                    if result.success {
                        Ok(result)
                    } else {
                        Err(LatchkeyError::operation(
                            result
                                .message
                                .unwrap_or_else(|| "execution failed".to_string()),
                        ))
                    }
                })
            }
        };
        match self.attempt_all(checked, &mut hooks).await {
            Ok(result) => Ok(result),
            Err(exhausted) => self.settle(exhausted, hooks),
        }
    }

    /// Run a task returning a plain value and wrap success as
    /// `OperationResult::ok`. Exhaustion is handled as in `run_operation`.
    pub async fn run_wrapped<F, Fut, T>(
        &mut self,
        task: F,
        mut hooks: RetryHooks<'_>,
    ) -> LatchkeyResult<OperationResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LatchkeyResult<T>>,
    {
        self.ensure_runnable()?;
        match self.attempt_all(task, &mut hooks).await {
            Ok(value) => Ok(OperationResult::ok(value)),
            Err(exhausted) => self.settle(exhausted, hooks),
        }
    }

    fn ensure_runnable(&self) -> LatchkeyResult<()> {
        if self.attempts_remaining == 0 {
            return Err(RetryError::AlreadyRun {
                task_name: self.task_name.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn attempt_all<F, Fut, T>(
        &mut self,
        mut task: F,
        hooks: &mut RetryHooks<'_>,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LatchkeyResult<T>>,
    {
        while self.attempts_remaining > 0 {
            let attempt = self.max_attempts - self.attempts_remaining + 1;
            let outcome = task().await;
            self.attempts_remaining -= 1;

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        task = %self.task_name,
                        attempt = attempt,
                        remaining = self.attempts_remaining,
                        error = %e,
                        "Retry attempt failed"
                    );
                    if let Some(hook) = hooks.on_each_failure.as_mut() {
                        hook(&e);
                    }
                    if self.attempts_remaining > 0 {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }

        tracing::error!(
            task = %self.task_name,
            max_attempts = self.max_attempts,
            "Retry attempts exhausted"
        );
        Err(RetryError::Exhausted {
            task_name: self.task_name.clone(),
            max_attempts: self.max_attempts,
        })
    }

    fn raise(&self, exhausted: RetryError, hooks: RetryHooks<'_>) -> LatchkeyError {
        let err = LatchkeyError::from(exhausted);
        if let Some(hook) = hooks.on_all_failed {
            hook(&err);
        }
        err
    }

    fn settle<T>(
        &self,
        exhausted: RetryError,
        hooks: RetryHooks<'_>,
    ) -> LatchkeyResult<OperationResult<T>> {
        if self.return_result_object {
            return Ok(OperationResult::failure(exhausted.to_string()));
        }
        Err(self.raise(exhausted, hooks))
    }
}
