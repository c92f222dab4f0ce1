//! Single-shot, cancellable, reschedulable delayed callbacks.
//!
//! State machine:
//!
//! ```text
//! Created ── start() ──→ Running ── timer ──→ Fired
//!                          │  ↺ reschedule()
//!                       cancel()
//!                          ↓
//!                      Cancelled
//! ```
//!
//! Every arm bumps a generation counter. A timer only fires if its
//! generation is still current, so a superseded or cancelled timer can
//! never run the callback.

use chrono::{DateTime, Utc};
use latchkey_core::{LatchkeyResult, PolicyError, TaskError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback run when a delayed task fires.
pub type TaskCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    Running,
    Cancelled,
    Fired,
}

/// Registration options for a delayed task.
#[derive(Clone)]
pub struct DelayedTaskOptions {
    pub callback: TaskCallback,
    pub timeout: Duration,
    pub start_on_create: bool,
}

impl DelayedTaskOptions {
    pub fn new<F>(timeout: Duration, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            timeout,
            start_on_create: false,
        }
    }

    /// Arm the timer as soon as the task is created.
    pub fn start_on_create(mut self) -> Self {
        self.start_on_create = true;
        self
    }
}

impl std::fmt::Debug for DelayedTaskOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedTaskOptions")
            .field("timeout", &self.timeout)
            .field("start_on_create", &self.start_on_create)
            .finish_non_exhaustive()
    }
}

/// New firing time for `reschedule`. Exactly one field must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescheduleOptions {
    pub ms_from_now: Option<u64>,
    pub run_time: Option<DateTime<Utc>>,
}

impl RescheduleOptions {
    pub fn in_ms(ms: u64) -> Self {
        Self {
            ms_from_now: Some(ms),
            run_time: None,
        }
    }

    pub fn at(run_time: DateTime<Utc>) -> Self {
        Self {
            ms_from_now: None,
            run_time: Some(run_time),
        }
    }

    /// Resolve to a positive delay measured from `now`.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Result<Duration, PolicyError> {
        let delay_ms = match (self.ms_from_now, self.run_time) {
            (None, None) => return Err(PolicyError::RescheduleTargetMissing),
            (Some(_), Some(_)) => return Err(PolicyError::RescheduleTargetAmbiguous),
            (Some(ms), None) => i64::try_from(ms).unwrap_or(i64::MAX),
            (None, Some(at)) => (at - now).num_milliseconds(),
        };
        if delay_ms <= 0 {
            return Err(PolicyError::NonPositiveDelay { delay_ms });
        }
        Ok(Duration::from_millis(delay_ms as u64))
    }
}

// ============================================================================
// DELAYED TASK
// ============================================================================

#[derive(Debug)]
struct TaskInner {
    state: TaskState,
    generation: u64,
    timeout: Duration,
    armed_at: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    timer: Option<JoinHandle<()>>,
}

/// A delayed callback backed by a Tokio timer task.
pub struct DelayedTask {
    id: String,
    callback: TaskCallback,
    inner: Arc<Mutex<TaskInner>>,
}

impl DelayedTask {
    /// Create a task, arming it immediately if `start_on_create` is set.
    ///
    /// Arming requires a Tokio runtime (`TaskError::NoRuntime` otherwise).
    pub fn new(options: DelayedTaskOptions) -> LatchkeyResult<Self> {
        let task = Self {
            id: Uuid::now_v7().to_string(),
            callback: options.callback,
            inner: Arc::new(Mutex::new(TaskInner {
                state: TaskState::Created,
                generation: 0,
                timeout: options.timeout,
                armed_at: None,
                last_run: None,
                timer: None,
            })),
        };
        if options.start_on_create {
            task.start()?;
        }
        Ok(task)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    pub fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    /// When the callback last fired.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.lock().last_run
    }

    /// Predicted firing time; `None` unless running.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        let inner = self.lock();
        if inner.state != TaskState::Running {
            return None;
        }
        let timeout = chrono::Duration::from_std(inner.timeout).ok()?;
        inner.armed_at.map(|armed| armed + timeout)
    }

    /// Arm the timer with the current timeout. No-op while running.
    pub fn start(&self) -> LatchkeyResult<()> {
        let mut inner = self.lock();
        if inner.state == TaskState::Running {
            return Ok(());
        }
        let timeout = inner.timeout;
        self.arm(&mut inner, timeout)
    }

    /// Disarm a running task. Returns whether a timer was disarmed;
    /// cancelling anything else is a no-op.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != TaskState::Running {
            return false;
        }
        inner.generation += 1;
        inner.state = TaskState::Cancelled;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        tracing::debug!(task_id = %self.id, "Delayed task cancelled");
        true
    }

    /// Re-arm with a new delay. Invalid options leave the task untouched.
    pub fn reschedule(&self, options: RescheduleOptions) -> LatchkeyResult<()> {
        let delay = options.delay_from(Utc::now())?;
        let mut inner = self.lock();
        self.arm(&mut inner, delay)?;
        tracing::debug!(
            task_id = %self.id,
            delay_ms = delay.as_millis() as u64,
            "Delayed task rescheduled"
        );
        Ok(())
    }

    fn arm(&self, inner: &mut TaskInner, delay: Duration) -> LatchkeyResult<()> {
        let handle = Handle::try_current().map_err(|_| TaskError::NoRuntime {
            id: self.id.clone(),
        })?;

        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.generation += 1;
        inner.state = TaskState::Running;
        inner.timeout = delay;
        inner.armed_at = Some(Utc::now());

        let generation = inner.generation;
        let shared = Arc::clone(&self.inner);
        let callback = Arc::clone(&self.callback);
        let id = self.id.clone();

        inner.timer = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if inner.generation != generation || inner.state != TaskState::Running {
                    return;
                }
                inner.state = TaskState::Fired;
                inner.last_run = Some(Utc::now());
                inner.timer = None;
            }
            tracing::debug!(task_id = %id, "Delayed task fired");
            callback();
        }));
        Ok(())
    }
}

impl std::fmt::Debug for DelayedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("DelayedTask")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("timeout", &inner.timeout)
            .field("last_run", &inner.last_run)
            .finish_non_exhaustive()
    }
}
