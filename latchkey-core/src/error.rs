//! Error types for latchkey operations

use std::time::Duration;
use thiserror::Error;

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store transport failed: {reason}")]
    Transport { reason: String },

    #[error("Value at {key} is not an integer")]
    NotAnInteger { key: String },

    #[error("Value at {key} is not a float")]
    NotAFloat { key: String },

    #[error("Script {script} expects {expected_keys} key(s) and {expected_args} argument(s), got {got_keys} and {got_args}")]
    ScriptArity {
        script: &'static str,
        expected_keys: usize,
        expected_args: usize,
        got_keys: usize,
        got_args: usize,
    },

    #[error("Script {script} rejected its arguments: {reason}")]
    ScriptArgument { script: &'static str, reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Store state poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether a caller may reasonably retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transport { .. })
    }
}

/// Invalid argument combinations. Fatal to the call, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Unknown set policy: {0}")]
    UnknownSetPolicy(String),

    #[error("Unknown expire policy: {0}")]
    UnknownExpirePolicy(String),

    #[error("Unknown compare operator: {0}")]
    UnknownCompareOperator(String),

    #[error("Set policy {policy} requires a ttl")]
    TtlRequired { policy: &'static str },

    #[error("Must pass either ms_from_now or run_time")]
    RescheduleTargetMissing,

    #[error("Only accept either ms_from_now or run_time")]
    RescheduleTargetAmbiguous,

    #[error("New run time must be after now (delay {delay_ms}ms)")]
    NonPositiveDelay { delay_ms: i64 },

    #[error("Invalid value for {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

/// Delayed task registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task with id {id} does not exist")]
    NotFound { id: String },

    #[error("Task timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("No Tokio runtime available to schedule task {id}")]
    NoRuntime { id: String },
}

/// Retry executor errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("retry task {task_name} failed after {max_attempts} retries")]
    Exhausted {
        task_name: String,
        max_attempts: u32,
    },

    #[error("retry task {task_name} already run")]
    AlreadyRun { task_name: String },
}

/// Key lock errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LockError {
    #[error("Lease registration failed for lock {name}: {source}")]
    Lease {
        name: String,
        #[source]
        source: Box<LatchkeyError>,
    },

    #[error("Timed out after {waited:?} waiting for lock {name}")]
    WaitTimeout { name: String, waited: Duration },

    #[error("Lock {name} state channel closed")]
    Closed { name: String },
}

/// Serial task queue errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Task {task_name} in queue {queue_name} panicked")]
    HandlerPanicked {
        queue_name: String,
        task_name: String,
    },

    #[error("Queue {queue_name} dropped task {task_name} before completion")]
    Dropped {
        queue_name: String,
        task_name: String,
    },

    #[error("No Tokio runtime available to drain queue {queue_name}")]
    NoRuntime { queue_name: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Telemetry initialization failed: {reason}")]
    Telemetry { reason: String },
}

/// Master error type for all latchkey errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LatchkeyError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Retry error: {0}")]
    Retry(#[from] RetryError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Failure reported by user code, including an unsuccessful `OperationResult`.
    #[error("Operation failed: {message}")]
    Operation { message: String },
}

impl LatchkeyError {
    /// Build a task-level failure from any message.
    pub fn operation(message: impl Into<String>) -> Self {
        LatchkeyError::Operation {
            message: message.into(),
        }
    }

    /// Transport failures are transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LatchkeyError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for latchkey operations.
pub type LatchkeyResult<T> = Result<T, LatchkeyError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_message_names_task_and_attempts() {
        let err = RetryError::Exhausted {
            task_name: "sync-balances".to_string(),
            max_attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "retry task sync-balances failed after 3 retries"
        );
    }

    #[test]
    fn test_transport_is_retryable() {
        let err: LatchkeyError = StoreError::Transport {
            reason: "connection reset".to_string(),
        }
        .into();
        assert!(err.is_retryable());

        let err: LatchkeyError = PolicyError::RescheduleTargetMissing.into();
        assert!(!err.is_retryable());

        let err: LatchkeyError = StoreError::NotAnInteger {
            key: "k".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_lock_lease_error_keeps_source() {
        let inner = LatchkeyError::operation("registry offline");
        let err = LockError::Lease {
            name: "orders".to_string(),
            source: Box::new(inner.clone()),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source, Some(inner.to_string()));
    }

    #[test]
    fn test_from_conversions() {
        let err: LatchkeyError = TaskError::NotFound {
            id: "abc".to_string(),
        }
        .into();
        assert!(matches!(err, LatchkeyError::Task(TaskError::NotFound { .. })));
        assert!(err.to_string().contains("abc"));
    }
}
